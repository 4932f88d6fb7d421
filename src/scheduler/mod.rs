//! Trigger scheduler: wall-clock timers for rules and periodic pollers for
//! data sources.
//!
//! The scheduler never touches rule logic — it produces targeted fire
//! requests into the transition engine. Timers live exactly as long as
//! their owning rule: arming happens at insertion, and any removal path
//! cancels the timer through [`cancel_timer`].

mod data_source;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::engine::{Core, EngineInner};
use crate::types::{events, Rule, TriggerConfig};

pub use data_source::DataSource;
pub(crate) use data_source::{run_source_cycle, spawn_poller};

/// Arm the trigger task for a freshly inserted time-based rule. The task
/// handle is recorded keyed by rule id so removal can cancel it.
pub(crate) fn arm_rule(inner: &Arc<EngineInner>, core: &mut Core, rule: &Rule) {
    let config = rule.trigger_config.clone().unwrap_or_default();
    let handle = match rule.on.as_str() {
        events::TIMER => spawn_timer(Arc::clone(inner), rule.id, config),
        events::INTERVAL => spawn_interval(Arc::clone(inner), rule.id, config),
        events::SCHEDULE => spawn_schedule(Arc::clone(inner), rule.id, config),
        other => {
            debug!("[Scheduler] Ignoring non-time-based on='{other}'");
            return;
        }
    };
    core.timers.insert(rule.id, handle);
}

/// Cancel the armed trigger for a rule, if any.
pub(crate) fn cancel_timer(core: &mut Core, rule_id: u64) {
    if let Some(handle) = core.timers.remove(&rule_id) {
        handle.abort();
        debug!("[Scheduler] Timer cancelled for rule {rule_id}");
    }
}

/// One-shot timer: fire once after `delay_ms`; with `auto_cleanup` the rule
/// is removed after the attempt whether or not it matched.
fn spawn_timer(
    inner: Arc<EngineInner>,
    rule_id: u64,
    config: TriggerConfig,
) -> tokio::task::AbortHandle {
    let delay = Duration::from_millis(config.delay_ms.unwrap_or(0));
    let auto_cleanup = config.auto_cleanup.unwrap_or(false);
    info!("[Scheduler] Timer armed: {}ms for rule {rule_id}", delay.as_millis());

    tokio::spawn(async move {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        let mut core = inner.core.lock().await;
        debug!("[Scheduler] Timer fired for rule {rule_id}");
        crate::engine::fire_rule(&inner, &mut core, rule_id).await;
        if auto_cleanup && core.machine.remove_rule(rule_id).is_some() {
            debug!("[Scheduler] Rule {rule_id} auto-cleaned up");
        }
        // Self-completion: drop the table entry without aborting this task.
        core.timers.remove(&rule_id);
    })
    .abort_handle()
}

/// Recurring interval: re-armed after each fire while `repeat` holds and
/// the rule still exists.
fn spawn_interval(
    inner: Arc<EngineInner>,
    rule_id: u64,
    config: TriggerConfig,
) -> tokio::task::AbortHandle {
    let delay = Duration::from_millis(config.delay_ms.unwrap_or(0).max(1));
    let repeat = config.repeat.unwrap_or(true);
    info!(
        "[Scheduler] Interval armed: every {}ms for rule {rule_id}",
        delay.as_millis()
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut core = inner.core.lock().await;
            if core.machine.rule_by_id(rule_id).is_none() {
                core.timers.remove(&rule_id);
                return;
            }
            debug!("[Scheduler] Interval fired for rule {rule_id}");
            crate::engine::fire_rule(&inner, &mut core, rule_id).await;
            if !repeat || core.machine.rule_by_id(rule_id).is_none() {
                core.timers.remove(&rule_id);
                return;
            }
        }
    })
    .abort_handle()
}

/// Time-of-day schedule: fire at the next wall-clock occurrence strictly in
/// the future; re-armed daily iff `repeat_daily`, otherwise the rule is
/// removed after firing.
fn spawn_schedule(
    inner: Arc<EngineInner>,
    rule_id: u64,
    config: TriggerConfig,
) -> tokio::task::AbortHandle {
    let hour = config.hour.unwrap_or(0);
    let minute = config.minute.unwrap_or(0);
    let repeat_daily = config.repeat_daily.unwrap_or(false);
    info!(
        "[Scheduler] Schedule armed: {hour:02}:{minute:02} ({}) for rule {rule_id}",
        if repeat_daily { "daily" } else { "once" }
    );

    tokio::spawn(async move {
        loop {
            let delay = next_occurrence_delay(Local::now(), hour, minute);
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut core = inner.core.lock().await;
            if core.machine.rule_by_id(rule_id).is_none() {
                core.timers.remove(&rule_id);
                return;
            }
            debug!("[Scheduler] Schedule fired for rule {rule_id} at {hour:02}:{minute:02}");
            crate::engine::fire_rule(&inner, &mut core, rule_id).await;
            if repeat_daily && core.machine.rule_by_id(rule_id).is_some() {
                continue;
            }
            core.machine.remove_rule(rule_id);
            core.timers.remove(&rule_id);
            return;
        }
    })
    .abort_handle()
}

/// Delay until the next `hour:minute:00` strictly in the future. A target
/// equal to now re-arms for tomorrow, never immediately.
pub fn next_occurrence_delay(now: DateTime<Local>, hour: u32, minute: u32) -> Duration {
    let now_naive = now.naive_local();
    let mut target = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap_or(now_naive);
    if target <= now_naive {
        target += chrono::Duration::days(1);
    }
    (target - now_naive).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn future_target_fires_today() {
        let delay = next_occurrence_delay(local(8, 0, 0), 9, 30);
        assert_eq!(delay, Duration::from_secs(90 * 60));
    }

    #[test]
    fn past_target_fires_tomorrow() {
        let delay = next_occurrence_delay(local(10, 0, 0), 9, 30);
        assert_eq!(delay, Duration::from_secs(23 * 3600 + 30 * 60));
    }

    #[test]
    fn exact_now_fires_tomorrow_not_immediately() {
        let delay = next_occurrence_delay(local(9, 30, 0), 9, 30);
        assert_eq!(delay, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn seconds_past_the_minute_push_to_tomorrow() {
        let delay = next_occurrence_delay(local(9, 30, 1), 9, 30);
        assert_eq!(delay, Duration::from_secs(24 * 3600 - 1));
    }
}
