//! Event delivery and state entry.
//!
//! Both delivery paths — ordinary `execute_event` and scheduler-targeted
//! `fire_rule` — share the same wildcard matcher and the same guard/action
//! machinery, so a rule behaves identically however it is reached.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::expr::{truthy, EvalContext, Program};
use crate::pipeline::run_pipeline_steps;
use crate::sink::AnimationSpec;
use crate::types::{ChannelValue, LightState};

use super::{Core, DurationTimer, EngineInner};

/// Deliver an event: filter rules by (on, current state), take the first
/// whose guard passes, run its action, transition, and run its pipeline.
///
/// Returns true when a rule fired. The two false cases — candidates whose
/// guards all failed vs. no candidates at all — are distinguished on the
/// diagnostic channel.
pub(crate) async fn execute_event(
    inner: &Arc<EngineInner>,
    core: &mut Core,
    event: &str,
) -> bool {
    let current = core.machine.current.clone();

    let candidates: Vec<u64> = core
        .machine
        .evaluation_order()
        .into_iter()
        .filter(|&id| {
            core.machine
                .rule_by_id(id)
                .is_some_and(|r| r.on == event && r.matches_state(&current))
        })
        .collect();

    if candidates.is_empty() {
        debug!("[Engine] No transition for '{event}' in state '{current}'");
        return false;
    }

    let Some(chosen) = candidates.into_iter().find(|&id| guard_passes(core, id)) else {
        debug!(
            "[Engine] Rules found for '{event}' in state '{current}', but no conditions matched"
        );
        return false;
    };

    apply_rule(inner, core, chosen).await;
    true
}

/// Scheduler-targeted firing: bypasses the priority filter and addresses
/// one rule, but state matching and guard evaluation still apply.
///
/// Returns true when the rule fired.
pub(crate) async fn fire_rule(inner: &Arc<EngineInner>, core: &mut Core, rule_id: u64) -> bool {
    let Some(rule) = core.machine.rule_by_id(rule_id) else {
        return false;
    };
    if !rule.enabled {
        return false;
    }
    let current = core.machine.current.clone();
    if !rule.matches_state(&current) {
        debug!(
            "[Engine] Rule {rule_id} not fired: '{}' does not match state '{current}'",
            rule.from
        );
        return false;
    }
    if !guard_passes(core, rule_id) {
        return false;
    }
    apply_rule(inner, core, rule_id).await;
    true
}

/// Evaluate a rule's guard against the variable store.
///
/// No condition counts as true; a condition that failed to compile at
/// insertion, or fails to evaluate, counts as false.
fn guard_passes(core: &mut Core, rule_id: u64) -> bool {
    let Some(rule) = core.machine.rule_by_id(rule_id) else {
        return false;
    };
    if rule.condition.is_none() {
        return true;
    }

    let Some(program) = core
        .machine
        .compiled_for(rule_id)
        .and_then(|c| c.condition.clone())
    else {
        return false;
    };

    match EvalContext::guard(&mut core.machine.variables).eval(&program) {
        Ok(value) => truthy(&value),
        Err(e) => {
            warn!("[Engine] Guard '{}' failed: {e}", program.source());
            false
        }
    }
}

/// Run the chosen rule: action first, then the transition, then the
/// pipeline, all on the lane.
async fn apply_rule(inner: &Arc<EngineInner>, core: &mut Core, rule_id: u64) {
    let Some(rule) = core.machine.rule_by_id(rule_id) else {
        return;
    };
    let description = rule.describe();
    let to = rule.to.clone();
    let pipeline = rule.pipeline.clone();
    let action: Option<Program> = core
        .machine
        .compiled_for(rule_id)
        .and_then(|c| c.action.clone());

    // Action runs before the transition; the transition sees the
    // post-action variable store. A failing action is logged and the
    // transition proceeds.
    if let Some(program) = action {
        if let Err(e) = EvalContext::action(&mut core.machine.variables).eval(&program) {
            warn!("[Engine] Action '{}' failed: {e}", program.source());
        }
    }

    info!("[Engine] Transition: {description}");
    if let Err(e) = enter_state(inner, core, &to) {
        warn!("[Engine] Transition refused: {e}");
    }

    if let Some(name) = pipeline {
        match core.pipelines.get(&name).cloned() {
            Some(pipeline) => {
                let mut scope = seed_scope(core);
                let result = run_pipeline_steps(inner, core, &pipeline, &mut scope, 0).await;
                if !result.success {
                    warn!("[Engine] Pipeline '{name}' failed after rule fired");
                }
            }
            None => warn!("[Engine] Rule names unknown pipeline '{name}'"),
        }
    }
}

/// Scope for a pipeline invocation: a copy of the variable store plus a
/// `memory` sub-object mirroring the memory store.
pub(crate) fn seed_scope(core: &Core) -> serde_json::Map<String, serde_json::Value> {
    let mut scope = core.machine.variables.clone();
    scope.insert(
        "memory".to_string(),
        serde_json::Value::Object(core.memory.list().clone()),
    );
    scope
}

/// Enter a state: update `current`, notify the sink (always — no
/// coalescing), and manage the duration timer.
///
/// Entering any state cancels a pending duration timer; entering a state
/// with `duration_ms` arms a fresh one that advances to `then` if the state
/// is still active at expiry.
pub(crate) fn enter_state(
    inner: &Arc<EngineInner>,
    core: &mut Core,
    name: &str,
) -> Result<(), CoreError> {
    let state = core
        .machine
        .state(name)
        .cloned()
        .ok_or_else(|| CoreError::UnknownState(name.to_string()))?;

    if let Some(timer) = core.duration.take() {
        timer.handle.abort();
    }

    core.machine.current = name.to_string();
    info!("[Engine] State changed to: {name}");
    render(inner, &state);

    if let (Some(duration_ms), Some(then)) = (state.duration_ms, state.then.clone()) {
        let task_inner = Arc::clone(inner);
        let state_name = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => {}
            }
            let mut core = task_inner.core.lock().await;
            if core.machine.current != state_name {
                return;
            }
            // Only proceed if the pending timer is still ours; a re-entry
            // of the same state re-armed a fresh one.
            match &core.duration {
                Some(pending) if pending.state == state_name => core.duration = None,
                _ => return,
            }
            debug!("[Engine] duration elapsed in '{state_name}', advancing to '{then}'");
            if let Err(e) = enter_state(&task_inner, &mut core, &then) {
                warn!("[Engine] duration target refused: {e}");
            }
        })
        .abort_handle();

        core.duration = Some(DurationTimer {
            state: name.to_string(),
            handle,
        });
    }

    Ok(())
}

/// Resolve a state's rendering parameters and notify the sink.
///
/// Static numeric states render directly; anything with an expression or a
/// speed becomes an animation spec the sink evaluates per frame;
/// voice-reactive states pass their descriptor.
fn render(inner: &Arc<EngineInner>, state: &LightState) {
    let base = (
        fixed_or_zero(&state.r),
        fixed_or_zero(&state.g),
        fixed_or_zero(&state.b),
    );

    if let Some(vr) = &state.voice_reactive {
        if vr.enabled {
            let base = vr.color.map(|c| (c[0], c[1], c[2])).unwrap_or(base);
            inner.sink.render_voice_reactive(base, vr);
            return;
        }
    }

    if state.is_animated() {
        inner.sink.render_animation(AnimationSpec {
            r_expr: channel_expr(&state.r, "r"),
            g_expr: channel_expr(&state.g, "g"),
            b_expr: channel_expr(&state.b, "b"),
            speed_ms: state.speed.unwrap_or(inner.frame_ms),
        });
    } else {
        inner.sink.render_static(base.0, base.1, base.2);
    }
}

fn fixed_or_zero(channel: &Option<ChannelValue>) -> u8 {
    channel.as_ref().and_then(ChannelValue::as_fixed).unwrap_or(0)
}

/// Expression form of a channel for animation specs; an absent channel
/// keeps its current value.
fn channel_expr(channel: &Option<ChannelValue>, keep_current: &str) -> String {
    match channel {
        Some(ChannelValue::Fixed(n)) => n.to_string(),
        Some(ChannelValue::Expr(expr)) => expr.clone(),
        None => keep_current.to_string(),
    }
}
