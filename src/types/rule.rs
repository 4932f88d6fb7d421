//! Transition rules.
//!
//! A rule reads `from --[on]--> to`, optionally guarded by a condition
//! expression and carrying an action expression that runs before the
//! transition. `from` accepts the wildcard `*` and the prefix form
//! `prefix/*`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

use super::events;

/// Timing configuration for time-based rules (`on` ∈ {timer, interval,
/// schedule}). Fields are validated per kind at insertion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// timer/interval: delay between fires, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// timer: remove the rule after its first fire attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cleanup: Option<bool>,
    /// interval: keep re-arming while true (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<bool>,
    /// schedule: target hour [0,23].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    /// schedule: target minute [0,59].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    /// schedule: re-arm for the next day after firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_daily: Option<bool>,
}

impl TriggerConfig {
    /// Validate the fields required for the given trigger token.
    pub fn validate_for(&self, on: &str) -> Result<(), CoreError> {
        match on {
            events::TIMER | events::INTERVAL => {
                if self.delay_ms.is_none() {
                    return Err(CoreError::IllegalOperation(format!(
                        "{on} rules require trigger_config.delay_ms"
                    )));
                }
            }
            events::SCHEDULE => {
                let hour = self.hour.ok_or_else(|| {
                    CoreError::IllegalOperation("schedule rules require trigger_config.hour".into())
                })?;
                let minute = self.minute.ok_or_else(|| {
                    CoreError::IllegalOperation(
                        "schedule rules require trigger_config.minute".into(),
                    )
                })?;
                if hour > 23 || minute > 59 {
                    return Err(CoreError::IllegalOperation(format!(
                        "schedule time {hour:02}:{minute:02} out of range"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

/// A prioritised transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Assigned at insertion, monotonically increasing. Timers are keyed by
    /// this id.
    #[serde(default)]
    pub id: u64,
    #[serde(alias = "state1")]
    pub from: String,
    #[serde(alias = "transition")]
    pub on: String,
    #[serde(alias = "state2")]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Higher fires first; ties break on insertion order.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_config: Option<TriggerConfig>,
    /// Pipeline to run when this rule fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// A bare `from --[on]--> to` rule with defaults everywhere else.
    pub fn new(from: &str, on: &str, to: &str) -> Self {
        Self {
            id: 0,
            from: from.to_string(),
            on: on.to_string(),
            to: to.to_string(),
            condition: None,
            action: None,
            priority: 0,
            enabled: true,
            trigger_config: None,
            pipeline: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Upsert identity: two rules with the same (from, on, condition) are
    /// the same rule. Including the condition preserves temporary layered
    /// rules (counter patterns) alongside defaults with the same (from, on).
    pub fn same_identity(&self, other: &Rule) -> bool {
        self.from == other.from && self.on == other.on && self.condition == other.condition
    }

    /// Whether `from` matches the given current state.
    ///
    /// The single wildcard-aware matcher, used by ordinary event delivery
    /// and by scheduler-targeted firing alike: exact equality, `*`, or a
    /// `prefix/*` form that matches `prefix/<anything>` but never `prefix`
    /// itself.
    pub fn matches_state(&self, current: &str) -> bool {
        if self.from == "*" || self.from == current {
            return true;
        }
        if let Some(prefix) = self.from.strip_suffix("/*") {
            return current.len() > prefix.len() + 1
                && current.starts_with(prefix)
                && current.as_bytes()[prefix.len()] == b'/';
        }
        false
    }

    /// Validate the rule for insertion: time-based rules need a config.
    pub fn validate(&self) -> Result<(), CoreError> {
        if events::is_time_based(&self.on) {
            let config = self.trigger_config.as_ref().ok_or_else(|| {
                CoreError::IllegalOperation(format!(
                    "rule '{}' needs trigger_config for on={}",
                    self.describe(),
                    self.on
                ))
            })?;
            config.validate_for(&self.on)?;
        }
        Ok(())
    }

    /// `from --[on]--> to` with the optional guard/action, for logs.
    pub fn describe(&self) -> String {
        let mut out = format!("{} --[{}]--> {}", self.from, self.on, self.to);
        if let Some(condition) = &self.condition {
            out.push_str(&format!(" (if: {condition})"));
        }
        if let Some(action) = &self.action {
            out.push_str(&format!(" (do: {action})"));
        }
        out
    }
}

/// Criteria for bulk rule deletion over the tool surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleCriteria {
    /// Delete everything (and cancel every timer).
    #[serde(default)]
    pub all: bool,
    /// Delete by position in insertion order.
    #[serde(default)]
    pub indices: Vec<usize>,
    #[serde(default, alias = "transition", skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    #[serde(default, alias = "from_state", skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, alias = "to_state", skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl RuleCriteria {
    /// Field-by-field match against a rule (exact, no wildcard expansion).
    pub fn matches(&self, rule: &Rule) -> bool {
        if let Some(on) = &self.on {
            if &rule.on != on {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if &rule.from != from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &rule.to != to {
                return false;
            }
        }
        true
    }
}
