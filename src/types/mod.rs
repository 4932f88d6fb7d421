//! Shared data model for the behavior engine.
//!
//! Everything the agent reads or writes over the tool surface is defined
//! here: light states, transition rules, trigger configs, and the canonical
//! event names.

mod rule;
mod state;

pub use rule::{Rule, RuleCriteria, TriggerConfig};
pub use state::{ChannelValue, LightState, VoiceReactive};

/// Canonical event names.
///
/// The event set is open — data sources fire user-defined names — but the
/// four button events and `voice_command` are wired to hardware ingress.
pub mod events {
    pub const BUTTON_CLICK: &str = "button_click";
    pub const BUTTON_DOUBLE_CLICK: &str = "button_double_click";
    pub const BUTTON_HOLD: &str = "button_hold";
    pub const BUTTON_RELEASE: &str = "button_release";
    pub const VOICE_COMMAND: &str = "voice_command";

    /// Time-based trigger tokens. Rules carrying one of these in `on` are
    /// armed by the scheduler rather than delivered from hardware.
    pub const TIMER: &str = "timer";
    pub const INTERVAL: &str = "interval";
    pub const SCHEDULE: &str = "schedule";

    /// True when `on` names a scheduler-armed trigger.
    pub fn is_time_based(on: &str) -> bool {
        matches!(on, TIMER | INTERVAL | SCHEDULE)
    }
}

/// Reserved state names. Undeletable, replaceable only by their canonical form.
pub const RESERVED_STATES: [&str; 2] = ["off", "on"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_based_tokens() {
        assert!(events::is_time_based("timer"));
        assert!(events::is_time_based("interval"));
        assert!(events::is_time_based("schedule"));
        assert!(!events::is_time_based("button_click"));
        assert!(!events::is_time_based("weather_updated"));
    }
}
