//! Pattern library: canonical rule templates served by `getPattern`.
//!
//! Each entry carries a description, when-to-use hints, the template with
//! its placeholder variables, and a worked example the agent can adapt
//! instead of deriving counter-style rule stacks from scratch.

use serde_json::{json, Value};

pub const PATTERN_NAMES: [&str; 7] = [
    "counter",
    "toggle",
    "cycle",
    "hold_release",
    "timer",
    "schedule",
    "data_reactive",
];

/// Look up a pattern template by name.
pub fn pattern(name: &str) -> Option<Value> {
    let value = match name {
        "counter" => json!({
            "name": "counter",
            "description": "Temporary behavior that reverts after N occurrences",
            "when_to_use": ["next N clicks", "for N times", "then back to normal"],
            "template": {
                "variables": ["N", "temp_state", "return_state", "transition"],
                "rules": [
                    {
                        "description": "Entry rule - start counting",
                        "from": "*", "on": "{transition}", "to": "{temp_state}",
                        "condition": "getData('counter') == null",
                        "action": "setData('counter', {N} - 1)",
                    },
                    {
                        "description": "Continue rule - decrement counter",
                        "from": "{temp_state}", "on": "{transition}", "to": "{temp_state}",
                        "condition": "getData('counter') > 0",
                        "action": "setData('counter', getData('counter') - 1)",
                    },
                    {
                        "description": "Exit rule - return to normal",
                        "from": "{temp_state}", "on": "{transition}", "to": "{return_state}",
                        "condition": "getData('counter') == 0",
                        "action": "setData('counter', null)",
                    },
                ],
            },
            "example": {
                "user_request": "Next 3 clicks give me random colors, then back to normal",
                "createState": {
                    "name": "random_color",
                    "r": "random()", "g": "random()", "b": "random()",
                    "description": "Random color on each entry",
                },
                "appendRules": [
                    {"from": "*", "on": "button_click", "to": "random_color",
                     "condition": "getData('counter') == null",
                     "action": "setData('counter', 2)"},
                    {"from": "random_color", "on": "button_click", "to": "random_color",
                     "condition": "getData('counter') > 0",
                     "action": "setData('counter', getData('counter') - 1)"},
                    {"from": "random_color", "on": "button_click", "to": "off",
                     "condition": "getData('counter') == 0",
                     "action": "setData('counter', null)"},
                ],
            },
        }),

        "toggle" => json!({
            "name": "toggle",
            "description": "Simple A-to-B state switching",
            "when_to_use": ["toggle", "switch between", "on/off", "alternate"],
            "template": {
                "variables": ["state_a", "state_b", "transition"],
                "rules": [
                    {"from": "{state_a}", "on": "{transition}", "to": "{state_b}"},
                    {"from": "{state_b}", "on": "{transition}", "to": "{state_a}"},
                ],
            },
            "example": {
                "user_request": "Click toggles between red and blue",
                "appendRules": [
                    {"from": "red", "on": "button_click", "to": "blue"},
                    {"from": "blue", "on": "button_click", "to": "red"},
                ],
            },
        }),

        "cycle" => json!({
            "name": "cycle",
            "description": "Rotate through multiple states in order",
            "when_to_use": ["cycle through", "rotate", "next color each click"],
            "template": {
                "variables": ["states (ordered)", "transition"],
                "rules": [
                    {"from": "{state_1}", "on": "{transition}", "to": "{state_2}"},
                    {"from": "{state_2}", "on": "{transition}", "to": "{state_3}"},
                    {"from": "{state_n}", "on": "{transition}", "to": "{state_1}"},
                ],
            },
            "example": {
                "user_request": "Cycle red, green, blue on each click",
                "appendRules": [
                    {"from": "red", "on": "button_click", "to": "green"},
                    {"from": "green", "on": "button_click", "to": "blue"},
                    {"from": "blue", "on": "button_click", "to": "red"},
                ],
            },
        }),

        "hold_release" => json!({
            "name": "hold_release",
            "description": "Hold to activate, release to deactivate",
            "when_to_use": ["while holding", "hold the button", "momentary"],
            "template": {
                "variables": ["active_state", "idle_state"],
                "rules": [
                    {"from": "*", "on": "button_hold", "to": "{active_state}"},
                    {"from": "{active_state}", "on": "button_release", "to": "{idle_state}"},
                ],
            },
            "example": {
                "user_request": "Bright white while I hold the button",
                "appendRules": [
                    {"from": "*", "on": "button_hold", "to": "bright_white"},
                    {"from": "bright_white", "on": "button_release", "to": "off"},
                ],
            },
        }),

        "timer" => json!({
            "name": "timer",
            "description": "Delayed one-shot state change",
            "when_to_use": ["in N minutes", "after a while", "turn off later"],
            "template": {
                "variables": ["delay_ms", "target_state"],
                "rules": [
                    {"from": "*", "on": "timer", "to": "{target_state}",
                     "trigger_config": {"delay_ms": "{delay_ms}", "auto_cleanup": true}},
                ],
            },
            "example": {
                "user_request": "Turn off in 10 minutes",
                "appendRules": [
                    {"from": "*", "on": "timer", "to": "off",
                     "trigger_config": {"delay_ms": 600000, "auto_cleanup": true}},
                ],
            },
        }),

        "schedule" => json!({
            "name": "schedule",
            "description": "Fire at a wall-clock time of day",
            "when_to_use": ["at 7am", "every morning", "bedtime"],
            "template": {
                "variables": ["hour", "minute", "repeat_daily", "target_state"],
                "rules": [
                    {"from": "*", "on": "schedule", "to": "{target_state}",
                     "trigger_config": {"hour": "{hour}", "minute": "{minute}",
                                        "repeat_daily": "{repeat_daily}"}},
                ],
            },
            "example": {
                "user_request": "Warm light every evening at 21:30",
                "appendRules": [
                    {"from": "*", "on": "schedule", "to": "warm",
                     "trigger_config": {"hour": 21, "minute": 30, "repeat_daily": true}},
                ],
            },
        }),

        "data_reactive" => json!({
            "name": "data_reactive",
            "description": "React to periodically fetched external data",
            "when_to_use": ["when it rains", "stock goes up", "based on weather"],
            "template": {
                "variables": ["source_name", "interval_ms", "fetch_tool", "store_mapping",
                              "event", "reaction_rules"],
                "steps": [
                    "createDataSource polling {fetch_tool} every {interval_ms}, storing {store_mapping}, firing {event}",
                    "appendRules reacting to {event} with conditions on the stored variables",
                ],
            },
            "example": {
                "user_request": "Blue when it's cold out",
                "createDataSource": {
                    "name": "weather", "interval_ms": 600000,
                    "fetch": {"tool": "get_weather", "args": {"location": "Oslo"}},
                    "store": {"temperature": "result.temp_f"},
                    "fires": "weather_updated",
                },
                "appendRules": [
                    {"from": "*", "on": "weather_updated", "to": "cold_blue",
                     "condition": "getData('temperature') < 40"},
                ],
            },
        }),

        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_pattern_resolves() {
        for name in PATTERN_NAMES {
            let entry = pattern(name).unwrap_or_else(|| panic!("missing pattern {name}"));
            assert_eq!(entry["name"], name);
            assert!(entry["description"].is_string());
        }
        assert!(pattern("nope").is_none());
    }

    #[test]
    fn counter_template_matches_the_canonical_shape() {
        let counter = pattern("counter").unwrap();
        let rules = counter["template"]["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0]["condition"], "getData('counter') == null");
        assert_eq!(rules[2]["action"], "setData('counter', null)");
    }
}
