//! Post-agent safety pass.
//!
//! After the agent signals `done`, every non-`off` state must have at least
//! one rule leaving it, or a button press could strand the user in a state
//! with no exit. States with no rule naming them in `from` get a generated
//! `button_click --> off` exit at priority 0. Running the pass twice is a
//! no-op the second time.

use std::collections::HashSet;

use tracing::warn;

use crate::types::{events, Rule};

use super::Core;

/// Add exit rules for uncovered states; returns descriptions of what was
/// added.
pub(crate) fn safety_pass(core: &mut Core) -> Vec<String> {
    let covered: HashSet<String> = core
        .machine
        .rules()
        .iter()
        .map(|r| r.from.clone())
        .collect();

    let uncovered: Vec<String> = core
        .machine
        .states()
        .iter()
        .filter(|s| s.name != "off" && !covered.contains(&s.name))
        .map(|s| s.name.clone())
        .collect();

    let mut added = Vec::new();
    for name in uncovered {
        let rule = Rule::new(&name, events::BUTTON_CLICK, "off");
        let description = rule.describe();
        // Cannot fail: no trigger config to validate.
        if core.machine.insert_rule(rule).is_ok() {
            warn!("[Safety] Auto-added exit rule: {description}");
            added.push(description);
        }
    }
    added
}
