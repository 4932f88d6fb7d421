//! State registry, rule store, and variable store.
//!
//! Pure bookkeeping under the mutation lane: no timers, no IO. The engine
//! facade owns timer lifecycles and calls back in here for the data.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::expr::{compile, Program};
use crate::types::{LightState, Rule, RuleCriteria, RESERVED_STATES};

/// Guard and action, compiled once at insertion.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompiledRule {
    pub condition: Option<Program>,
    pub action: Option<Program>,
}

/// The state machine's data: states, rules, variables, current state.
#[derive(Debug)]
pub(crate) struct Machine {
    states: Vec<LightState>,
    rules: Vec<Rule>,
    compiled: HashMap<u64, CompiledRule>,
    pub variables: Map<String, Value>,
    pub current: String,
    next_rule_id: u64,
}

impl Machine {
    /// A machine with the reserved states registered and `off` active.
    pub fn new() -> Self {
        Self {
            states: vec![LightState::canonical_off(), LightState::canonical_on()],
            rules: Vec::new(),
            compiled: HashMap::new(),
            variables: Map::new(),
            current: "off".to_string(),
            next_rule_id: 0,
        }
    }

    // ==================================================================
    // State registry
    // ==================================================================

    /// Upsert a state by name.
    ///
    /// Reserved names may only be "replaced" by their canonical form;
    /// `duration_ms` requires `then` (the target's existence is checked
    /// lazily, at expiry).
    pub fn add_state(&mut self, state: LightState) -> Result<(), CoreError> {
        if state.duration_ms.is_some() && state.then.is_none() {
            return Err(CoreError::IllegalOperation(format!(
                "state '{}' sets duration_ms without then",
                state.name
            )));
        }
        if RESERVED_STATES.contains(&state.name.as_str()) {
            let canonical = if state.name == "off" {
                LightState::canonical_off()
            } else {
                LightState::canonical_on()
            };
            if state != canonical {
                return Err(CoreError::IllegalOperation(format!(
                    "reserved state '{}' cannot be redefined",
                    state.name
                )));
            }
        }

        match self.states.iter_mut().find(|s| s.name == state.name) {
            Some(existing) => {
                info!("[Machine] State replaced: {}", state.name);
                *existing = state;
            }
            None => {
                info!("[Machine] State added: {}", state.name);
                self.states.push(state);
            }
        }
        Ok(())
    }

    /// Remove a state. Reserved states are undeletable.
    pub fn delete_state(&mut self, name: &str) -> Result<bool, CoreError> {
        if RESERVED_STATES.contains(&name) {
            return Err(CoreError::IllegalOperation(format!(
                "cannot delete built-in state '{name}'"
            )));
        }
        let before = self.states.len();
        self.states.retain(|s| s.name != name);
        let removed = self.states.len() != before;
        if removed {
            info!("[Machine] State deleted: {name}");
        } else {
            debug!("[Machine] State not found: {name}");
        }
        Ok(removed)
    }

    pub fn state(&self, name: &str) -> Option<&LightState> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn states(&self) -> &[LightState] {
        &self.states
    }

    // ==================================================================
    // Rule store
    // ==================================================================

    /// Insert a rule, applying the upsert identity (from, on, condition).
    ///
    /// Returns the assigned id and, when an identical-identity rule was
    /// replaced, the predecessor's id so the caller can cancel its timer
    /// before the replacement is armed.
    pub fn insert_rule(&mut self, mut rule: Rule) -> Result<(u64, Option<u64>), CoreError> {
        rule.validate()?;

        rule.id = self.next_rule_id;
        self.next_rule_id += 1;

        let compiled = self.compile_rule(&rule);
        self.compiled.insert(rule.id, compiled);

        if let Some(i) = self.rules.iter().position(|r| r.same_identity(&rule)) {
            let old_id = self.rules[i].id;
            self.compiled.remove(&old_id);
            info!("[Machine] Rule replaced: {}", rule.describe());
            let id = rule.id;
            self.rules[i] = rule;
            Ok((id, Some(old_id)))
        } else {
            info!("[Machine] Rule added: {}", rule.describe());
            let id = rule.id;
            self.rules.push(rule);
            Ok((id, None))
        }
    }

    fn compile_rule(&self, rule: &Rule) -> CompiledRule {
        let compile_field = |label: &str, source: Option<&String>| {
            source.and_then(|src| match compile(src) {
                Ok(program) => Some(program),
                Err(e) => {
                    // An uncompilable guard can never pass; an uncompilable
                    // action is a no-op. Both are reported, not fatal.
                    warn!("[Machine] {label} '{src}' failed to compile: {e}");
                    None
                }
            })
        };
        CompiledRule {
            condition: compile_field("condition", rule.condition.as_ref()),
            action: compile_field("action", rule.action.as_ref()),
        }
    }

    pub fn rule_by_id(&self, id: u64) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn compiled_for(&self, id: u64) -> Option<&CompiledRule> {
        self.compiled.get(&id)
    }

    /// Rules in insertion order (the agent's view).
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rule ids in evaluation order: priority descending, stable on
    /// insertion order, disabled rules skipped.
    pub fn evaluation_order(&self) -> Vec<u64> {
        let mut view: Vec<&Rule> = self.rules.iter().filter(|r| r.enabled).collect();
        view.sort_by(|a, b| b.priority.cmp(&a.priority));
        view.into_iter().map(|r| r.id).collect()
    }

    /// Remove a single rule by id, returning it.
    pub fn remove_rule(&mut self, id: u64) -> Option<Rule> {
        let i = self.rules.iter().position(|r| r.id == id)?;
        self.compiled.remove(&id);
        let removed = self.rules.remove(i);
        info!("[Machine] Rule removed: {}", removed.describe());
        Some(removed)
    }

    /// Remove rules matching the criteria; returns the removed rules so the
    /// caller can cancel their timers.
    pub fn remove_matching(&mut self, criteria: &RuleCriteria) -> Vec<Rule> {
        let ids: Vec<u64> = if criteria.all {
            self.rules.iter().map(|r| r.id).collect()
        } else if !criteria.indices.is_empty() {
            criteria
                .indices
                .iter()
                .filter_map(|&i| self.rules.get(i).map(|r| r.id))
                .collect()
        } else {
            self.rules
                .iter()
                .filter(|r| criteria.matches(r))
                .map(|r| r.id)
                .collect()
        };

        ids.into_iter()
            .filter_map(|id| self.remove_rule(id))
            .collect()
    }

    // ==================================================================
    // Variable store
    // ==================================================================

    pub fn set_variable(&mut self, key: &str, value: Value) {
        self.variables.insert(key.to_string(), value);
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_reserved_states_and_off_active() {
        let machine = Machine::new();
        assert_eq!(machine.current, "off");
        assert!(machine.state("off").is_some());
        assert!(machine.state("on").is_some());
    }

    #[test]
    fn reserved_states_are_undeletable() {
        let mut machine = Machine::new();
        assert!(matches!(
            machine.delete_state("off"),
            Err(CoreError::IllegalOperation(_))
        ));
        assert!(matches!(
            machine.delete_state("on"),
            Err(CoreError::IllegalOperation(_))
        ));
    }

    #[test]
    fn reserved_state_accepts_only_canonical_form() {
        let mut machine = Machine::new();
        assert!(machine.add_state(LightState::canonical_on()).is_ok());
        assert!(machine.add_state(LightState::solid("on", 1, 2, 3)).is_err());
    }

    #[test]
    fn create_then_delete_restores_registry() {
        let mut machine = Machine::new();
        let before: Vec<String> = machine.states().iter().map(|s| s.name.clone()).collect();

        machine.add_state(LightState::solid("red", 255, 0, 0)).unwrap();
        assert!(machine.state("red").is_some());
        assert!(machine.delete_state("red").unwrap());

        let after: Vec<String> = machine.states().iter().map(|s| s.name.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn duration_requires_then() {
        let mut machine = Machine::new();
        let mut state = LightState::solid("flash", 255, 255, 255);
        state.duration_ms = Some(500);
        assert!(machine.add_state(state.clone()).is_err());

        state.then = Some("off".into());
        assert!(machine.add_state(state).is_ok());
    }

    #[test]
    fn upsert_replaces_same_identity_in_place() {
        let mut machine = Machine::new();
        let (first_id, replaced) = machine
            .insert_rule(Rule::new("off", "button_click", "on"))
            .unwrap();
        assert!(replaced.is_none());

        machine
            .insert_rule(Rule::new("on", "button_click", "off"))
            .unwrap();

        // Same (from, on, condition) → replaces the first rule, in place.
        let (new_id, replaced) = machine
            .insert_rule(Rule::new("off", "button_click", "red"))
            .unwrap();
        assert_eq!(replaced, Some(first_id));
        assert_ne!(new_id, first_id);
        assert_eq!(machine.rules().len(), 2);
        assert_eq!(machine.rules()[0].to, "red");

        // No duplicate identity triples remain.
        for (i, a) in machine.rules().iter().enumerate() {
            for b in &machine.rules()[i + 1..] {
                assert!(!a.same_identity(b));
            }
        }
    }

    #[test]
    fn different_condition_is_a_different_rule() {
        let mut machine = Machine::new();
        machine
            .insert_rule(Rule::new("*", "button_click", "red"))
            .unwrap();
        machine
            .insert_rule(Rule::new("*", "button_click", "blue").with_condition("getData('n') > 0"))
            .unwrap();
        assert_eq!(machine.rules().len(), 2);
    }

    #[test]
    fn evaluation_order_is_priority_desc_stable() {
        let mut machine = Machine::new();
        let (a, _) = machine
            .insert_rule(Rule::new("*", "e", "x").with_priority(0))
            .unwrap();
        let (b, _) = machine
            .insert_rule(Rule::new("*", "e", "y").with_condition("true").with_priority(10))
            .unwrap();
        let (c, _) = machine
            .insert_rule(Rule::new("*", "e", "z").with_condition("false").with_priority(10))
            .unwrap();

        assert_eq!(machine.evaluation_order(), vec![b, c, a]);
    }

    #[test]
    fn disabled_rules_are_invisible_to_evaluation() {
        let mut machine = Machine::new();
        let mut rule = Rule::new("*", "e", "x");
        rule.enabled = false;
        let (id, _) = machine.insert_rule(rule).unwrap();

        assert!(machine.evaluation_order().is_empty());
        assert!(machine.rule_by_id(id).is_some());
    }

    #[test]
    fn remove_matching_by_criteria_and_indices() {
        let mut machine = Machine::new();
        machine.insert_rule(Rule::new("off", "button_click", "on")).unwrap();
        machine.insert_rule(Rule::new("on", "button_click", "off")).unwrap();
        machine.insert_rule(Rule::new("*", "button_hold", "off")).unwrap();

        let removed = machine.remove_matching(&RuleCriteria {
            on: Some("button_click".into()),
            ..Default::default()
        });
        assert_eq!(removed.len(), 2);
        assert_eq!(machine.rules().len(), 1);

        let removed = machine.remove_matching(&RuleCriteria {
            indices: vec![0],
            ..Default::default()
        });
        assert_eq!(removed.len(), 1);
        assert!(machine.rules().is_empty());
    }

    #[test]
    fn append_then_delete_restores_rule_list() {
        let mut machine = Machine::new();
        machine.insert_rule(Rule::new("off", "button_click", "on")).unwrap();
        let before: Vec<String> = machine.rules().iter().map(|r| r.describe()).collect();

        machine.insert_rule(Rule::new("*", "button_hold", "off")).unwrap();
        machine.remove_matching(&RuleCriteria {
            indices: vec![1],
            ..Default::default()
        });

        let after: Vec<String> = machine.rules().iter().map(|r| r.describe()).collect();
        assert_eq!(before, after);
    }
}
