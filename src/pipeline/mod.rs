//! Pipelines: named step lists the agent defines once and wires to rules.
//!
//! A pipeline chains API fetches, LLM parsing, state changes, variable
//! updates, waits, and sub-pipeline calls. The registry persists to a JSON
//! file with the same contract as the memory store.

mod executor;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub(crate) use executor::{interpolate_string, run_pipeline_steps};

/// Maximum `run` nesting. Cycles are not prevented, only bounded.
pub const MAX_CALL_DEPTH: usize = 16;

/// One pipeline step. The `do` field picks the kind; any step may carry an
/// `if` condition evaluated against the scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "camelCase")]
pub enum StepKind {
    /// Call a preset API; the raw response envelope lands under `as`.
    Fetch {
        api: String,
        #[serde(default)]
        params: Map<String, Value>,
        #[serde(rename = "as")]
        store_as: String,
    },
    /// Send interpolated input + prompt to the LLM parser; response string
    /// lands under `as`.
    Llm {
        input: String,
        prompt: String,
        #[serde(rename = "as")]
        store_as: String,
    },
    /// Transition directly, either to a fixed state or through a
    /// scope-value → state-name map (case-sensitive; no-op on a miss).
    SetState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<HashMap<String, String>>,
    },
    /// Store an interpolated value in the scope and the variable store.
    SetVar { key: String, value: Value },
    Wait { ms: u64 },
    /// Invoke another pipeline synchronously in the same scope.
    Run { pipeline: String },
}

impl StepKind {
    /// Step name for diagnostics and reports.
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Fetch { .. } => "fetch",
            StepKind::Llm { .. } => "llm",
            StepKind::SetState { .. } => "setState",
            StepKind::SetVar { .. } => "setVar",
            StepKind::Wait { .. } => "wait",
            StepKind::Run { .. } => "run",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub description: String,
}

/// Outcome of one step, kept in the pipeline result for the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: &'static str,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum StepStatus {
    Completed,
    /// `if` condition was falsy.
    Skipped,
    Failed(String),
}

/// Result of a pipeline invocation: overall success, the final scope
/// snapshot, and per-step diagnostics (including nested `run` steps).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub scope: Map<String, Value>,
    pub steps: Vec<StepReport>,
}

/// Named pipeline storage with JSON persistence.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    path: Option<PathBuf>,
    pipelines: HashMap<String, Pipeline>,
}

impl PipelineRegistry {
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Load from `path`, starting empty if missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pipelines = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, Pipeline>>(&text) {
                Ok(map) => {
                    debug!(
                        "[Pipelines] Loaded {} from {}",
                        map.len(),
                        path.display()
                    );
                    map
                }
                Err(e) => {
                    warn!(
                        "[Pipelines] {} failed to parse ({e}), starting empty",
                        path.display()
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            pipelines,
        }
    }

    pub fn register(&mut self, pipeline: Pipeline) {
        info!(
            "[Pipelines] Registered '{}' ({} steps)",
            pipeline.name,
            pipeline.steps.len()
        );
        self.pipelines.insert(pipeline.name.clone(), pipeline);
        self.save();
    }

    pub fn get(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        let removed = self.pipelines.remove(name).is_some();
        if removed {
            self.save();
        }
        removed
    }

    /// Name, description, and step count per pipeline (agent view).
    pub fn summaries(&self) -> Vec<Value> {
        let mut entries: Vec<&Pipeline> = self.pipelines.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
            .into_iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "description": p.description,
                    "steps": p.steps.len(),
                })
            })
            .collect()
    }

    fn save(&self) {
        let Some(path) = &self.path else { return };
        let value = serde_json::to_value(&self.pipelines).unwrap_or_default();
        if let Err(e) = crate::memory::write_json_atomic(path, &value) {
            warn!("[Pipelines] Failed to save {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_deserialize_from_agent_json() {
        let pipeline: Pipeline = serde_json::from_value(serde_json::json!({
            "name": "morning",
            "description": "weather-driven wakeup",
            "steps": [
                {"do": "fetch", "api": "weather", "params": {"location": "Oslo"}, "as": "wx"},
                {"do": "llm", "input": "{{wx}}", "prompt": "up or down?", "as": "dir"},
                {"do": "setState", "from": "dir", "map": {"up": "green", "down": "red"}},
                {"do": "setVar", "key": "last_run", "value": "{{dir}}"},
                {"do": "wait", "ms": 250, "if": "dir == 'up'"},
                {"do": "run", "pipeline": "cleanup"},
            ],
        }))
        .unwrap();

        assert_eq!(pipeline.steps.len(), 6);
        assert_eq!(pipeline.steps[0].kind.name(), "fetch");
        assert_eq!(pipeline.steps[4].condition.as_deref(), Some("dir == 'up'"));
        match &pipeline.steps[2].kind {
            StepKind::SetState { state, from, map } => {
                assert!(state.is_none());
                assert_eq!(from.as_deref(), Some("dir"));
                assert_eq!(map.as_ref().unwrap()["up"], "green");
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn registry_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.json");

        let mut registry = PipelineRegistry::load(&path);
        registry.register(Pipeline {
            name: "p".into(),
            steps: vec![Step {
                kind: StepKind::Wait { ms: 10 },
                condition: None,
            }],
            description: "test".into(),
        });

        let reloaded = PipelineRegistry::load(&path);
        assert_eq!(reloaded.get("p").unwrap().steps.len(), 1);
        assert_eq!(reloaded.summaries().len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut registry = PipelineRegistry::ephemeral();
        registry.register(Pipeline {
            name: "p".into(),
            steps: vec![],
            description: String::new(),
        });
        assert!(registry.delete("p"));
        assert!(!registry.delete("p"));
    }
}
