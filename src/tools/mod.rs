//! Tool surface exposed to the agent.
//!
//! The registry is the only legal way for the agent to reconfigure the
//! engine: every handler parses its JSON input, calls the engine, and
//! answers with a `{"success": …}` envelope (or `{"error": …}` for
//! malformed input). The outer agent loop watches for the `done` result
//! and for pending `askUser` questions; the registry itself never blocks
//! on the user.

pub mod custom;
pub mod patterns;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::engine::Engine;
use crate::pipeline::Pipeline;
use crate::scheduler::DataSource;
use crate::types::{LightState, Rule, RuleCriteria};

use custom::CustomTool;

/// Reference document served section-by-section through `getDocs`.
const AGENT_REFERENCE: &str = include_str!("../../docs/AGENT_REFERENCE.md");

/// Maximum characters returned per docs section.
const DOCS_SECTION_LIMIT: usize = 3000;

/// A tool definition in the shape agent frameworks expect.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Dispatches agent tool calls onto an engine.
#[derive(Clone)]
pub struct ToolRegistry {
    engine: Engine,
}

impl ToolRegistry {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Execute one tool call. Unknown tools and malformed input come back
    /// as `{"error": …}` so the agent can repair and retry.
    pub async fn execute(&self, name: &str, input: Value) -> Value {
        match name {
            "getPattern" => self.get_pattern(input),
            "getStates" => self.get_states().await,
            "getRules" => self.get_rules().await,
            "getVariables" => self.get_variables().await,
            "listAPIs" => list_apis(),
            "listMemory" => self.list_memory().await,
            "listPipelines" => self.list_pipelines().await,
            "getDocs" => get_docs(input),
            "createState" => self.create_state(input).await,
            "deleteState" => self.delete_state(input).await,
            "setState" => self.set_state(input).await,
            "appendRules" => self.append_rules(input).await,
            "deleteRules" => self.delete_rules(input).await,
            "setVariable" => self.set_variable(input).await,
            "fetchAPI" => self.fetch_api(input).await,
            "defineTool" => self.define_tool(input).await,
            "callTool" => self.call_tool(input).await,
            "createDataSource" => self.create_data_source(input).await,
            "triggerDataSource" => self.trigger_data_source(input).await,
            "remember" => self.remember(input).await,
            "recall" => self.recall(input).await,
            "forgetMemory" => self.forget_memory(input).await,
            "definePipeline" => self.define_pipeline(input).await,
            "runPipeline" => self.run_pipeline(input).await,
            "deletePipeline" => self.delete_pipeline(input).await,
            "askUser" => self.ask_user(input).await,
            "done" => done(input),
            other => json!({"error": format!("Unknown tool: {other}")}),
        }
    }

    /// Post-agent safety pass: every non-`off` state gets an exit rule.
    pub async fn run_safety_pass(&self) -> Value {
        let added = self.engine.safety_pass().await;
        json!({"success": true, "rules_added": added.len(), "auto_added_rules": added})
    }

    // ==================================================================
    // Information
    // ==================================================================

    fn get_pattern(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        match patterns::pattern(name) {
            Some(pattern) => json!({"success": true, "pattern": pattern}),
            None => json!({
                "success": false,
                "error": format!("Pattern '{name}' not found"),
                "available_patterns": patterns::PATTERN_NAMES,
            }),
        }
    }

    async fn get_states(&self) -> Value {
        let states: Vec<Value> = self
            .engine
            .states()
            .await
            .iter()
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
            .collect();
        json!({
            "success": true,
            "states": states,
            "current_state": self.engine.current_state().await,
        })
    }

    async fn get_rules(&self) -> Value {
        let rules: Vec<Value> = self
            .engine
            .rules()
            .await
            .iter()
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
            .collect();
        json!({"success": true, "rules": rules})
    }

    async fn get_variables(&self) -> Value {
        json!({"success": true, "variables": self.engine.variables().await})
    }

    async fn list_memory(&self) -> Value {
        let memories = self.engine.list_memory().await;
        json!({"success": true, "count": memories.len(), "memories": memories})
    }

    async fn list_pipelines(&self) -> Value {
        let pipelines = self.engine.pipeline_summaries().await;
        json!({"success": true, "count": pipelines.len(), "pipelines": pipelines})
    }

    // ==================================================================
    // States
    // ==================================================================

    async fn create_state(&self, input: Value) -> Value {
        let state: LightState = match serde_json::from_value(input) {
            Ok(state) => state,
            Err(e) => return json!({"error": format!("Invalid state: {e}")}),
        };
        let name = state.name.clone();
        match self.engine.create_state(state).await {
            Ok(()) => json!({"success": true, "state": name}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn delete_state(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        match self.engine.delete_state(name).await {
            Ok(deleted) => json!({"success": deleted, "deleted": name}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn set_state(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        match self.engine.set_state(name).await {
            Ok(()) => json!({"success": true, "current_state": name}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    // ==================================================================
    // Rules
    // ==================================================================

    async fn append_rules(&self, input: Value) -> Value {
        let rules: Vec<Rule> = match serde_json::from_value(input["rules"].clone()) {
            Ok(rules) => rules,
            Err(e) => return json!({"error": format!("Invalid rules: {e}")}),
        };
        let described: Vec<String> = rules.iter().map(Rule::describe).collect();
        match self.engine.append_rules(rules).await {
            Ok(ids) => json!({
                "success": true,
                "rules_added": ids.len(),
                "rules": described,
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn delete_rules(&self, input: Value) -> Value {
        let criteria: RuleCriteria = match serde_json::from_value(input) {
            Ok(criteria) => criteria,
            Err(e) => return json!({"error": format!("Invalid criteria: {e}")}),
        };
        let deleted = self.engine.delete_rules(&criteria).await;
        json!({"success": true, "deleted": deleted})
    }

    // ==================================================================
    // Variables
    // ==================================================================

    async fn set_variable(&self, input: Value) -> Value {
        let Some(key) = input["key"].as_str() else {
            return missing_field("key");
        };
        let value = input.get("value").cloned().unwrap_or(Value::Null);
        self.engine.set_variable(key, value.clone()).await;
        json!({"success": true, "key": key, "value": value})
    }

    // ==================================================================
    // External data
    // ==================================================================

    async fn fetch_api(&self, input: Value) -> Value {
        let Some(api) = input["api"].as_str() else {
            return missing_field("api");
        };
        let params = input["params"].as_object().cloned().unwrap_or_default();
        self.engine.fetch_api(api, &params).await
    }

    async fn define_tool(&self, input: Value) -> Value {
        let tool: CustomTool = match serde_json::from_value(input) {
            Ok(tool) => tool,
            Err(e) => return json!({"error": format!("Invalid tool: {e}")}),
        };
        let name = tool.name.clone();
        match self.engine.define_tool(tool).await {
            Ok(()) => json!({
                "success": true,
                "tool": name,
                "message": format!("Tool '{name}' defined"),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn call_tool(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        let args = input["args"].as_object().cloned().unwrap_or_default();
        match self.engine.call_tool(name, args).await {
            Ok(result) => json!({"success": true, "result": result}),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    async fn create_data_source(&self, input: Value) -> Value {
        #[derive(Deserialize)]
        struct FetchSpec {
            tool: String,
            #[serde(default)]
            args: Map<String, Value>,
        }
        #[derive(Deserialize)]
        struct SourceSpec {
            name: String,
            #[serde(default = "default_interval")]
            interval_ms: u64,
            fetch: FetchSpec,
            #[serde(default)]
            store: std::collections::HashMap<String, String>,
            fires: String,
        }
        fn default_interval() -> u64 {
            60_000
        }

        let spec: SourceSpec = match serde_json::from_value(input) {
            Ok(spec) => spec,
            Err(e) => return json!({"error": format!("Invalid data source: {e}")}),
        };

        let mut source = DataSource::new(
            &spec.name,
            spec.interval_ms,
            &spec.fetch.tool,
            &spec.fires,
        )
        .with_args(spec.fetch.args);
        source.store_mapping = spec.store;

        match self.engine.create_data_source(source).await {
            Ok(()) => json!({
                "success": true,
                "data_source": spec.name,
                "message": format!(
                    "Data source '{}' created (polling every {}ms, fires '{}')",
                    spec.name, spec.interval_ms, spec.fires
                ),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }

    async fn trigger_data_source(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        match self.engine.trigger_data_source(name).await {
            Ok(result) => json!({"success": true, "result": result}),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    // ==================================================================
    // Memory
    // ==================================================================

    async fn remember(&self, input: Value) -> Value {
        let Some(key) = input["key"].as_str() else {
            return missing_field("key");
        };
        let value = input.get("value").cloned().unwrap_or(Value::Null);
        self.engine.remember(key, value.clone()).await;
        json!({"success": true, "key": key, "value": value})
    }

    async fn recall(&self, input: Value) -> Value {
        let Some(key) = input["key"].as_str() else {
            return missing_field("key");
        };
        match self.engine.recall(key).await {
            Some(value) => json!({"success": true, "key": key, "value": value}),
            None => json!({"success": true, "key": key, "value": null, "message": "Not found"}),
        }
    }

    async fn forget_memory(&self, input: Value) -> Value {
        let Some(key) = input["key"].as_str() else {
            return missing_field("key");
        };
        let deleted = self.engine.forget_memory(key).await;
        json!({"success": true, "deleted": deleted, "key": key})
    }

    // ==================================================================
    // Pipelines
    // ==================================================================

    async fn define_pipeline(&self, input: Value) -> Value {
        let pipeline: Pipeline = match serde_json::from_value(input) {
            Ok(pipeline) => pipeline,
            Err(e) => return json!({"error": format!("Invalid pipeline: {e}")}),
        };
        let name = pipeline.name.clone();
        let steps = pipeline.steps.len();
        self.engine.define_pipeline(pipeline).await;
        json!({
            "success": true,
            "pipeline": name,
            "steps": steps,
            "message": format!("Pipeline '{name}' defined with {steps} steps"),
        })
    }

    async fn run_pipeline(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        match self.engine.run_pipeline(name).await {
            Ok(result) => serde_json::to_value(&result).unwrap_or(Value::Null),
            Err(e) => json!({"success": false, "error": e.to_string()}),
        }
    }

    async fn delete_pipeline(&self, input: Value) -> Value {
        let Some(name) = input["name"].as_str() else {
            return missing_field("name");
        };
        let deleted = self.engine.delete_pipeline(name).await;
        json!({"success": deleted, "pipeline": name})
    }

    // ==================================================================
    // Interaction & completion
    // ==================================================================

    async fn ask_user(&self, input: Value) -> Value {
        let Some(question) = input["question"].as_str() else {
            return missing_field("question");
        };
        self.engine.set_pending_question(question).await;
        json!({
            "waiting_for_user": true,
            "question": question,
            "message": format!("Asking user: {question}"),
        })
    }
}

fn done(input: Value) -> Value {
    json!({"done": true, "message": input["message"].as_str().unwrap_or("")})
}

fn list_apis() -> Value {
    let catalog = crate::apis::catalog();
    let count = catalog.as_array().map(Vec::len).unwrap_or(0);
    json!({"success": true, "count": count, "apis": catalog})
}

fn get_docs(input: Value) -> Value {
    let topic = input["topic"].as_str().unwrap_or("").to_lowercase();
    let available: Vec<&str> = AGENT_REFERENCE
        .lines()
        .filter_map(|line| line.strip_prefix("# SECTION: "))
        .map(str::trim)
        .collect();

    let marker = format!("# SECTION: {topic}");
    let Some(start) = AGENT_REFERENCE
        .lines()
        .position(|line| line.trim().eq_ignore_ascii_case(&marker))
    else {
        return json!({
            "success": false,
            "error": format!("Topic '{topic}' not found"),
            "available_topics": available,
        });
    };

    let lines: Vec<&str> = AGENT_REFERENCE.lines().collect();
    let body: Vec<&str> = lines[start + 1..]
        .iter()
        .take_while(|line| !line.starts_with("# SECTION:"))
        .copied()
        .collect();
    let mut content = body.join("\n").trim().to_string();
    if content.len() > DOCS_SECTION_LIMIT {
        content.truncate(DOCS_SECTION_LIMIT);
        content.push_str("\n\n... (truncated, use specific sub-topics for more detail)");
    }

    json!({"success": true, "topic": topic, "content": content})
}

fn missing_field(field: &str) -> Value {
    json!({"error": format!("Missing required field '{field}'")})
}

/// Definitions for every tool, in the shape agent frameworks consume.
pub fn definitions() -> Vec<ToolDefinition> {
    fn schema(properties: Value, required: &[&str]) -> Value {
        json!({"type": "object", "properties": properties, "required": required})
    }
    let empty = || schema(json!({}), &[]);

    vec![
        ToolDefinition {
            name: "getPattern",
            description: "Look up a rule template. Patterns: counter, toggle, cycle, hold_release, timer, schedule, data_reactive",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "getStates",
            description: "List all states and the current state",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "getRules",
            description: "List all rules in insertion order",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "getVariables",
            description: "Snapshot of the variable store",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "listAPIs",
            description: "List the preset APIs with params and example responses",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "listMemory",
            description: "List all persistent memories",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "listPipelines",
            description: "List defined pipelines",
            input_schema: empty(),
        },
        ToolDefinition {
            name: "getDocs",
            description: "Read a reference section. Topics: states, rules, expressions, pipelines, data_sources, memory",
            input_schema: schema(json!({"topic": {"type": "string"}}), &["topic"]),
        },
        ToolDefinition {
            name: "createState",
            description: "Create or replace a state. Channels take 0-255 numbers or expressions; speed animates; duration_ms + then auto-advances",
            input_schema: schema(
                json!({
                    "name": {"type": "string", "description": "State name"},
                    "r": {}, "g": {}, "b": {},
                    "speed": {"type": "integer"},
                    "duration_ms": {"type": "integer"},
                    "then": {"type": "string"},
                    "voice_reactive": {"type": "object"},
                    "description": {"type": "string"},
                }),
                &["name"],
            ),
        },
        ToolDefinition {
            name: "deleteState",
            description: "Delete a state ('off' and 'on' are protected)",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "setState",
            description: "Switch to a state immediately, without rule evaluation",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "appendRules",
            description: "Add transition rules. Same (from, on, condition) replaces the prior rule",
            input_schema: schema(json!({"rules": {"type": "array"}}), &["rules"]),
        },
        ToolDefinition {
            name: "deleteRules",
            description: "Delete rules by {all}, {indices}, or field criteria {on, from, to}",
            input_schema: schema(
                json!({
                    "all": {"type": "boolean"},
                    "indices": {"type": "array"},
                    "on": {"type": "string"},
                    "from": {"type": "string"},
                    "to": {"type": "string"},
                }),
                &[],
            ),
        },
        ToolDefinition {
            name: "setVariable",
            description: "Store a value in the variable store (read by getData in conditions)",
            input_schema: schema(json!({"key": {"type": "string"}, "value": {}}), &["key", "value"]),
        },
        ToolDefinition {
            name: "fetchAPI",
            description: "Execute a preset API and return its raw data",
            input_schema: schema(
                json!({"api": {"type": "string"}, "params": {"type": "object"}}),
                &["api"],
            ),
        },
        ToolDefinition {
            name: "defineTool",
            description: "Define a custom tool: a sandbox expression over `args`, or an http(s) URL template fetched as JSON",
            input_schema: schema(
                json!({
                    "name": {"type": "string"},
                    "code": {"type": "string"},
                    "description": {"type": "string"},
                    "params": {"type": "object"},
                    "returns": {"type": "object"},
                }),
                &["name", "code"],
            ),
        },
        ToolDefinition {
            name: "callTool",
            description: "Execute a custom tool immediately",
            input_schema: schema(
                json!({"name": {"type": "string"}, "args": {"type": "object"}}),
                &["name"],
            ),
        },
        ToolDefinition {
            name: "createDataSource",
            description: "Register a periodic poller: calls a tool, stores mapped result paths as variables, fires an event",
            input_schema: schema(
                json!({
                    "name": {"type": "string"},
                    "interval_ms": {"type": "integer"},
                    "fetch": {"type": "object", "description": "{tool, args}"},
                    "store": {"type": "object", "description": "{variable: 'result.path'}"},
                    "fires": {"type": "string"},
                }),
                &["name", "fetch", "fires"],
            ),
        },
        ToolDefinition {
            name: "triggerDataSource",
            description: "Run one data source cycle immediately",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "remember",
            description: "Store a value in persistent memory",
            input_schema: schema(json!({"key": {"type": "string"}, "value": {}}), &["key", "value"]),
        },
        ToolDefinition {
            name: "recall",
            description: "Retrieve a value from persistent memory",
            input_schema: schema(json!({"key": {"type": "string"}}), &["key"]),
        },
        ToolDefinition {
            name: "forgetMemory",
            description: "Delete a value from persistent memory",
            input_schema: schema(json!({"key": {"type": "string"}}), &["key"]),
        },
        ToolDefinition {
            name: "definePipeline",
            description: "Define a named pipeline of fetch/llm/setState/setVar/wait/run steps",
            input_schema: schema(
                json!({
                    "name": {"type": "string"},
                    "steps": {"type": "array"},
                    "description": {"type": "string"},
                }),
                &["name", "steps"],
            ),
        },
        ToolDefinition {
            name: "runPipeline",
            description: "Execute a pipeline now",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "deletePipeline",
            description: "Delete a pipeline",
            input_schema: schema(json!({"name": {"type": "string"}}), &["name"]),
        },
        ToolDefinition {
            name: "askUser",
            description: "Ask the user a clarifying question (read by the outer loop; does not block)",
            input_schema: schema(json!({"question": {"type": "string"}}), &["question"]),
        },
        ToolDefinition {
            name: "done",
            description: "End the turn with a short human-facing message",
            input_schema: schema(json!({"message": {"type": "string"}}), &["message"]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_unique_and_schemaed() {
        let definitions = definitions();
        let mut names: Vec<&str> = definitions.iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), definitions.len(), "duplicate tool names");
        for definition in &definitions {
            assert_eq!(definition.input_schema["type"], "object");
        }
    }

    #[test]
    fn docs_lookup_finds_sections_and_lists_topics_on_miss() {
        let found = get_docs(json!({"topic": "rules"}));
        assert_eq!(found["success"], true);
        assert!(found["content"].as_str().unwrap().contains("priority"));

        let missing = get_docs(json!({"topic": "nonsense"}));
        assert_eq!(missing["success"], false);
        assert!(missing["available_topics"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t == "rules"));
    }
}
