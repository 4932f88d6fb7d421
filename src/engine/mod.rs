//! The behavior engine: one mutation lane over the whole machine.
//!
//! All state mutation — event execution, timer fires, data-source
//! store-and-fire, pipeline steps, tool mutations — runs under a single
//! async mutex, so at most one of them touches the machine at a time. Timer
//! and poller tasks hold an `Arc` of the inner engine and take the lane
//! when they fire; suspension points (fetch, llm, wait) do not release the
//! lane mid-pipeline.

mod machine;
mod safety;
mod transition;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::apis::{ApiExecutor, PresetApiExecutor};
use crate::config::LampConfig;
use crate::error::CoreError;
use crate::llm::{DisabledParser, LlmParser};
use crate::memory::MemoryStore;
use crate::pipeline::{Pipeline, PipelineRegistry, PipelineResult};
use crate::scheduler::{self, DataSource};
use crate::sink::{LedSink, NullSink};
use crate::tools::custom::{register_builtin_tools, CustomTool};
use crate::types::{events, LightState, Rule, RuleCriteria};

pub(crate) use machine::Machine;
pub(crate) use transition::{
    enter_state as enter_state_on_lane, execute_event as execute_event_on_lane, fire_rule,
};

/// Pending one-shot timer for a state's `duration_ms`.
pub(crate) struct DurationTimer {
    pub state: String,
    pub handle: AbortHandle,
}

/// Everything behind the mutation lane.
pub(crate) struct Core {
    pub machine: Machine,
    /// Armed trigger tasks, keyed by owning rule id.
    pub timers: HashMap<u64, AbortHandle>,
    pub duration: Option<DurationTimer>,
    pub sources: HashMap<String, DataSource>,
    pub source_tasks: HashMap<String, AbortHandle>,
    pub custom_tools: HashMap<String, CustomTool>,
    pub memory: MemoryStore,
    pub pipelines: PipelineRegistry,
    pub pending_question: Option<String>,
}

pub(crate) struct EngineInner {
    pub core: Mutex<Core>,
    pub sink: Arc<dyn LedSink>,
    pub llm: Arc<dyn LlmParser>,
    pub api: Arc<dyn ApiExecutor>,
    pub http: reqwest::Client,
    pub cancel: CancellationToken,
    pub tool_timeout: Duration,
    pub api_timeout: Duration,
    pub frame_ms: u64,
}

/// Handle to the behavior engine. Cheap to clone; all clones share the
/// same machine and lane.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    // ==================================================================
    // Event ingress
    // ==================================================================

    /// Deliver an event to the machine. Returns true when a rule fired.
    pub async fn on_event(&self, event: &str) -> bool {
        let mut core = self.inner.core.lock().await;
        transition::execute_event(&self.inner, &mut core, event).await
    }

    // ==================================================================
    // States
    // ==================================================================

    pub async fn current_state(&self) -> String {
        self.inner.core.lock().await.machine.current.clone()
    }

    /// Transition directly, without rule evaluation.
    pub async fn set_state(&self, name: &str) -> Result<(), CoreError> {
        let mut core = self.inner.core.lock().await;
        transition::enter_state(&self.inner, &mut core, name)
    }

    pub async fn create_state(&self, state: LightState) -> Result<(), CoreError> {
        self.inner.core.lock().await.machine.add_state(state)
    }

    pub async fn delete_state(&self, name: &str) -> Result<bool, CoreError> {
        self.inner.core.lock().await.machine.delete_state(name)
    }

    pub async fn states(&self) -> Vec<LightState> {
        self.inner.core.lock().await.machine.states().to_vec()
    }

    pub async fn state(&self, name: &str) -> Option<LightState> {
        self.inner.core.lock().await.machine.state(name).cloned()
    }

    // ==================================================================
    // Rules
    // ==================================================================

    /// Insert rules in order, arming timers for time-based ones. Upserted
    /// predecessors have their timers cancelled before replacement. Stops
    /// at the first invalid rule.
    pub async fn append_rules(&self, rules: Vec<Rule>) -> Result<Vec<u64>, CoreError> {
        let mut core = self.inner.core.lock().await;
        let mut ids = Vec::with_capacity(rules.len());
        for rule in rules {
            let (id, replaced) = core.machine.insert_rule(rule)?;
            if let Some(old_id) = replaced {
                scheduler::cancel_timer(&mut core, old_id);
            }
            let rule = core.machine.rule_by_id(id).cloned();
            if let Some(rule) = rule {
                if events::is_time_based(&rule.on) {
                    scheduler::arm_rule(&self.inner, &mut core, &rule);
                }
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Rules in insertion order (the agent's view).
    pub async fn rules(&self) -> Vec<Rule> {
        self.inner.core.lock().await.machine.rules().to_vec()
    }

    /// Delete rules by criteria, cancelling their timers. Returns how many
    /// were removed.
    pub async fn delete_rules(&self, criteria: &RuleCriteria) -> usize {
        let mut core = self.inner.core.lock().await;
        let removed = core.machine.remove_matching(criteria);
        for rule in &removed {
            scheduler::cancel_timer(&mut core, rule.id);
        }
        removed.len()
    }

    // ==================================================================
    // Variables
    // ==================================================================

    pub async fn set_variable(&self, key: &str, value: Value) {
        self.inner
            .core
            .lock()
            .await
            .machine
            .set_variable(key, value);
    }

    pub async fn variable(&self, key: &str) -> Option<Value> {
        self.inner.core.lock().await.machine.variable(key).cloned()
    }

    pub async fn variables(&self) -> Map<String, Value> {
        self.inner.core.lock().await.machine.variables.clone()
    }

    // ==================================================================
    // Pipelines
    // ==================================================================

    pub async fn define_pipeline(&self, pipeline: Pipeline) {
        self.inner.core.lock().await.pipelines.register(pipeline);
    }

    pub async fn delete_pipeline(&self, name: &str) -> bool {
        self.inner.core.lock().await.pipelines.delete(name)
    }

    pub async fn pipeline_summaries(&self) -> Vec<Value> {
        self.inner.core.lock().await.pipelines.summaries()
    }

    /// Run a pipeline in a fresh scope seeded with the current variables
    /// and memory. Holds the lane for the whole run.
    pub async fn run_pipeline(&self, name: &str) -> Result<PipelineResult, CoreError> {
        let mut core = self.inner.core.lock().await;
        let pipeline = core
            .pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("pipeline '{name}'")))?;
        let mut scope = transition::seed_scope(&core);
        Ok(crate::pipeline::run_pipeline_steps(&self.inner, &mut core, &pipeline, &mut scope, 0)
            .await)
    }

    // ==================================================================
    // Memory
    // ==================================================================

    pub async fn remember(&self, key: &str, value: Value) {
        self.inner.core.lock().await.memory.set(key, value);
    }

    pub async fn recall(&self, key: &str) -> Option<Value> {
        self.inner.core.lock().await.memory.get(key).cloned()
    }

    pub async fn forget_memory(&self, key: &str) -> bool {
        self.inner.core.lock().await.memory.delete(key)
    }

    pub async fn list_memory(&self) -> Map<String, Value> {
        self.inner.core.lock().await.memory.list().clone()
    }

    /// Execute a preset API and return its raw response envelope.
    pub async fn fetch_api(&self, api: &str, params: &Map<String, Value>) -> Value {
        self.inner.api.execute(api, params).await.into_value()
    }

    // ==================================================================
    // Custom tools & data sources
    // ==================================================================

    /// Register (or replace) a custom tool. Expression code is compiled
    /// here so definition-time typos surface to the agent.
    pub async fn define_tool(&self, tool: CustomTool) -> Result<(), CoreError> {
        let tool = tool.prepared()?;
        let mut core = self.inner.core.lock().await;
        info!("[Engine] Custom tool defined: {}", tool.name);
        core.custom_tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, CoreError> {
        let tool = {
            let core = self.inner.core.lock().await;
            core.custom_tools
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::NotFound(format!("custom tool '{name}'")))?
        };
        crate::tools::custom::execute(&self.inner, &tool, args).await
    }

    pub async fn list_tools(&self) -> Vec<Value> {
        let core = self.inner.core.lock().await;
        let mut tools: Vec<&CustomTool> = core.custom_tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "params": t.params,
                    "returns": t.returns,
                })
            })
            .collect()
    }

    /// Register a data source and start its poller.
    pub async fn create_data_source(&self, source: DataSource) -> Result<(), CoreError> {
        if source.interval_ms == 0 {
            return Err(CoreError::IllegalOperation(
                "data source interval_ms must be positive".into(),
            ));
        }
        let mut core = self.inner.core.lock().await;
        let name = source.name.clone();
        // Replacing a source restarts its poller.
        if let Some(task) = core.source_tasks.remove(&name) {
            task.abort();
        }
        core.sources.insert(name.clone(), source);
        let handle = scheduler::spawn_poller(&self.inner, name.clone());
        core.source_tasks.insert(name.clone(), handle);
        info!("[Engine] Data source created: {name}");
        Ok(())
    }

    /// Run one fetch-store-fire cycle immediately.
    pub async fn trigger_data_source(&self, name: &str) -> Result<Value, CoreError> {
        scheduler::run_source_cycle(&self.inner, name).await
    }

    pub async fn data_sources(&self) -> Vec<Value> {
        let core = self.inner.core.lock().await;
        let mut sources: Vec<&DataSource> = core.sources.values().collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        sources
            .iter()
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
            .collect()
    }

    // ==================================================================
    // Agent interaction
    // ==================================================================

    pub async fn set_pending_question(&self, question: &str) {
        self.inner.core.lock().await.pending_question = Some(question.to_string());
    }

    /// Consumed by the outer loop after an agent turn.
    pub async fn take_pending_question(&self) -> Option<String> {
        self.inner.core.lock().await.pending_question.take()
    }

    /// Ensure every non-`off` state has an exit rule; idempotent.
    pub async fn safety_pass(&self) -> Vec<String> {
        let mut core = self.inner.core.lock().await;
        safety::safety_pass(&mut core)
    }

    pub async fn summary(&self) -> Value {
        let core = self.inner.core.lock().await;
        json!({
            "current_state": core.machine.current,
            "states_count": core.machine.states().len(),
            "rules_count": core.machine.rules().len(),
            "variables": core.machine.variables,
            "data_sources": core.sources.len(),
            "active_timers": core.timers.len(),
        })
    }

    // ==================================================================
    // Shutdown
    // ==================================================================

    /// Cancel all timers and pollers, drop pending pipelines at their next
    /// suspension point, and render `off`.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut core = self.inner.core.lock().await;
        for (_, handle) in core.timers.drain() {
            handle.abort();
        }
        for (_, handle) in core.source_tasks.drain() {
            handle.abort();
        }
        if let Some(timer) = core.duration.take() {
            timer.handle.abort();
        }
        core.machine.current = "off".to_string();
        self.inner.sink.clear();
        info!("[Engine] Shutdown complete");
    }
}

/// Builder wiring collaborators and config into an engine.
pub struct EngineBuilder {
    config: LampConfig,
    sink: Arc<dyn LedSink>,
    llm: Arc<dyn LlmParser>,
    api: Option<Arc<dyn ApiExecutor>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: LampConfig::ephemeral(),
            sink: Arc::new(NullSink),
            llm: Arc::new(DisabledParser),
            api: None,
        }
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: LampConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LedSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmParser>) -> Self {
        self.llm = llm;
        self
    }

    pub fn api(mut self, api: Arc<dyn ApiExecutor>) -> Self {
        self.api = Some(api);
        self
    }

    /// Build the engine: reserved states, default toggle rules, persisted
    /// memory and pipelines, built-in fetch tools.
    pub fn build(self) -> Engine {
        let api_timeout = Duration::from_secs(self.config.timeouts.api_secs);
        let tool_timeout = Duration::from_secs(self.config.timeouts.tool_secs);
        let api = self
            .api
            .unwrap_or_else(|| Arc::new(PresetApiExecutor::new(api_timeout)));

        let mut machine = Machine::new();
        for rule in [
            Rule::new("off", events::BUTTON_CLICK, "on"),
            Rule::new("on", events::BUTTON_CLICK, "off"),
        ] {
            // Defaults cannot fail validation.
            let _ = machine.insert_rule(rule);
        }

        let memory = match &self.config.storage.memory_file {
            Some(path) => MemoryStore::load(path),
            None => MemoryStore::ephemeral(),
        };
        let pipelines = match &self.config.storage.pipelines_file {
            Some(path) => PipelineRegistry::load(path),
            None => PipelineRegistry::ephemeral(),
        };

        let mut custom_tools = HashMap::new();
        register_builtin_tools(&mut custom_tools);

        let inner = Arc::new(EngineInner {
            core: Mutex::new(Core {
                machine,
                timers: HashMap::new(),
                duration: None,
                sources: HashMap::new(),
                source_tasks: HashMap::new(),
                custom_tools,
                memory,
                pipelines,
                pending_question: None,
            }),
            sink: self.sink,
            llm: self.llm,
            api,
            http: reqwest::Client::new(),
            cancel: CancellationToken::new(),
            tool_timeout,
            api_timeout,
            frame_ms: self.config.animation.frame_ms,
        });

        if let Err(e) = self.config.validate() {
            warn!("[Engine] Config validation: {e}");
        }

        Engine::from_inner(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_registers_defaults() {
        let engine = Engine::builder().build();
        assert_eq!(engine.current_state().await, "off");
        assert_eq!(engine.states().await.len(), 2);

        let rules = engine.rules().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].describe(), "off --[button_click]--> on");
    }

    #[tokio::test]
    async fn safety_pass_is_idempotent() {
        let engine = Engine::builder().build();
        engine
            .create_state(LightState::solid("red", 255, 0, 0))
            .await
            .unwrap();

        let added = engine.safety_pass().await;
        assert_eq!(added, vec!["red --[button_click]--> off".to_string()]);

        // Every non-off state now has an exit.
        let rules = engine.rules().await;
        for state in engine.states().await {
            if state.name != "off" {
                assert!(rules.iter().any(|r| r.from == state.name));
            }
        }

        assert!(engine.safety_pass().await.is_empty());
    }

    #[tokio::test]
    async fn pending_question_is_take_once() {
        let engine = Engine::builder().build();
        engine.set_pending_question("Which city?").await;
        assert_eq!(
            engine.take_pending_question().await.as_deref(),
            Some("Which city?")
        );
        assert!(engine.take_pending_question().await.is_none());
    }
}
