//! Lumen: agent-programmable smart-lamp behavior engine.
//!
//! A state machine whose rules are authored at runtime by an LLM agent
//! through a constrained tool interface. Hardware events, timers, and
//! periodic data fetches drive the machine deterministically to produce
//! LED output.
//!
//! ## Architecture
//!
//! - **Engine**: one mutation lane over states, rules, and variables
//! - **Expression Sandbox**: safe evaluator for guards, actions, and
//!   colour math
//! - **Trigger Scheduler**: timers, intervals, schedules, data-source
//!   pollers
//! - **Pipeline Executor**: fetch/llm/setState/setVar/wait/run step chains
//! - **Tool Surface**: the agent's only way to reconfigure the machine

pub mod apis;
pub mod config;
pub mod engine;
pub mod error;
pub mod expr;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
pub mod tools;
pub mod types;

// Re-export the handles most callers need.
pub use config::LampConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::CoreError;

// Re-export the data model.
pub use types::{
    events, ChannelValue, LightState, Rule, RuleCriteria, TriggerConfig, VoiceReactive,
};

// Re-export collaborator contracts and their stock implementations.
pub use apis::{ApiExecutor, ApiResponse, PresetApiExecutor, StaticApiExecutor};
pub use llm::{ClaudeParser, DisabledParser, LlmParser, ScriptedParser};
pub use sink::{AnimationSpec, LedSink, LogSink, NullSink, RecordingSink, RenderEvent};

// Re-export the pipeline model and the agent tool surface.
pub use pipeline::{Pipeline, PipelineResult, Step, StepKind, StepStatus};
pub use scheduler::DataSource;
pub use tools::{custom::CustomTool, ToolRegistry};
