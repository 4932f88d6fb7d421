//! Periodic data-source pollers.
//!
//! A data source couples a custom fetch tool to the machine: every
//! `interval_ms` it runs the tool, stores mapped result paths into the
//! variable store, and fires its transition event. The fetch runs off the
//! lane; store-and-fire takes the lane once, atomically.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::engine::EngineInner;
use crate::error::CoreError;

/// A registered periodic poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub interval_ms: u64,
    /// Custom tool to call each cycle.
    pub fetch_tool: String,
    #[serde(default)]
    pub fetch_args: Map<String, Value>,
    /// variable name → dotted result path ("result.temp" or "temp").
    #[serde(default)]
    pub store_mapping: HashMap<String, String>,
    /// Event fired into the engine after a successful store.
    pub fires_transition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DataSource {
    pub fn new(name: &str, interval_ms: u64, fetch_tool: &str, fires_transition: &str) -> Self {
        Self {
            name: name.to_string(),
            interval_ms,
            fetch_tool: fetch_tool.to_string(),
            fetch_args: Map::new(),
            store_mapping: HashMap::new(),
            fires_transition: fires_transition.to_string(),
            last_fetch: None,
            last_error: None,
        }
    }

    pub fn with_mapping(mut self, variable: &str, path: &str) -> Self {
        self.store_mapping
            .insert(variable.to_string(), path.to_string());
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.fetch_args = args;
        self
    }
}

/// Spawn the polling loop for a registered source. The loop exits when the
/// source disappears or the engine shuts down.
pub(crate) fn spawn_poller(inner: &Arc<EngineInner>, name: String) -> AbortHandle {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        loop {
            let interval_ms = {
                let core = inner.core.lock().await;
                match core.sources.get(&name) {
                    Some(source) => source.interval_ms,
                    None => return,
                }
            };
            tokio::select! {
                _ = inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(interval_ms)) => {}
            }
            match run_source_cycle(&inner, &name).await {
                Ok(_) => {}
                Err(CoreError::NotFound(_)) => return,
                Err(e) => debug!("[DataSource] '{name}' cycle failed: {e}"),
            }
        }
    })
    .abort_handle()
}

/// One fetch-store-fire cycle. Also used by `triggerDataSource`.
///
/// The custom tool runs outside the lane under the shared tool timeout; on
/// success the lane is taken once to store the mapped values and deliver
/// the event. Failures record `last_error` and fire nothing.
pub(crate) async fn run_source_cycle(
    inner: &Arc<EngineInner>,
    name: &str,
) -> Result<Value, CoreError> {
    let (tool, args, mapping, fires) = {
        let core = inner.core.lock().await;
        let source = core
            .sources
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("data source '{name}'")))?;
        let tool = core
            .custom_tools
            .get(&source.fetch_tool)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("custom tool '{}'", source.fetch_tool))
            })?;
        (
            tool,
            source.fetch_args.clone(),
            source.store_mapping.clone(),
            source.fires_transition.clone(),
        )
    };

    let outcome = crate::tools::custom::execute(inner, &tool, args).await;

    let mut core = inner.core.lock().await;
    match outcome {
        Ok(result) => {
            for (variable, path) in &mapping {
                let value = extract_path(&result, path);
                if value.is_none() {
                    warn!("[DataSource] '{name}': path '{path}' missing from result");
                }
                core.machine
                    .set_variable(variable, value.unwrap_or(Value::Null));
            }
            if let Some(source) = core.sources.get_mut(name) {
                source.last_fetch = Some(result.clone());
                source.last_error = None;
            }
            crate::engine::execute_event_on_lane(inner, &mut core, &fires).await;
            Ok(result)
        }
        Err(e) => {
            if let Some(source) = core.sources.get_mut(name) {
                source.last_error = Some(e.to_string());
            }
            Err(e)
        }
    }
}

/// Walk a dotted path into a result value. A leading `result.` segment is
/// accepted as an alias for the root.
fn extract_path(data: &Value, path: &str) -> Option<Value> {
    let path = path.strip_prefix("result.").unwrap_or(path);
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}
