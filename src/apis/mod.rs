//! Preset API surface.
//!
//! A curated, fixed set of external data APIs the agent can call without
//! writing code. APIs only return data — the agent decides what colours to
//! make of it. Names outside the preset set are refused with a uniform
//! error envelope rather than an error type: fetch failures are ordinary
//! data for the caller.

mod preset;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use preset::{catalog, PresetApiExecutor, PRESET_API_NAMES};

/// Envelope returned by every API execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub api: String,
}

impl ApiResponse {
    pub fn ok(api: &str, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            api: api.to_string(),
        }
    }

    pub fn fail(api: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            api: api.to_string(),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Executor collaborator for preset API fetches.
#[async_trait]
pub trait ApiExecutor: Send + Sync {
    async fn execute(&self, api: &str, params: &Map<String, Value>) -> ApiResponse;
}

/// Canned executor for tests and offline runs: responds from a fixed table,
/// recording each call.
#[derive(Debug, Default)]
pub struct StaticApiExecutor {
    responses: HashMap<String, Value>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StaticApiExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, api: &str, data: Value) -> Self {
        self.responses.insert(api.to_string(), data);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("call log poisoned").clone()
    }
}

#[async_trait]
impl ApiExecutor for StaticApiExecutor {
    async fn execute(&self, api: &str, params: &Map<String, Value>) -> ApiResponse {
        self.calls
            .lock()
            .expect("call log poisoned")
            .push((api.to_string(), Value::Object(params.clone())));
        match self.responses.get(api) {
            Some(data) => ApiResponse::ok(api, data.clone()),
            None => ApiResponse::fail(api, "unknown api"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_executor_answers_from_table() {
        let executor =
            StaticApiExecutor::new().with_response("weather", serde_json::json!({"temp_f": 65}));

        let ok = executor.execute("weather", &Map::new()).await;
        assert!(ok.success);
        assert_eq!(ok.data.unwrap()["temp_f"], 65);

        let missing = executor.execute("stock", &Map::new()).await;
        assert!(!missing.success);
        assert_eq!(executor.calls().len(), 2);
    }
}
