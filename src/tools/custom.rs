//! Agent-defined custom tools.
//!
//! A custom tool is a small sandboxed callable returning a JSON-compatible
//! object. Two user-definable code forms:
//!
//! - a sandbox expression evaluated with `args` bound (pure computation,
//!   e.g. `{temp: args.base + 5}`),
//! - an `http(s)://…` URL template with `{{args.x}}` interpolation, fetched
//!   and parsed as JSON.
//!
//! Three fetch tools ship pre-registered (`fetch_json`, `fetch_text`,
//! `get_weather`) so data sources work without the agent defining anything.
//! All executions share the engine's 30 s tool timeout.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::engine::EngineInner;
use crate::error::CoreError;
use crate::expr::{compile, EvalContext, Program};
use crate::pipeline::interpolate_string;

/// Pre-registered fetch tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinTool {
    FetchJson,
    FetchText,
    GetWeather,
}

/// A registered custom tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parameter schema, informational for the agent.
    #[serde(default)]
    pub params: Value,
    /// Return schema, informational for the agent.
    #[serde(default)]
    pub returns: Value,
    /// Expression source or URL template; empty for builtins.
    #[serde(default)]
    pub code: String,
    #[serde(skip)]
    builtin: Option<BuiltinTool>,
    #[serde(skip)]
    compiled: Option<Program>,
}

impl CustomTool {
    pub fn new(name: &str, code: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Value::Null,
            returns: Value::Null,
            code: code.to_string(),
            builtin: None,
            compiled: None,
        }
    }

    pub fn with_schemas(mut self, params: Value, returns: Value) -> Self {
        self.params = params;
        self.returns = returns;
        self
    }

    fn is_url(&self) -> bool {
        self.code.starts_with("http://") || self.code.starts_with("https://")
    }

    /// Compile expression code up front so definition-time errors surface
    /// to the agent instead of at first poll.
    pub fn prepared(mut self) -> Result<Self, CoreError> {
        if self.builtin.is_none() && !self.is_url() {
            let program = compile(&self.code).map_err(|e| {
                CoreError::IllegalOperation(format!("tool '{}' code: {e}", self.name))
            })?;
            self.compiled = Some(program);
        }
        Ok(self)
    }
}

/// Register the built-in fetch tools into a fresh tool table.
pub(crate) fn register_builtin_tools(tools: &mut HashMap<String, CustomTool>) {
    let builtins = [
        (
            BuiltinTool::FetchJson,
            "fetch_json",
            "Fetch JSON data from a URL",
            json!({"url": {"type": "string", "required": true}}),
            json!({"type": "object"}),
        ),
        (
            BuiltinTool::FetchText,
            "fetch_text",
            "Fetch text content from a URL",
            json!({"url": {"type": "string", "required": true}}),
            json!({"text": "string"}),
        ),
        (
            BuiltinTool::GetWeather,
            "get_weather",
            "Get current weather for a location using wttr.in",
            json!({"location": {"type": "string", "required": false}}),
            json!({"temp_f": "number", "temp_c": "number", "condition": "string"}),
        ),
    ];

    for (builtin, name, description, params, returns) in builtins {
        tools.insert(
            name.to_string(),
            CustomTool {
                name: name.to_string(),
                description: description.to_string(),
                params,
                returns,
                code: String::new(),
                builtin: Some(builtin),
                compiled: None,
            },
        );
    }
}

/// Execute a tool under the shared tool timeout. Runs off the mutation
/// lane; callers snapshot the tool definition first.
pub(crate) async fn execute(
    inner: &Arc<EngineInner>,
    tool: &CustomTool,
    args: Map<String, Value>,
) -> Result<Value, CoreError> {
    let timeout = inner.tool_timeout;
    tokio::time::timeout(timeout, execute_inner(inner, tool, args))
        .await
        .map_err(|_| CoreError::Timeout(timeout))?
}

async fn execute_inner(
    inner: &Arc<EngineInner>,
    tool: &CustomTool,
    args: Map<String, Value>,
) -> Result<Value, CoreError> {
    debug!("[Tools] Executing '{}'", tool.name);

    if let Some(builtin) = tool.builtin {
        return execute_builtin(inner, builtin, &args).await;
    }

    if tool.is_url() {
        let mut scope = Map::new();
        scope.insert("args".to_string(), Value::Object(args));
        let url = interpolate_string(&tool.code, &scope);
        return get_json(inner, &url).await;
    }

    // Expression tool: args bound both as an `args` object and as bare
    // identifiers.
    let program = match &tool.compiled {
        Some(program) => program.clone(),
        None => compile(&tool.code)
            .map_err(|e| CoreError::IllegalOperation(format!("tool '{}' code: {e}", tool.name)))?,
    };
    let mut scope = args.clone();
    scope.insert("args".to_string(), Value::Object(args));
    EvalContext::scope(&scope)
        .eval(&program)
        .map_err(CoreError::from)
}

async fn execute_builtin(
    inner: &Arc<EngineInner>,
    builtin: BuiltinTool,
    args: &Map<String, Value>,
) -> Result<Value, CoreError> {
    match builtin {
        BuiltinTool::FetchJson => {
            let url = require_str(args, "url")?;
            get_json(inner, url).await
        }
        BuiltinTool::FetchText => {
            let url = require_str(args, "url")?;
            let text = get_text(inner, url).await?;
            Ok(json!({ "text": text }))
        }
        BuiltinTool::GetWeather => {
            let location = args.get("location").and_then(Value::as_str).unwrap_or("");
            let url = format!("https://wttr.in/{location}?format=j1");
            let data = get_json(inner, &url).await?;
            let current = data["current_condition"]
                .get(0)
                .cloned()
                .ok_or_else(|| CoreError::FetchError("no current conditions".into()))?;
            Ok(json!({
                "temp_f": int_field(&current, "temp_F"),
                "temp_c": int_field(&current, "temp_C"),
                "humidity": int_field(&current, "humidity"),
                "wind_mph": int_field(&current, "windspeedMiles"),
                "condition": current["weatherDesc"][0]["value"],
            }))
        }
    }
}

async fn get_json(inner: &Arc<EngineInner>, url: &str) -> Result<Value, CoreError> {
    let response = inner
        .http
        .get(url)
        .header("user-agent", "lumen-lamp")
        .send()
        .await
        .map_err(|e| CoreError::FetchError(e.to_string()))?;
    if !response.status().is_success() {
        return Err(CoreError::FetchError(format!(
            "request failed with {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| CoreError::FetchError(e.to_string()))
}

async fn get_text(inner: &Arc<EngineInner>, url: &str) -> Result<String, CoreError> {
    let response = inner
        .http
        .get(url)
        .header("user-agent", "lumen-lamp")
        .send()
        .await
        .map_err(|e| CoreError::FetchError(e.to_string()))?;
    if !response.status().is_success() {
        return Err(CoreError::FetchError(format!(
            "request failed with {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| CoreError::FetchError(e.to_string()))
}

fn require_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, CoreError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::FetchError(format!("missing required arg '{key}'")))
}

/// wttr.in serves numbers as strings.
fn int_field(value: &Value, key: &str) -> Value {
    value[key]
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .map(Value::from)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registration_covers_fetchers() {
        let mut tools = HashMap::new();
        register_builtin_tools(&mut tools);
        assert!(tools.contains_key("fetch_json"));
        assert!(tools.contains_key("fetch_text"));
        assert!(tools.contains_key("get_weather"));
    }

    #[test]
    fn expression_tools_compile_at_definition() {
        assert!(CustomTool::new("probe", "{temp: 70}", "").prepared().is_ok());
        assert!(CustomTool::new("broken", "{temp:", "").prepared().is_err());
    }

    #[test]
    fn url_tools_skip_compilation() {
        let tool = CustomTool::new(
            "quotes",
            "https://example.com/api?q={{args.symbol}}",
            "",
        );
        assert!(tool.prepared().is_ok());
    }

    #[test]
    fn int_field_parses_wttr_strings() {
        let value = json!({"temp_F": "65"});
        assert_eq!(int_field(&value, "temp_F"), Value::from(65));
        assert_eq!(int_field(&value, "missing"), Value::Null);
    }
}
