//! LLM parser — the pipeline's interpretation collaborator.
//!
//! Pipeline `llm` steps hand interpolated data plus a prompt to a parser
//! and store the returned string. Failures come back as `"Error: …"`
//! strings rather than errors: the step records them as its output and the
//! pipeline carries on deciding with what it got.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

/// Parser collaborator for `llm` pipeline steps.
#[async_trait]
pub trait LlmParser: Send + Sync {
    /// Interpret `input` according to `prompt`, returning the model's text.
    async fn parse(&self, input: &str, prompt: &str) -> String;
}

/// Parser used when no API key is configured.
#[derive(Debug, Default)]
pub struct DisabledParser;

#[async_trait]
impl LlmParser for DisabledParser {
    async fn parse(&self, _input: &str, _prompt: &str) -> String {
        "Error: LLM parser not configured".to_string()
    }
}

/// Claude-backed parser over the Anthropic Messages API.
pub struct ClaudeParser {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl ClaudeParser {
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-20250514";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmParser for ClaudeParser {
    async fn parse(&self, input: &str, prompt: &str) -> String {
        let message = format!("Data:\n{input}\n\n{prompt}");
        let body = json!({
            "model": self.model,
            "max_tokens": 256,
            "messages": [{"role": "user", "content": message}],
        });

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return format!("Error: {e}"),
        };
        if !response.status().is_success() {
            return format!("Error: LLM request failed with {}", response.status());
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return format!("Error: {e}"),
        };

        // First text block of the response.
        payload["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }
}

/// Scripted parser for tests: pops canned responses in order, echoing the
/// input once the script runs dry.
#[derive(Debug, Default)]
pub struct ScriptedParser {
    responses: Mutex<Vec<String>>,
}

impl ScriptedParser {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl LlmParser for ScriptedParser {
    async fn parse(&self, input: &str, _prompt: &str) -> String {
        self.responses
            .lock()
            .expect("script lock poisoned")
            .pop()
            .unwrap_or_else(|| input.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_parser_reports_error_string() {
        let parser = DisabledParser;
        let out = parser.parse("{}", "pick a color").await;
        assert!(out.starts_with("Error:"));
    }

    #[tokio::test]
    async fn scripted_parser_plays_in_order_then_echoes() {
        let parser = ScriptedParser::new(["green", "red"]);
        assert_eq!(parser.parse("a", "p").await, "green");
        assert_eq!(parser.parse("b", "p").await, "red");
        assert_eq!(parser.parse("c", "p").await, "c");
    }
}
