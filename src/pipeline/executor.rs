//! Step interpreter.
//!
//! Runs a pipeline's steps in order under the mutation lane. `{{path}}`
//! interpolation resolves dotted paths against the scope (missing paths
//! substitute an empty string and emit a diagnostic), `if` conditions are
//! evaluated in the sandbox against the scope, and a failing step aborts
//! the rest of the pipeline.

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::engine::{enter_state_on_lane, Core, EngineInner};
use crate::error::CoreError;
use crate::expr::{compile, stringify, truthy, EvalContext};

use super::{Pipeline, PipelineResult, StepKind, StepReport, StepStatus, MAX_CALL_DEPTH};

/// Interpret a pipeline against a scope. `run` steps recurse with the same
/// scope and `depth + 1`; recursion past [`MAX_CALL_DEPTH`] aborts.
pub(crate) fn run_pipeline_steps<'a>(
    inner: &'a Arc<EngineInner>,
    core: &'a mut Core,
    pipeline: &'a Pipeline,
    scope: &'a mut Map<String, Value>,
    depth: usize,
) -> BoxFuture<'a, PipelineResult> {
    Box::pin(async move {
        let mut steps: Vec<StepReport> = Vec::with_capacity(pipeline.steps.len());

        if depth >= MAX_CALL_DEPTH {
            let error = CoreError::PipelineDepthExceeded(MAX_CALL_DEPTH);
            warn!("[Pipeline] '{}': {error}", pipeline.name);
            return PipelineResult {
                success: false,
                scope: scope.clone(),
                steps: vec![StepReport {
                    index: 0,
                    step: "run",
                    status: StepStatus::Failed(error.to_string()),
                }],
            };
        }

        info!(
            "[Pipeline] Running '{}' ({} steps)",
            pipeline.name,
            pipeline.steps.len()
        );

        let mut success = true;
        for (index, step) in pipeline.steps.iter().enumerate() {
            if let Some(condition) = &step.condition {
                if !condition_passes(condition, scope) {
                    debug!("[Pipeline] '{}' step {index}: skipped", pipeline.name);
                    steps.push(StepReport {
                        index,
                        step: step.kind.name(),
                        status: StepStatus::Skipped,
                    });
                    continue;
                }
            }

            let status = match &step.kind {
                StepKind::Run { pipeline: child } => {
                    match core.pipelines.get(child).cloned() {
                        None => StepStatus::Failed(
                            CoreError::NotFound(format!("pipeline '{child}'")).to_string(),
                        ),
                        Some(child_pipeline) => {
                            let child_result =
                                run_pipeline_steps(inner, core, &child_pipeline, scope, depth + 1)
                                    .await;
                            let status = if child_result.success {
                                StepStatus::Completed
                            } else {
                                StepStatus::Failed(format!("pipeline '{child}' failed"))
                            };
                            steps.push(StepReport {
                                index,
                                step: "run",
                                status: status.clone(),
                            });
                            steps.extend(child_result.steps);
                            if !child_result.success {
                                success = false;
                                break;
                            }
                            continue;
                        }
                    }
                }
                kind => run_step(inner, core, kind, scope).await,
            };

            let failed = matches!(status, StepStatus::Failed(_));
            if let StepStatus::Failed(reason) = &status {
                warn!("[Pipeline] '{}' step {index} failed: {reason}", pipeline.name);
            }
            steps.push(StepReport {
                index,
                step: step.kind.name(),
                status,
            });
            if failed {
                success = false;
                break;
            }
        }

        PipelineResult {
            success,
            scope: scope.clone(),
            steps,
        }
    })
}

async fn run_step(
    inner: &Arc<EngineInner>,
    core: &mut Core,
    kind: &StepKind,
    scope: &mut Map<String, Value>,
) -> StepStatus {
    match kind {
        StepKind::Fetch {
            api,
            params,
            store_as,
        } => {
            let params = match interpolate_value(&Value::Object(params.clone()), scope) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let response =
                match tokio::time::timeout(inner.api_timeout, inner.api.execute(api, &params))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => {
                        return StepStatus::Failed(
                            CoreError::Timeout(inner.api_timeout).to_string(),
                        )
                    }
                };
            let succeeded = response.success;
            let error = response.error.clone();
            scope.insert(store_as.clone(), response.into_value());
            if succeeded {
                StepStatus::Completed
            } else {
                StepStatus::Failed(
                    CoreError::FetchError(error.unwrap_or_else(|| "api error".into())).to_string(),
                )
            }
        }

        StepKind::Llm {
            input,
            prompt,
            store_as,
        } => {
            let input = interpolate_string(input, scope);
            let prompt = interpolate_string(prompt, scope);
            // LLM errors come back as "Error: …" strings and are recorded
            // as the step output, not as failures.
            let output =
                match tokio::time::timeout(inner.tool_timeout, inner.llm.parse(&input, &prompt))
                    .await
                {
                    Ok(text) => text,
                    Err(_) => format!("Error: {}", CoreError::Timeout(inner.tool_timeout)),
                };
            scope.insert(store_as.clone(), Value::String(output));
            StepStatus::Completed
        }

        StepKind::SetState { state, from, map } => {
            if let Some(state) = state {
                let name = interpolate_string(state, scope);
                return match enter_state_on_lane(inner, core, &name) {
                    Ok(()) => StepStatus::Completed,
                    Err(e) => StepStatus::Failed(e.to_string()),
                };
            }
            let (Some(from), Some(map)) = (from, map) else {
                return StepStatus::Failed(
                    CoreError::IllegalOperation(
                        "setState needs either 'state' or 'from' + 'map'".into(),
                    )
                    .to_string(),
                );
            };
            // Case-sensitive lookup; a miss is a no-op, not a failure.
            let Some(key) = lookup_path(scope, from).map(|v| stringify(&v)) else {
                debug!("[Pipeline] setState: '{from}' not in scope, skipping");
                return StepStatus::Completed;
            };
            match map.get(&key) {
                Some(target) => match enter_state_on_lane(inner, core, target) {
                    Ok(()) => StepStatus::Completed,
                    Err(e) => StepStatus::Failed(e.to_string()),
                },
                None => {
                    debug!("[Pipeline] setState: '{key}' not in map, skipping");
                    StepStatus::Completed
                }
            }
        }

        StepKind::SetVar { key, value } => {
            let value = interpolate_value(value, scope);
            scope.insert(key.clone(), value.clone());
            // setVar propagates to the machine immediately, unlike `as`
            // outputs which stay scope-local.
            core.machine.set_variable(key, value);
            StepStatus::Completed
        }

        StepKind::Wait { ms } => {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    StepStatus::Failed("cancelled during wait".into())
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(*ms)) => {
                    StepStatus::Completed
                }
            }
        }

        StepKind::Run { .. } => unreachable!("run steps are handled by the interpreter loop"),
    }
}

/// Evaluate a step's `if` against the scope; errors count as false.
fn condition_passes(condition: &str, scope: &Map<String, Value>) -> bool {
    let program = match compile(condition) {
        Ok(program) => program,
        Err(e) => {
            warn!("[Pipeline] if-condition '{condition}' failed to compile: {e}");
            return false;
        }
    };
    match EvalContext::scope(scope).eval(&program) {
        Ok(value) => truthy(&value),
        Err(e) => {
            warn!("[Pipeline] if-condition '{condition}' failed: {e}");
            false
        }
    }
}

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex"))
}

/// Replace `{{path}}` with the stringified scope value. Missing paths
/// substitute an empty string and emit a diagnostic.
pub(crate) fn interpolate_string(text: &str, scope: &Map<String, Value>) -> String {
    pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match lookup_path(scope, path) {
                Some(value) => stringify(&value),
                None => {
                    warn!("[Pipeline] interpolation path '{path}' not in scope");
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Interpolate every string found inside a step field value.
fn interpolate_value(value: &Value, scope: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => Value::String(interpolate_string(text, scope)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, scope)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Dotted lookup against the scope (`memory.key` resolves through the
/// memory sub-object).
pub(crate) fn lookup_path(scope: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let mut current = scope.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_from(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn interpolates_dotted_paths() {
        let scope = scope_from(json!({
            "wx": {"temp": 70},
            "memory": {"location": "Oslo"},
            "dir": "up",
        }));

        assert_eq!(interpolate_string("{{dir}}", &scope), "up");
        assert_eq!(
            interpolate_string("temp is {{wx.temp}} in {{memory.location}}", &scope),
            "temp is 70 in Oslo"
        );
    }

    #[test]
    fn missing_paths_become_empty_string() {
        let scope = scope_from(json!({"a": 1}));
        assert_eq!(interpolate_string("[{{nope}}]", &scope), "[]");
        assert_eq!(interpolate_string("[{{a.b.c}}]", &scope), "[]");
    }

    #[test]
    fn interpolation_ignores_malformed_braces() {
        let scope = scope_from(json!({"a": 1}));
        assert_eq!(interpolate_string("{a} {{a}} {{ a }}", &scope), "{a} 1 1");
    }

    #[test]
    fn condition_errors_count_as_false() {
        let scope = scope_from(json!({"n": 3}));
        assert!(condition_passes("n > 2", &scope));
        assert!(!condition_passes("missing > 2", &scope));
        assert!(!condition_passes("n >", &scope));
    }

    #[test]
    fn interpolate_value_descends_containers() {
        let scope = scope_from(json!({"city": "Oslo"}));
        let params = json!({"location": "{{city}}", "units": ["{{city}}", 1]});
        assert_eq!(
            interpolate_value(&params, &scope),
            json!({"location": "Oslo", "units": ["Oslo", 1]})
        );
    }
}
