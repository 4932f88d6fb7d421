//! Core error taxonomy.
//!
//! Errors never unwind through the event lane: a failing guard evaluates to
//! false, a failing action is logged and the transition proceeds, a failing
//! pipeline step aborts the pipeline but not the originating event. These
//! variants exist so tool handlers and collaborators can report refusals to
//! the caller in a uniform shape.

use std::time::Duration;

use crate::expr::ExprError;

/// Errors surfaced by the behavior engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An expression referenced an identifier outside the sandbox binding set.
    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    /// A rule's `to`, or a setState/pipeline target, names a state that does
    /// not exist. The transition is refused and the current state is kept.
    #[error("unknown state: {0}")]
    UnknownState(String),

    /// Refused mutation: deleting a reserved state, `duration_ms` without
    /// `then`, a time-based rule without trigger config, and similar.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// A fetch or custom tool exceeded its time bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The API executor or a custom tool failed.
    #[error("fetch failed: {0}")]
    FetchError(String),

    /// `run` step recursion exceeded the maximum call depth.
    #[error("pipeline call depth exceeded (max {0})")]
    PipelineDepthExceeded(usize),

    /// A pipeline, state, tool, or data source was addressed by a name that
    /// is not registered.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Timeouts and fetch failures are transient; everything else requires
    /// the caller to change the request first.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Timeout(_) | CoreError::FetchError(_))
    }
}

/// Sandbox failures escaping an expression-backed operation (custom tool
/// execution): forbidden identifiers keep their identity, everything else
/// reports as the tool failing.
impl From<ExprError> for CoreError {
    fn from(e: ExprError) -> Self {
        match e {
            ExprError::Violation(name) => CoreError::SandboxViolation(name),
            other => CoreError::FetchError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CoreError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(CoreError::FetchError("dns".into()).is_transient());
        assert!(!CoreError::UnknownState("warm".into()).is_transient());
        assert!(!CoreError::IllegalOperation("delete off".into()).is_transient());
    }

    #[test]
    fn expression_errors_convert_by_kind() {
        let violation: CoreError = ExprError::Violation("open".into()).into();
        assert!(matches!(violation, CoreError::SandboxViolation(name) if name == "open"));

        let type_error: CoreError = ExprError::Type("division by zero".into()).into();
        assert!(matches!(type_error, CoreError::FetchError(_)));
    }

    #[test]
    fn display_forms_name_the_refusal() {
        assert_eq!(
            CoreError::UnknownState("warm".into()).to_string(),
            "unknown state: warm"
        );
        assert_eq!(
            CoreError::IllegalOperation("cannot delete built-in state 'off'".into()).to_string(),
            "illegal operation: cannot delete built-in state 'off'"
        );
        assert_eq!(
            CoreError::PipelineDepthExceeded(16).to_string(),
            "pipeline call depth exceeded (max 16)"
        );
    }
}
