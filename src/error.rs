use thiserror::Error;

/// Everything that can go wrong between the oracle, the registry and a page.
///
/// Per-action variants never escape the executor as panics; the agent loop
/// turns them into reflection text for the next oracle call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("browser unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element not visible: {0}")]
    ElementNotVisible(String),

    #[error("timed out after {millis} ms: {what}")]
    ActionTimeout { what: String, millis: u64 },

    #[error("empty extract from {0}")]
    EmptyExtraction(String),

    #[error("unparsable oracle output: {reason}")]
    Parse { reason: String, raw: String },

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("budget exhausted after {steps} steps without finish")]
    Exhausted { steps: usize },

    #[error("planning oracle failed: {0}")]
    Oracle(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl AgentError {
    pub fn parse(reason: impl Into<String>, raw: &str) -> Self {
        AgentError::Parse {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }

    /// Wrap a driver-level failure (CDP, JS evaluation, IO).
    pub fn browser(err: impl std::fmt::Display) -> Self {
        AgentError::Browser(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_raw_text() {
        let err = AgentError::parse("no json object", "hello there");
        match &err {
            AgentError::Parse { raw, .. } => assert_eq!(raw, "hello there"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "unparsable oracle output: no json object");
    }

    #[test]
    fn timeout_message_names_duration() {
        let err = AgentError::ActionTimeout {
            what: "click `Login`".into(),
            millis: 4000,
        };
        assert_eq!(err.to_string(), "timed out after 4000 ms: click `Login`");
    }
}
