use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnasError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("grading error: {0}")]
    Grading(#[from] GradingError),

    #[error("config error: {0}")]
    Config(String),
}

impl AnasError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type AnasResult<T> = Result<T, AnasError>;

/// Failures raised while grading a run.
///
/// `Template` and `Cancelled` abort the whole benchmark; `Call` and `Parse`
/// only affect the item being graded.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("prompt template: {0}")]
    Template(String),

    #[error("grader call failed: {0}")]
    Call(String),

    #[error("unparsable verdict: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,
}

impl GradingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Template(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GradingError::Template("bad slot".into()).is_fatal());
        assert!(GradingError::Cancelled.is_fatal());
        assert!(!GradingError::Call("timeout".into()).is_fatal());
        assert!(!GradingError::Parse("not json".into()).is_fatal());
    }

    #[test]
    fn test_not_found_is_structural() {
        let err = AnasError::Storage("run not found on disk".into());
        assert!(!err.is_not_found());
        assert!(AnasError::NotFound("run/x".into()).is_not_found());
    }
}
