use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("required file missing: {0}")]
    RequiredFileMissing(PathBuf),

    #[error("parse failed ({context}): {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("tone break for id={0}")]
    ToneBreak(u32),

    #[error("service call failed: {0}")]
    ServiceCall(String),

    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for errors that end a run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RequiredFileMissing(_) => 2,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        Self::ServiceCall(err.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
