use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by pipeline stages.
///
/// Every variant is recovered at the per-video boundary: it marks that
/// video's `VideoResult` as failed and never aborts other videos.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("processing cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::DecodeError(_) => ErrorKind::DecodeError,
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::ConfigError(_) => ErrorKind::ConfigError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Detail message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            Self::SourceUnavailable(msg)
            | Self::DecodeError(msg)
            | Self::ModelUnavailable(msg)
            | Self::ConfigError(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Cancelled => "processing cancelled".to_string(),
        }
    }

    /// Wrap an unexpected error, keeping the full context chain.
    pub fn internal(err: &anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

/// Serializable tag stored in failed results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    DecodeError,
    ModelUnavailable,
    ConfigError,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "SourceUnavailable",
            Self::DecodeError => "DecodeError",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::ConfigError => "ConfigError",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_message_split_the_display_string() {
        let err = PipelineError::SourceUnavailable("connection refused".into());
        assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
        assert_eq!(err.message(), "connection refused");
        assert_eq!(err.to_string(), "source unavailable: connection refused");
    }

    #[test]
    fn internal_keeps_context_chain() {
        let err = anyhow::anyhow!("disk full").context("write result");
        let wrapped = PipelineError::internal(&err);
        assert_eq!(wrapped.kind(), ErrorKind::Internal);
        assert_eq!(wrapped.message(), "write result: disk full");
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ModelUnavailable).unwrap();
        assert_eq!(json, "\"model_unavailable\"");
    }
}
