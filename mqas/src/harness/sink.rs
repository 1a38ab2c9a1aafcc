//! The structured outcome record written after every dispatch.

use crate::errors::HarnessError;
use crate::store::ejson;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;

/// `{"result": ...}` or `{"error": {"trace": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkRecord {
    /// The function's return value.
    Result(Value),
    /// Why the call failed.
    Error(ErrorRecord),
}

/// The single error shape shared by every failure cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Full diagnostic text.
    pub trace: String,
    /// Short message.
    pub message: String,
}

impl ErrorRecord {
    /// Renders a harness error.
    #[must_use]
    pub fn from_error(err: &HarnessError) -> Self {
        Self {
            trace: trace_text(err),
            message: format!("Error {err}"),
        }
    }
}

fn trace_text(err: &HarnessError) -> String {
    let mut trace = format!("{}: {err}", err.kind());
    if let HarnessError::InvocationFailure { source, .. } = err {
        let _ = write!(trace, "\n\n{source:?}");
        return trace;
    }
    let mut cause = std::error::Error::source(err);
    while let Some(e) = cause {
        let _ = write!(trace, "\n\nCaused by:\n    {e}");
        cause = e.source();
    }
    trace
}

impl SinkRecord {
    /// Builds the record for a dispatch outcome.
    #[must_use]
    pub fn from_outcome(outcome: Result<Value, HarnessError>) -> Self {
        match outcome {
            Ok(value) => Self::Result(value),
            Err(err) => Self::Error(ErrorRecord::from_error(&err)),
        }
    }

    /// Whether this records a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The result value, if the call succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Result(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    /// The error record, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            Self::Result(_) => None,
            Self::Error(e) => Some(e),
        }
    }
}

/// Writes `record` to `path` as extended JSON.
pub async fn write_sink(path: &Path, record: &SinkRecord) -> Result<(), HarnessError> {
    let text = ejson::encode(record).map_err(std::io::Error::from)?;
    tokio::fs::write(path, text).await?;
    Ok(())
}

/// Reads a sink file written by [`write_sink`].
pub async fn read_sink(path: &Path) -> Result<SinkRecord, HarnessError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(ejson::decode_as(&text).map_err(std::io::Error::from)?)
}
