//! Error types for the mqas runtime.
//!
//! Store and configuration failures propagate to the caller. Harness
//! failures are caught at the dispatch boundary and rendered into the
//! job's sink instead of crossing back to the worker.

use thiserror::Error;

/// The main error type for mqas operations.
#[derive(Debug, Error)]
pub enum MqasError {
    /// A document store error.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A job harness error.
    #[error("{0}")]
    Harness(#[from] HarnessError),

    /// A configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by document store backends.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The connection string names a scheme no connector understands.
    #[error("Unsupported store scheme in connection string: {uri}")]
    UnsupportedScheme {
        /// The offending connection string.
        uri: String,
    },

    /// The store could not be reached.
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// A document could not be stored or decoded.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates an unsupported scheme error.
    #[must_use]
    pub fn unsupported_scheme(uri: impl Into<String>) -> Self {
        Self::UnsupportedScheme { uri: uri.into() }
    }

    /// Creates an invalid document error.
    #[must_use]
    pub fn invalid_document(reason: impl Into<String>) -> Self {
        Self::InvalidDocument(reason.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

/// Failures while resolving or running a job function.
///
/// Every variant ends up in the same `{trace, message}` sink record.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Neither a module attribute nor a global matched the name.
    #[error("Function {name} not found!")]
    FunctionNotFound {
        /// The requested function name.
        name: String,
    },

    /// The module part of a dotted name could not be imported.
    #[error("No module named '{module}': {reason}")]
    ImportFailure {
        /// The module path.
        module: String,
        /// Why the import failed.
        reason: String,
    },

    /// The function ran and returned an error.
    #[error("{function} failed: {source}")]
    InvocationFailure {
        /// The function name.
        function: String,
        /// The error returned by the job code.
        #[source]
        source: anyhow::Error,
    },

    /// The function panicked.
    #[error("{function} panicked: {message}")]
    Panicked {
        /// The function name.
        function: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The payload document could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// IO error while talking to a child process or the sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Creates a function not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound { name: name.into() }
    }

    /// Creates an import failure error.
    #[must_use]
    pub fn import_failure(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImportFailure {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invocation failure error.
    #[must_use]
    pub fn invocation(function: impl Into<String>, source: anyhow::Error) -> Self {
        Self::InvocationFailure {
            function: function.into(),
            source,
        }
    }

    /// Short machine-readable kind, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FunctionNotFound { .. } => "FunctionNotFound",
            Self::ImportFailure { .. } => "ImportFailure",
            Self::InvocationFailure { .. } => "InvocationFailure",
            Self::Panicked { .. } => "Panicked",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::Io(_) => "Io",
        }
    }
}

/// Invalid runtime configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A duration string did not parse.
    #[error("Invalid duration for {key}: '{value}'")]
    InvalidDuration {
        /// The setting being parsed.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A number did not parse.
    #[error("Invalid number for {key}: '{value}'")]
    InvalidNumber {
        /// The setting being parsed.
        key: String,
        /// The raw value.
        value: String,
    },

    /// A boolean string did not parse.
    #[error("Invalid boolean for {key}: '{value}'")]
    InvalidBool {
        /// The setting being parsed.
        key: String,
        /// The raw value.
        value: String,
    },
}

/// Result alias for mqas operations.
pub type Result<T> = std::result::Result<T, MqasError>;
