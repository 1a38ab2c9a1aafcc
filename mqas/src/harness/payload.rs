//! The job invocation descriptor.

use crate::errors::HarnessError;
use crate::store::ejson;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// What to call, with which arguments, and where to put the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Dotted `"pkg.mod.fn"` path or a bare global name.
    pub function_name: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    /// Extra module search paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<PathBuf>,
    /// Sink file; without one the outcome is discarded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Payload {
    /// Creates a payload calling `function_name` with no arguments.
    #[must_use]
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            modules: Vec::new(),
            output: None,
        }
    }

    /// Appends a positional argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replaces the positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Sets a keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Adds a module search path.
    #[must_use]
    pub fn with_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.modules.push(path.into());
        self
    }

    /// Sets the sink file.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Builds a payload from an already decoded document.
    pub fn from_value(value: Value) -> Result<Self, HarnessError> {
        serde_json::from_value(value).map_err(|e| HarnessError::InvalidPayload(e.to_string()))
    }

    /// Decodes an extended JSON payload document.
    pub fn decode(text: &str) -> Result<Self, HarnessError> {
        let value =
            ejson::decode_str(text).map_err(|e| HarnessError::InvalidPayload(e.to_string()))?;
        Self::from_value(value)
    }

    /// Encodes the payload as extended JSON.
    pub fn encode(&self) -> Result<String, HarnessError> {
        ejson::encode(self).map_err(|e| HarnessError::InvalidPayload(e.to_string()))
    }
}
