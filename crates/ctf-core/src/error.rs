use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a failure propagates through the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Generic failure: the test fails and execution continues.
    Test,
    /// A continuous or verify check observed a violated invariant.
    Condition,
    /// A handler received an ill-formed argument.
    Parameter,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct CtfError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub parameter: Option<String>,
}

impl CtfError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Test,
            code: code.into(),
            message: message.into(),
            parameter: None,
        }
    }

    pub fn condition(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Condition,
            ..Self::new(code, message)
        }
    }

    pub fn parameter(
        code: impl Into<String>,
        message: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self {
            kind: ErrorKind::Parameter,
            parameter: Some(parameter.into()),
            ..Self::new(code, message)
        }
    }

    pub fn is_condition(&self) -> bool {
        self.kind == ErrorKind::Condition
    }
}
