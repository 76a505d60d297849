//! Error accumulation for layout validation.
//!
//! Validators never stop at the first problem. Each one collects messages
//! into an [`Errors`] scope and merges child scopes upward, so a single
//! [`ValidationError`] describes everything wrong with a layout and where
//! each problem came from.

use std::fmt;
use thiserror::Error;

/// Every violation found by one validation pass, under the scope that ran it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub prefix: String,
    pub messages: Vec<String>,
}

impl ValidationError {
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// True if any collected message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.contains(needle))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.messages.len() == 1 { "problem" } else { "problems" };
        write!(f, "{}: {} {}", self.prefix, self.messages.len(), noun)?;
        for message in &self.messages {
            write!(f, "\n  {}", message)?;
        }
        Ok(())
    }
}

/// Mutable collector for validation messages.
#[derive(Debug, Clone, Default)]
pub struct Errors {
    prefix: String,
    messages: Vec<String>,
}

impl Errors {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            messages: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Pulls in the messages of a finished sub-validation, each one prefixed
    /// with the scope it came from.
    pub fn merge(&mut self, result: Result<(), ValidationError>) {
        if let Err(err) = result {
            for message in err.messages {
                self.messages.push(format!("{}: {}", err.prefix, message));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                prefix: self.prefix,
                messages: self.messages,
            })
        }
    }
}

/// Failures while loading, storing or validating a layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read layout from {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write layout to {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML layout")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed JSON layout")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
