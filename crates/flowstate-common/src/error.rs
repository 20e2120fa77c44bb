//! Unified error types for the flowstate workspace.
//!
//! End of stream is not represented here: readers report it as `Ok(None)`.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum FlowstateError {
    /// An I/O operation on a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A requested entry is absent from the current index.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing entry.
        kind: &'static str,
        /// Identifier of the missing entry.
        id: String,
    },

    /// Input text could not be decoded.
    #[error("malformed input: {message} (line: \"{line}\")")]
    MalformedInput {
        /// The offending line, trimmed.
        line: String,
        /// What was wrong with it.
        message: String,
    },

    /// An external data source failed to start, exited non-zero, or broke
    /// its pipe.
    #[error("{command} unavailable: {message}")]
    SourceUnavailable {
        /// Command or stream that failed.
        command: String,
        /// Diagnostic text, including captured stderr when available.
        message: String,
    },

    /// Two stores reported the same field for one address.
    #[error("duplicate field \"{field}\" for {address}")]
    DuplicateField {
        /// Field reported twice.
        field: String,
        /// Address whose row was being assembled.
        address: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl FlowstateError {
    /// Builds a [`FlowstateError::MalformedInput`] for `line`.
    pub fn malformed(line: &str, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            line: line.trim().to_string(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FlowstateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_trims_line_context() {
        let err = FlowstateError::malformed("  tcp 6 \n", "missing reply direction");
        assert_eq!(
            err.to_string(),
            "malformed input: missing reply direction (line: \"tcp 6\")"
        );
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = FlowstateError::NotFound {
            kind: "flows for address",
            id: "10.0.0.1".into(),
        };
        assert_eq!(err.to_string(), "flows for address not found: 10.0.0.1");
    }
}
