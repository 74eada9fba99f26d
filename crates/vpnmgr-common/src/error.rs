//! Error types for tunnel manager operations.
//!
//! All errors implement `std::error::Error` via `thiserror`. Failures
//! are scoped to one tunnel or interface; nothing in this taxonomy is
//! meant to terminate the owning process.

use std::io;
use thiserror::Error;

/// Result type alias for tunnel manager operations.
pub type VpnResult<T> = Result<T, VpnError>;

/// Errors that can occur during tunnel manager operations.
#[derive(Debug, Error)]
pub enum VpnError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Endpoint name resolution failed.
    #[error("Cannot resolve endpoint '{endpoint}': {message}")]
    Resolve {
        /// The endpoint name or address string.
        endpoint: String,
        /// Error message.
        message: String,
    },

    /// Failed to parse external status output (daemon CLI or hook file).
    #[error("Cannot parse {what}: {message}")]
    Parse {
        /// What was being parsed (e.g. "ipsec status output").
        what: String,
        /// Error message.
        message: String,
    },

    /// Config/state store operation failed.
    #[error("Store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g. "upsert", "delete").
        operation: String,
        /// Error message.
        message: String,
    },

    /// IPsec daemon lifecycle operation failed.
    #[error("IPsec daemon {operation} failed: {message}")]
    Daemon {
        /// The lifecycle operation ("start", "stop", "reload").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Tunnel or interface entry not found.
    #[error("Entry not found: {kind} '{name}'")]
    EntryNotFound {
        /// The entry kind ("tunnel", "interface").
        kind: String,
        /// The entry name.
        name: String,
    },

    /// IO error outside of command execution (config file generation).
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file or directory path involved.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl VpnError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a resolution error.
    pub fn resolve(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a daemon lifecycle error.
    pub fn daemon(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Daemon {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an entry not found error.
    pub fn entry_not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::EntryNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates an IO error wrapper.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition that
    /// is expected to self-heal on the next config or timer event.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VpnError::ShellCommandFailed { .. }
                | VpnError::Resolve { .. }
                | VpnError::Store { .. }
                | VpnError::Daemon { .. }
        )
    }
}
