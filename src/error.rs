//! Domain-specific error types for kagami.
//!
//! This module defines `KagamiError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of an image build.
//! Public API functions return `Result<T, KagamiError>` for programmatic error
//! handling, while phase step functions and trait boundaries use `anyhow::Result`.
//!
//! `KagamiError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at boundaries that return `anyhow::Result`.

use std::io;

use crate::executor::{CommandSpec, format_command_args};

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to including the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        io::ErrorKind::NotADirectory => "I/O error: not a directory".to_string(),
        io::ErrorKind::AlreadyExists => "I/O error: already exists".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for kagami.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KagamiError {
    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A command execution failed (non-zero exit, spawn failure, wait failure, thread panic, etc.).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Human-readable reason for the failure: exit code, signal information,
        /// or a description of the internal error.
        status: String,
    },

    /// A bind mount or unmount inside the chroot failed.
    #[error("mount error: {0}")]
    Mount(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The host does not satisfy the build prerequisites (tools, privileges).
    #[error("prerequisite check failed: {0}")]
    Prerequisite(String),

    /// A mandatory build artifact could not be located.
    #[error("mandatory component not found: {0}")]
    MissingComponent(String),

    /// Another build holds the workspace lock.
    #[error("workspace is locked by another build: {0}")]
    Locked(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually including a path.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },

    /// A pipeline phase failed; carries the phase position and the root cause.
    #[error("[{index}/{total}] {label} failed: {cause:#}")]
    Phase {
        /// 1-based ordinal of the failed phase.
        index: usize,
        /// Number of phases in the pipeline.
        total: usize,
        /// Human-readable phase label.
        label: &'static str,
        /// Underlying error with its context chain.
        cause: anyhow::Error,
    },

    /// The build was abandoned at a phase boundary.
    #[error("build cancelled after {completed} of {total} phase(s)")]
    Cancelled {
        /// Number of phases that completed before cancellation was observed.
        completed: usize,
        /// Number of phases in the pipeline.
        total: usize,
    },
}

impl KagamiError {
    /// Creates an `Io` variant with the `message` field automatically derived
    /// from the `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates an `Execution` variant describing a finished command.
    pub(crate) fn execution(spec: &CommandSpec, status: impl Into<String>) -> Self {
        Self::Execution {
            command: format!("{} {}", spec.command, format_command_args(&spec.args)),
            status: status.into(),
        }
    }

    /// Returns the failed phase label if this is a `Phase` error.
    pub fn phase_label(&self) -> Option<&'static str> {
        match self {
            Self::Phase { label, .. } => Some(label),
            _ => None,
        }
    }
}
