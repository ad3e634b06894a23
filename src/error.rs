//! Centralized error types for devinbox.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the devinbox library.
#[derive(Error, Debug)]
pub enum DevinboxError {
    /// The recipient address does not end in the configured base domain.
    #[error("recipient '{0}' is outside the served domain")]
    InvalidDomain(String),

    /// No project exists for the recipient's subdomain slug.
    #[error("no project with slug '{0}'")]
    UnknownProject(String),

    /// A slug failed validation (lowercase alphanumeric and hyphens).
    #[error("invalid project slug '{0}'")]
    InvalidSlug(String),

    /// A project with this slug already exists.
    #[error("a project with slug '{0}' already exists")]
    SlugTaken(String),

    /// The MIME payload could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Writing an attachment blob failed.
    #[error("failed to write attachment '{path}': {source}")]
    AttachmentWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O error with the associated path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored record could not be decoded back into its domain type.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    /// The commit target project no longer exists.
    #[error("project no longer exists")]
    ProjectNotFound,

    /// No message with that id in the given project.
    #[error("message not found")]
    MessageNotFound,

    /// No attachment with that id in the given project.
    #[error("attachment not found")]
    AttachmentNotFound,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, DevinboxError>`.
pub type Result<T> = std::result::Result<T, DevinboxError>;

impl DevinboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a sending MTA should retry this failure later.
    ///
    /// Storage-side failures (blob writes, database, a project deleted
    /// mid-transaction) are transient: the message itself may well be
    /// deliverable once the operational problem clears. Routing and parse
    /// failures are permanent; retrying the same message cannot succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AttachmentWrite { .. }
                | Self::Io { .. }
                | Self::Database(_)
                | Self::Corrupt(_)
                | Self::ProjectNotFound
        )
    }
}
