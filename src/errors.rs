//! Error taxonomy for the compaction pipeline.
//!
//! Per-key errors are collected by the worker pool and never abort a batch;
//! only [`BatchError`] terminates a run.

use crate::{models::object_key::EntityId, services::retry::RetryError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(err) => is_retryable_io(err),
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            StoreError::Sqlx(sqlx::Error::Io(err)) => is_retryable_io(err),
            _ => false,
        }
    }
}

/// Whether an I/O error is transient and worth retrying.
pub fn is_retryable_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}

/// Failure of a shared upstream fetch.
///
/// `Clone` because one failed fetch is observed by every sibling key that
/// awaited it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream reported errors for entity {entity}: {}", messages.join("; "))]
    Reported {
        entity: EntityId,
        messages: Vec<String>,
    },
    #[error("entity {0} not found upstream")]
    Missing(EntityId),
    #[error("upstream unavailable for entity {entity}: {message}")]
    Unavailable { entity: EntityId, message: String },
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("`{program}` produced no output")]
    EmptyOutput { program: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("object `{0}` does not exist")]
    NotFound(String),
    #[error(transparent)]
    Store(StoreError),
    #[error("upstream data for `{key}`: {source}")]
    Upstream {
        key: String,
        #[source]
        source: UpstreamError,
    },
    #[error("render for `{key}` incomplete, could not load: {}", missing.join(", "))]
    PartialRender { key: String, missing: Vec<String> },
    #[error("transform for `{key}`: {source}")]
    Transform {
        key: String,
        #[source]
        source: TransformError,
    },
}

impl WorkflowError {
    pub fn is_transient(&self) -> bool {
        match self {
            WorkflowError::Store(err) => err.is_transient(),
            WorkflowError::Transform {
                source: TransformError::Io(err),
                ..
            } => is_retryable_io(err),
            _ => false,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => WorkflowError::NotFound(key),
            other => WorkflowError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("listing the page after {} failed: {source}", cursor.as_deref().unwrap_or("<start>"))]
    Enumeration {
        cursor: Option<String>,
        #[source]
        source: RetryError<StoreError>,
    },
}
