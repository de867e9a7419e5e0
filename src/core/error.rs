use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Which side of a dual write (or which external collaborator) an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    DocumentStore,
    VectorStore,
    EmbeddingProvider,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Backend::DocumentStore => "document store",
            Backend::VectorStore => "vector store",
            Backend::EmbeddingProvider => "embedding provider",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum TaskmeshError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{backend} unavailable: {message}")]
    BackendUnavailable { backend: Backend, message: String },
    #[error("Partial write for '{id}': stored in {stored_in}, not in {failed_in}: {message}")]
    PartialWrite {
        id: String,
        stored_in: Backend,
        failed_in: Backend,
        message: String,
    },
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TaskmeshError {
    pub fn unavailable(backend: Backend, message: impl Into<String>) -> Self {
        TaskmeshError::BackendUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Re-attributes raw storage failures to `backend`. Already classified errors pass through.
    pub fn at_backend(self, backend: Backend) -> Self {
        match self {
            TaskmeshError::RusqliteError(e) => TaskmeshError::unavailable(backend, e.to_string()),
            TaskmeshError::IoError(e) => TaskmeshError::unavailable(backend, e.to_string()),
            other => other,
        }
    }

    /// Stable wire code for the RPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            TaskmeshError::ValidationError(_) => "validation_error",
            TaskmeshError::NotFound(_) => "not_found",
            TaskmeshError::BackendUnavailable { .. }
            | TaskmeshError::RusqliteError(_)
            | TaskmeshError::IoError(_) => "backend_unavailable",
            TaskmeshError::PartialWrite { .. } => "partial_write",
            TaskmeshError::Cancelled(_) => "cancelled",
            TaskmeshError::JsonError(_) => "internal_error",
        }
    }

    /// Structured detail the caller needs to retry or reconcile.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            TaskmeshError::BackendUnavailable { backend, .. } => {
                Some(serde_json::json!({ "backend": backend }))
            }
            TaskmeshError::RusqliteError(_) | TaskmeshError::IoError(_) => {
                Some(serde_json::json!({ "backend": Backend::DocumentStore }))
            }
            TaskmeshError::PartialWrite {
                id,
                stored_in,
                failed_in,
                ..
            } => Some(serde_json::json!({
                "id": id,
                "storedIn": stored_in,
                "failedIn": failed_in,
                "recovery": "discovery_reindex",
            })),
            _ => None,
        }
    }
}
