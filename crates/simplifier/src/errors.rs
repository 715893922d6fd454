//! Simplifier error types

use lexplain_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimplifyError {
    #[error("Simplifier script not found: {0}")]
    ScriptNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stage input: {0}")]
    Staging(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<SimplifyError> for AppError {
    fn from(e: SimplifyError) -> Self {
        match e {
            SimplifyError::ScriptNotFound(path) => AppError::ScriptNotFound { path },
            SimplifyError::Spawn { program, source } => AppError::SpawnFailed {
                message: format!("{}: {}", program, source),
            },
            SimplifyError::Staging(message) => AppError::Internal { message },
            SimplifyError::IoError(e) => AppError::Internal {
                message: e.to_string(),
            },
        }
    }
}
