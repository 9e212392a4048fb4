//! Error types for the question answering pipeline.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the generation and logging paths.
///
/// `ModelLoad` is fatal and only produced while acquiring a model handle.
/// Every other variant is recoverable: it is surfaced to the caller, who
/// decides whether to retry or abort.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad(msg.into())
    }

    pub fn retrieval(msg: impl Into<String>) -> Self {
        Self::Retrieval(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error leaves the pipeline unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModelLoad(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
