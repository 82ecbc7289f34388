//! Error types shared by the fetch layer, the lazy reader and the pipeline.

use reqwest::StatusCode;
use thiserror::Error;

use crate::net::ClientErrorKind;

/// Which side of the pipeline raised an unrecovered error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Producer,
    Consumer,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Producer => f.write_str("producer"),
            PipelineStage::Consumer => f.write_str("consumer"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{url}: not found")]
    NotFound { url: String },

    #[error("{url}: giving up after {attempts} timed out attempt(s)")]
    RetryExhausted { url: String, attempts: u32 },

    #[error("{url}: unexpected HTTP status {status}")]
    RemoteStatus { url: String, status: StatusCode },

    #[error("{url}: {kind} error: {message}")]
    Transport {
        url: String,
        kind: ClientErrorKind,
        message: String,
    },

    #[error("{url}: remote server does not support Range requests")]
    RangeUnsupported { url: String },

    #[error("{url}: remote server did not return Content-Length")]
    MissingContentLength { url: String },

    #[error("{url}: expected {expected} bytes from range {start}-{end}, got {received}")]
    ShortBody {
        url: String,
        start: u64,
        end: u64,
        expected: u64,
        received: u64,
    },

    #[error("not a valid ZIP archive: {0}")]
    InvalidContainer(String),

    #[error("unsupported compression method {method} for {file_name}")]
    UnsupportedCompression { file_name: String, method: u16 },

    #[error("{name}: simple index reports serial {simple} but JSON API reports {json}")]
    InconsistentSource { name: String, simple: u64, json: u64 },

    #[error("pipeline {stage} failed: {source:#}")]
    PipelineFailure {
        stage: PipelineStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("lazy remote file is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
