//! Error types shared by the marshaller and the storage engines.
//!
//! Two layers:
//! - [`EngineError`]: failures raised by a storage engine (I/O, corrupt
//!   container, stale handle, read-only handle, injected faults).
//! - [`StoreError`]: what callers of [`crate::Store`] see.  Engine failures
//!   during a raw transfer are wrapped in [`StoreError::TransferFailure`]
//!   together with the operation name and the dataset path; every other
//!   engine failure passes through as [`StoreError::Engine`].

use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::superblock::SuperblockError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Superblock error: {0}")]
    Superblock(#[from] SuperblockError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Index error: {0}")]
    Index(#[from] serde_json::Error),
    #[error("Corrupt container: {0}")]
    Corrupt(String),
    #[error("Invalid or closed handle {0}")]
    InvalidHandle(u64),
    #[error("Path conflict at {0}")]
    PathConflict(String),
    #[error("Parent group missing for {0}")]
    MissingGroup(String),
    #[error("Unsupported rank {0} (only 1 and 2 are stored)")]
    UnsupportedRank(usize),
    #[error("Extents {0:?} exceed the addressable size")]
    Oversized(Vec<u64>),
    #[error("Buffer holds {actual} bytes, dataset transfer needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("Container is read-only")]
    ReadOnly,
    #[error("Injected fault in {0}")]
    Injected(&'static str),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The element type, matrix depth/channel layout or on-disk tag has no
    /// known mapping.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
    /// The dataset exists but its rank, extents or tag disagree with what the
    /// requested container demands.
    #[error("Shape mismatch at {path}: expected {expected}, found {found}")]
    ShapeMismatch {
        path:     String,
        expected: String,
        found:    String,
    },
    /// No dataset at the path.
    #[error("No dataset at {0}")]
    NotFound(String),
    #[error("Transfer failure during {op} at {path}: {source}")]
    TransferFailure {
        op:     &'static str,
        path:   String,
        #[source]
        source: EngineError,
    },
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl StoreError {
    pub(crate) fn transfer(op: &'static str, path: &str, source: EngineError) -> Self {
        StoreError::TransferFailure { op, path: path.to_owned(), source }
    }

    pub(crate) fn mismatch(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        StoreError::ShapeMismatch {
            path:     path.to_owned(),
            expected: expected.into(),
            found:    found.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
