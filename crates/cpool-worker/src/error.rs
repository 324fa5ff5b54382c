//! Worker error types.

use thiserror::Error;

use cpool_core::{CodecError, ErrorInfo};

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// A coordinator bug: the request can never succeed on this worker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("call to `{0}` on uninitialized compiler worker")]
    NotInitialized(String),

    #[error("compiler worker is already initialized")]
    AlreadyInitialized,

    #[error("database `{dbname}` is not cached and no `{field}` was supplied")]
    IncompleteDatabaseState { dbname: String, field: &'static str },

    #[error("database `{0}` is not cached on this worker")]
    UnknownDatabase(String),

    #[error("no transaction state is cached on this worker")]
    NoCachedTxState,

    #[error("transaction state needs a database name or a user schema")]
    MissingRootSchema,
}

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// Any failure while reconciling the worker's cache with the
    /// coordinator. Evictions applied before the failure are kept.
    #[error("failed to sync worker state: {kind}({message})")]
    FailedStateSync {
        kind: &'static str,
        message: String,
        #[source]
        source: Box<WorkerError>,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("compiler error: {0}")]
    Compiler(#[from] anyhow::Error),

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
}

impl WorkerError {
    /// Wrap a failure raised inside the sync step.
    pub fn failed_sync(err: WorkerError) -> Self {
        Self::FailedStateSync {
            kind: err.kind(),
            message: err.to_string(),
            source: Box::new(err),
        }
    }

    /// Short name of the error kind, as reported to the coordinator.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Contract(_) => "ContractViolation",
            Self::FailedStateSync { .. } => "FailedStateSync",
            Self::Codec(CodecError::Encode(_)) => "EncodeError",
            Self::Codec(CodecError::Decode(_)) => "DecodeError",
            Self::Compiler(_) => "CompilerError",
            Self::Io(_) => "IoError",
            Self::FrameTooLarge { .. } => "FrameTooLarge",
        }
    }

    /// Check if this error, or the failure it wraps, is a contract violation.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::Contract(_) => true,
            Self::FailedStateSync { source, .. } => source.is_contract_violation(),
            _ => false,
        }
    }

    /// The worker must stop serving after reporting this error.
    pub fn is_fatal(&self) -> bool {
        self.is_contract_violation()
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
            fatal: self.is_fatal(),
        }
    }
}
