use thiserror::Error;
use super::types::{ParentId, RecordId, UploadState};

/// 选择阶段的拒绝原因，被拒绝的文件不会进入记录表
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{name}: file type {mime} is not accepted")]
    UnsupportedType {
        name: String,
        mime: String,
    },

    #[error("{name}: {size} bytes exceeds the limit of {max_size} bytes")]
    TooLarge {
        name: String,
        size: u64,
        max_size: u64,
    },

    #[error("{name}: the same file is already in the batch")]
    Duplicate {
        name: String,
    },

    #[error("Adding {attempted} files to {existing} would exceed the limit of {max_files}")]
    BatchTooLarge {
        attempted: usize,
        existing: usize,
        max_files: usize,
    },
}

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Transfer failed: {0}")]
    Failed(String),
}

impl TransferError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

/// 父实体服务错误
#[derive(Error, Debug)]
pub enum ParentServiceError {
    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Parent service unavailable: {0}")]
    Unavailable(String),
}

/// 会话错误
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    #[error("Record {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: RecordId,
        from: UploadState,
        to: UploadState,
    },

    #[error("Session is already attached to parent {0}")]
    ParentAlreadyAttached(ParentId),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Manager shutdown")]
    ManagerShutdown,
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
