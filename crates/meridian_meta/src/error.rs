//! Status taxonomy shared by command handlers, the topology store, and the
//! replicated-log boundary.

use crate::proto::StatusCode;

pub type Result<T> = std::result::Result<T, MetaError>;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("incomplete: {0}")]
    Incomplete(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("io error: {0}")]
    Io(String),
}

impl MetaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetaError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MetaError::Conflict(_))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, MetaError::Incomplete(_))
    }

    pub fn code(&self) -> StatusCode {
        match self {
            MetaError::NotFound(_) => StatusCode::NotFound,
            MetaError::InvalidArgument(_) => StatusCode::InvalidArgument,
            MetaError::AlreadyExists(_) => StatusCode::AlreadyExists,
            MetaError::Conflict(_) => StatusCode::Conflict,
            MetaError::Corruption(_) => StatusCode::Corruption,
            MetaError::Incomplete(_) => StatusCode::Incomplete,
            MetaError::Timeout(_) => StatusCode::Timeout,
            MetaError::Io(_) => StatusCode::IoError,
        }
    }

    /// Rebuild the error a peer reported back over the wire.
    pub fn from_wire(code: StatusCode, msg: &str) -> Option<Self> {
        let msg = msg.to_string();
        match code {
            StatusCode::Ok => None,
            StatusCode::NotFound => Some(MetaError::NotFound(msg)),
            StatusCode::InvalidArgument => Some(MetaError::InvalidArgument(msg)),
            StatusCode::AlreadyExists => Some(MetaError::AlreadyExists(msg)),
            StatusCode::Conflict => Some(MetaError::Conflict(msg)),
            StatusCode::Corruption => Some(MetaError::Corruption(msg)),
            StatusCode::Incomplete => Some(MetaError::Incomplete(msg)),
            StatusCode::Timeout => Some(MetaError::Timeout(msg)),
            StatusCode::IoError => Some(MetaError::Io(msg)),
        }
    }
}

impl From<std::io::Error> for MetaError {
    fn from(err: std::io::Error) -> Self {
        MetaError::Io(err.to_string())
    }
}

impl From<prost::DecodeError> for MetaError {
    fn from(err: prost::DecodeError) -> Self {
        MetaError::Corruption(err.to_string())
    }
}
