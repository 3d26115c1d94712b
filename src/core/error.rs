use thiserror::Error;

#[derive(Error, Debug)]
pub enum BafError {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Checksum mismatch for blob at {address} ({length} bytes)")]
    Integrity { address: u64, length: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Name is {len} bytes long, at most 255 bytes fit in a slot")]
    Capacity { len: usize },

    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse category of a [`BafError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Integrity,
    NotFound,
    Conflict,
    Capacity,
    InvalidName,
    Allocation,
    Config,
    Io,
}

impl BafError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BafError::Format(_) => ErrorKind::Format,
            BafError::Integrity { .. } => ErrorKind::Integrity,
            BafError::NotFound(_) => ErrorKind::NotFound,
            BafError::Conflict(_) => ErrorKind::Conflict,
            BafError::Capacity { .. } => ErrorKind::Capacity,
            BafError::InvalidName { .. } => ErrorKind::InvalidName,
            BafError::Allocation(_) => ErrorKind::Allocation,
            BafError::Config(_) => ErrorKind::Config,
            BafError::Io(_) => ErrorKind::Io,
        }
    }

    /// Map an I/O failure hit while decoding on-disk structures
    ///
    /// Running out of bytes means the archive is truncated, which is a format problem
    /// rather than a storage one.
    pub(crate) fn from_decode_io(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            BafError::Format(format!("Truncated {}", what))
        } else {
            BafError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, BafError>;
