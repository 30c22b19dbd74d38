//! Unified error type for the server core.
//!
//! Each port has its own error enum; they all convert into [`Error`] so the
//! startup path can use `?` throughout.  Every variant is `Copy`.

use core::fmt;

use crate::app::ports::{EngineError, StorageError, TransportError};

/// Every fatal path in the server funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Startup aborted; the device must not advertise.
    Init(&'static str),
    /// Configuration is invalid.
    Config(&'static str),
    /// Secure storage rejected an operation.
    Storage(StorageError),
    /// Storage accepted fewer bytes than requested.
    ShortWrite {
        key: &'static str,
        expected: usize,
        written: usize,
    },
    /// The BLE transport rejected an operation.
    Transport(TransportError),
    /// The protocol engine rejected an operation.
    Engine(EngineError),
    /// Operation requires a successful `begin`.
    NotStarted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::ShortWrite {
                key,
                expected,
                written,
            } => write!(f, "storage: short write of '{key}' ({written}/{expected} bytes)"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Engine(e) => write!(f, "engine: {e}"),
            Self::NotStarted => write!(f, "server not started"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
