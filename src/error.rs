use thiserror::Error;

use crate::manager::ManagerError;
use crate::stream::StreamError;
use crate::wal::WalError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// A thin wrapper over the per-capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Wal(#[from] WalError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // Stream errors are sticky: the stream never recovers without
            // operator action, so retrying the call cannot help.
            Error::Stream(_) => Transience::Permanent,
            Error::Manager(_) => Transience::Permanent,
            Error::Wal(WalError::Io { .. }) => Transience::Unknown,
            Error::Wal(_) => Transience::Permanent,
        }
    }
}
