#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod stream;
pub mod telemetry;
pub mod transport;
pub mod wal;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at the crate root for convenience
pub use crate::config::{Config, RetryConfig};
pub use crate::core::{FrameworkId, InvalidId, Limits, StatusUpdate, TaskId, TaskState, UpdateId};
pub use crate::manager::{Completion, ManagerError, StatusUpdateManager};
pub use crate::stream::{StreamError, UpdateOutcome, UpdateStream};
pub use crate::transport::{Endpoint, MasterTransport};
