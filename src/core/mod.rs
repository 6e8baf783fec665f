//! Core domain types.
//!
//! Module hierarchy follows type dependency order:
//! - identity: FrameworkId, TaskId, UpdateId
//! - update: TaskState, StatusUpdate
//! - limits: record size limits

pub mod identity;
pub mod limits;
pub mod update;

pub use identity::{FrameworkId, InvalidId, TaskId, UpdateId};
pub use limits::Limits;
pub use update::{StatusUpdate, TaskState};
