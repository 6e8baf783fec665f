//! Status updates as emitted by executors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::identity::{FrameworkId, TaskId, UpdateId};

/// Coarse task lifecycle state carried by a status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Failed => "FAILED",
            TaskState::Killed => "KILLED",
            TaskState::Lost => "LOST",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "STARTING" => Some(TaskState::Starting),
            "RUNNING" => Some(TaskState::Running),
            "FINISHED" => Some(TaskState::Finished),
            "FAILED" => Some(TaskState::Failed),
            "KILLED" => Some(TaskState::Killed),
            "LOST" => Some(TaskState::Lost),
            _ => None,
        }
    }

    /// Terminal states end the task; no further updates are expected after
    /// one of these is acknowledged.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

/// A single status update about a task.
///
/// Immutable once constructed. The pipeline keys on `uuid` only and treats
/// the rest as payload for the master; `uuid` must be globally unique per
/// update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub task_id: TaskId,
    pub uuid: UpdateId,
    pub state: TaskState,
    pub message: Option<String>,
    /// Opaque executor payload, passed through untouched.
    pub data: Bytes,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_string_roundtrip() {
        for state in [
            TaskState::Starting,
            TaskState::Running,
            TaskState::Finished,
            TaskState::Failed,
            TaskState::Killed,
            TaskState::Lost,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("UNKNOWN"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Starting.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }
}
