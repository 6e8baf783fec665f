//! Per-task update stream.
//!
//! An `UpdateStream` owns the durable state of one task's status updates:
//! which updates have been received, which the framework has acknowledged,
//! and the FIFO of updates still awaiting acknowledgement. With a log path
//! it checkpoints every transition to disk; each append is flushed to
//! stable storage before the matching in-memory mutation becomes visible,
//! so replaying the log always reproduces the in-memory state.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::{FrameworkId, Limits, StatusUpdate, TaskId, UpdateId};
use crate::wal::{FrameWriter, StatusUpdateRecord, replay_records};

/// Sticky, non-retryable failure of a single stream.
///
/// Once set, every subsequent operation on the stream returns it; the log
/// file is closed and nothing further is appended.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("failed to create checkpoint directory {path:?}: {reason}")]
    CreateDir { path: PathBuf, reason: String },

    #[error("failed to open checkpoint log {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("failed to append {kind} record to {path:?}: {reason}")]
    Append {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("failed to recover checkpoint log {path:?}: {reason}")]
    Recover { path: PathBuf, reason: String },
}

/// What `update` did with an incoming status update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First sighting: durably recorded and queued for transmission.
    Recorded,
    /// Already received. The executor re-sent after the agent crashed
    /// between writing the record and acking the executor.
    Duplicate,
    /// Already acknowledged by the framework. The agent's ack to the
    /// executor was lost, so the executor re-sent.
    AlreadyAcknowledged,
}

pub struct UpdateStream {
    task_id: TaskId,
    framework_id: FrameworkId,
    path: Option<PathBuf>,
    file: Option<File>,
    limits: Limits,
    received: HashSet<UpdateId>,
    acknowledged: HashSet<UpdateId>,
    pending: VecDeque<StatusUpdate>,
    error: Option<StreamError>,
}

impl UpdateStream {
    /// Open a fresh stream, creating the checkpoint log when `path` is
    /// given. Without a path the stream is purely in-memory.
    ///
    /// Failures are recorded as the stream's sticky error rather than
    /// returned: the stream stays addressable and later operations surface
    /// the same error.
    pub fn create(
        task_id: TaskId,
        framework_id: FrameworkId,
        path: Option<&Path>,
        limits: Limits,
    ) -> Self {
        let mut stream = Self::empty(task_id, framework_id, path.map(Path::to_path_buf), limits);
        if let Some(path) = stream.path.clone() {
            match open_log(&path, true) {
                Ok(file) => stream.file = Some(file),
                Err(err) => {
                    error!(task = %stream.task_id, %err, "failed to open status update stream");
                    stream.error = Some(err);
                }
            }
        }
        stream
    }

    /// Rebuild a stream from an existing checkpoint log.
    ///
    /// Replays the log through the same rules as live operation. A torn
    /// final frame is truncated: the crash happened mid-append, so that
    /// append was never observable. Replay inconsistencies become the
    /// sticky error.
    pub fn recover(
        task_id: TaskId,
        framework_id: FrameworkId,
        path: &Path,
        limits: Limits,
    ) -> Self {
        let mut stream = Self::empty(task_id, framework_id, Some(path.to_path_buf()), limits);

        let mut file = match open_log(path, false) {
            Ok(file) => file,
            Err(err) => {
                error!(task = %stream.task_id, %err, "failed to open checkpoint log for recovery");
                stream.error = Some(err);
                return stream;
            }
        };

        let state = match replay_records(&mut file, &stream.limits) {
            Ok(state) => state,
            Err(err) => {
                let err = StreamError::Recover {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                };
                error!(task = %stream.task_id, %err, "checkpoint log replay failed");
                stream.error = Some(err);
                return stream;
            }
        };

        if let Err(reason) = position_for_append(&mut file, state.valid_len) {
            let err = StreamError::Recover {
                path: path.to_path_buf(),
                reason,
            };
            error!(task = %stream.task_id, %err, "failed to position checkpoint log");
            stream.error = Some(err);
            return stream;
        }

        info!(
            task = %stream.task_id,
            framework = %stream.framework_id,
            received = state.received.len(),
            acknowledged = state.acknowledged.len(),
            pending = state.pending.len(),
            "recovered status update stream"
        );

        stream.received = state.received;
        stream.acknowledged = state.acknowledged;
        stream.pending = state.pending;
        stream.file = Some(file);
        stream
    }

    fn empty(
        task_id: TaskId,
        framework_id: FrameworkId,
        path: Option<PathBuf>,
        limits: Limits,
    ) -> Self {
        Self {
            task_id,
            framework_id,
            path,
            file: None,
            limits,
            received: HashSet::new(),
            acknowledged: HashSet::new(),
            pending: VecDeque::new(),
            error: None,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn framework_id(&self) -> &FrameworkId {
        &self.framework_id
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub fn received(&self) -> &HashSet<UpdateId> {
        &self.received
    }

    pub fn acknowledged(&self) -> &HashSet<UpdateId> {
        &self.acknowledged
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &StatusUpdate> {
        self.pending.iter()
    }

    /// Record an incoming status update.
    ///
    /// Re-sends of updates already received or already acknowledged are
    /// no-ops: both happen legitimately when the agent crashed between a
    /// durable write and the corresponding ack to the executor.
    pub fn update(&mut self, update: &StatusUpdate) -> Result<UpdateOutcome, StreamError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        if self.acknowledged.contains(&update.uuid) {
            warn!(
                uuid = %update.uuid,
                task = %self.task_id,
                "ignoring status update already acknowledged by the framework"
            );
            return Ok(UpdateOutcome::AlreadyAcknowledged);
        }

        if self.received.contains(&update.uuid) {
            warn!(uuid = %update.uuid, task = %self.task_id, "ignoring duplicate status update");
            return Ok(UpdateOutcome::Duplicate);
        }

        self.append(StatusUpdateRecord::Update(update.clone()))?;
        self.received.insert(update.uuid);
        self.pending.push_back(update.clone());
        Ok(UpdateOutcome::Recorded)
    }

    /// Record the framework's acknowledgement of `update`, which must be
    /// the head of the pending queue.
    ///
    /// The caller pairs the framework's `uuid` with the head before calling.
    /// A mismatch here means the in-memory queue diverged from the
    /// acknowledgement path; continuing would corrupt the log, so this
    /// panics.
    pub fn acknowledgement(
        &mut self,
        uuid: UpdateId,
        update: &StatusUpdate,
    ) -> Result<(), StreamError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        assert_eq!(
            uuid, update.uuid,
            "acknowledgement uuid does not match the update it acknowledges"
        );

        self.append(StatusUpdateRecord::Ack(uuid))?;
        self.acknowledged.insert(uuid);
        self.pending.pop_front();
        Ok(())
    }

    /// Head of the pending queue, without mutation.
    pub fn next(&self) -> Result<Option<&StatusUpdate>, StreamError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(self.pending.front())
    }

    fn append(&mut self, record: StatusUpdateRecord) -> Result<(), StreamError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let kind = record.kind();
        debug!(kind, uuid = %record.uuid(), task = %self.task_id, "checkpointing record");

        if let Err(reason) = self.try_append(&record) {
            let err = StreamError::Append { kind, path, reason };
            error!(task = %self.task_id, %err, "stream entered terminal error state");
            self.file = None;
            self.error = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn try_append(&mut self, record: &StatusUpdateRecord) -> Result<(), String> {
        let Some(file) = self.file.as_mut() else {
            return Err("checkpoint log is not open".to_string());
        };
        let mut writer = FrameWriter::new(&mut *file, self.limits.clone());
        writer.write_record(record).map_err(|err| err.to_string())?;
        file.sync_all().map_err(|err| err.to_string())?;
        Ok(())
    }
}

fn open_log(path: &Path, create: bool) -> Result<File, StreamError> {
    if create && let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|err| StreamError::CreateDir {
            path: dir.to_path_buf(),
            reason: err.to_string(),
        })?;
    }

    let file = OpenOptions::new()
        .create(create)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| StreamError::Open {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = file.set_permissions(fs::Permissions::from_mode(0o647));
    }

    Ok(file)
}

fn position_for_append(file: &mut File, valid_len: u64) -> Result<(), String> {
    let actual_len = file.metadata().map_err(|err| err.to_string())?.len();
    if actual_len > valid_len {
        warn!(
            torn_bytes = actual_len - valid_len,
            "truncating torn tail of checkpoint log"
        );
        file.set_len(valid_len).map_err(|err| err.to_string())?;
    }
    file.seek(SeekFrom::Start(valid_len))
        .map_err(|err| err.to_string())?;
    Ok(())
}
