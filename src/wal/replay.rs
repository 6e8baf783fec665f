//! Checkpoint log replay.
//!
//! Replay applies the same rules as live operation: an `UPDATE` enters the
//! received set and the pending queue, an `ACK` must match the pending head
//! and moves it to the acknowledged set. Any other shape means the log and
//! the stream diverged and the stream cannot be trusted.

use std::collections::{HashSet, VecDeque};
use std::io::Read;

use thiserror::Error;
use tracing::trace;

use super::frame::FrameReader;
use super::record::StatusUpdateRecord;
use super::WalError;
use crate::core::{Limits, StatusUpdate, UpdateId};

/// State reconstructed from a checkpoint log.
#[derive(Debug, Default)]
pub struct ReplayedState {
    pub received: HashSet<UpdateId>,
    pub acknowledged: HashSet<UpdateId>,
    pub pending: VecDeque<StatusUpdate>,
    /// Byte offset just past the last complete frame. Anything beyond this
    /// is a torn tail left by a crash mid-append.
    pub valid_len: u64,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("duplicate UPDATE record for {uuid}")]
    DuplicateUpdate { uuid: UpdateId },

    #[error("ACK record for {uuid} without a prior UPDATE")]
    AckWithoutUpdate { uuid: UpdateId },

    #[error("duplicate ACK record for {uuid}")]
    DuplicateAck { uuid: UpdateId },

    #[error("ACK record for {uuid} does not match pending head {head}")]
    AckOutOfOrder { uuid: UpdateId, head: UpdateId },

    #[error(transparent)]
    Wal(#[from] WalError),
}

pub fn replay_records<R: Read>(reader: R, limits: &Limits) -> Result<ReplayedState, ReplayError> {
    let mut frames = FrameReader::new(reader, limits.clone());
    let mut state = ReplayedState::default();

    while let Some(record) = frames.read_next()? {
        trace!(kind = record.kind(), uuid = %record.uuid(), "replaying checkpoint record");
        match record {
            StatusUpdateRecord::Update(update) => {
                if state.received.contains(&update.uuid) || state.acknowledged.contains(&update.uuid)
                {
                    return Err(ReplayError::DuplicateUpdate { uuid: update.uuid });
                }
                state.received.insert(update.uuid);
                state.pending.push_back(update);
            }
            StatusUpdateRecord::Ack(uuid) => {
                if !state.received.contains(&uuid) {
                    return Err(ReplayError::AckWithoutUpdate { uuid });
                }
                if state.acknowledged.contains(&uuid) {
                    return Err(ReplayError::DuplicateAck { uuid });
                }
                match state.pending.front() {
                    Some(head) if head.uuid == uuid => {
                        state.acknowledged.insert(uuid);
                        state.pending.pop_front();
                    }
                    Some(head) => {
                        return Err(ReplayError::AckOutOfOrder {
                            uuid,
                            head: head.uuid,
                        });
                    }
                    None => return Err(ReplayError::AckWithoutUpdate { uuid }),
                }
            }
        }
    }

    state.valid_len = frames.consumed();
    Ok(state)
}
