//! Per-task checkpoint log: record schema, framing, replay.
//!
//! Each task with checkpointing enabled gets a single append-only file of
//! length-delimited records. A record is either the full update payload
//! (`UPDATE`) or an acknowledgement identifier (`ACK`). Replaying the file
//! in order reconstructs the stream's in-memory state after a crash.

use thiserror::Error;

pub mod frame;
pub mod record;
pub mod replay;

pub use frame::{FRAME_HEADER_LEN, FrameReader, FrameWriter, encode_frame};
pub use record::{RecordDecodeError, RecordEncodeError, StatusUpdateRecord};
pub use replay::{ReplayError, ReplayedState, replay_records};

#[derive(Debug, Error)]
pub enum WalError {
    #[error("checkpoint log io: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("bad frame magic {got:#010x}")]
    FrameMagicMismatch { got: u32 },

    #[error("invalid frame length: {reason}")]
    FrameLengthInvalid { reason: String },

    #[error("frame crc mismatch (expected {expected:#010x}, got {got:#010x})")]
    FrameCrcMismatch { expected: u32, got: u32 },

    #[error("record too large ({got_bytes} bytes, limit {max_bytes})")]
    RecordTooLarge { max_bytes: usize, got_bytes: usize },

    #[error("record encode: {0}")]
    Encode(#[from] RecordEncodeError),

    #[error("record decode: {0}")]
    Decode(#[from] RecordDecodeError),
}

pub type WalResult<T> = Result<T, WalError>;
