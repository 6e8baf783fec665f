//! Record framing (magic + length + crc32c).

use std::io::{Read, Write};

use crc32c::crc32c;

use super::record::StatusUpdateRecord;
use super::{WalError, WalResult};
use crate::core::Limits;

const FRAME_MAGIC: u32 = 0x5452_4C31; // "TRL1"
pub const FRAME_HEADER_LEN: usize = 12;

/// Reads length-delimited records off a checkpoint log.
///
/// A short read inside a frame (torn tail from a crash mid-append) reads as
/// end-of-log; `consumed()` reports the offset just past the last complete
/// frame so callers can truncate the tail.
pub struct FrameReader<R> {
    reader: R,
    limits: Limits,
    consumed: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, limits: Limits) -> Self {
        Self {
            reader,
            limits,
            consumed: 0,
        }
    }

    /// Byte offset just past the last fully decoded frame.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn read_next(&mut self) -> WalResult<Option<StatusUpdateRecord>> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = self
                .reader
                .read(&mut header[read..])
                .map_err(|source| WalError::Io { source })?;
            if n == 0 {
                return Ok(None);
            }
            read += n;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != FRAME_MAGIC {
            return Err(WalError::FrameMagicMismatch { got: magic });
        }

        let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if length == 0 {
            return Err(WalError::FrameLengthInvalid {
                reason: "frame length cannot be zero".to_string(),
            });
        }
        if length > self.limits.max_record_bytes {
            return Err(WalError::RecordTooLarge {
                max_bytes: self.limits.max_record_bytes,
                got_bytes: length,
            });
        }

        let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let mut body = vec![0u8; length];
        let mut read_body = 0usize;
        while read_body < length {
            let n = self
                .reader
                .read(&mut body[read_body..])
                .map_err(|source| WalError::Io { source })?;
            if n == 0 {
                return Ok(None);
            }
            read_body += n;
        }

        let actual_crc = crc32c(&body);
        if actual_crc != expected_crc {
            return Err(WalError::FrameCrcMismatch {
                expected: expected_crc,
                got: actual_crc,
            });
        }

        let record = StatusUpdateRecord::decode(&body, &self.limits)?;
        self.consumed += (FRAME_HEADER_LEN + length) as u64;
        Ok(Some(record))
    }
}

pub struct FrameWriter<W> {
    writer: W,
    limits: Limits,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W, limits: Limits) -> Self {
        Self { writer, limits }
    }

    pub fn write_record(&mut self, record: &StatusUpdateRecord) -> WalResult<usize> {
        let frame = encode_frame(record, &self.limits)?;
        self.writer
            .write_all(&frame)
            .map_err(|source| WalError::Io { source })?;
        Ok(frame.len())
    }
}

pub fn encode_frame(record: &StatusUpdateRecord, limits: &Limits) -> WalResult<Vec<u8>> {
    let body = record.encode()?;
    if body.len() > limits.max_record_bytes {
        return Err(WalError::RecordTooLarge {
            max_bytes: limits.max_record_bytes,
            got_bytes: body.len(),
        });
    }

    let length = u32::try_from(body.len()).map_err(|_| WalError::FrameLengthInvalid {
        reason: "frame length exceeds u32".to_string(),
    })?;
    let crc = crc32c(&body);

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}
