//! Checkpoint record schema and CBOR encoding.

use std::convert::Infallible;

use bytes::Bytes;
use minicbor::{Decoder, Encoder};
use thiserror::Error;

use crate::core::{FrameworkId, Limits, StatusUpdate, TaskId, TaskState, UpdateId};

/// A single entry in a task's checkpoint log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdateRecord {
    /// Full update payload, appended when the update is first received.
    Update(StatusUpdate),
    /// Identifier only, appended when the framework acknowledged the update.
    Ack(UpdateId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordType {
    Update,
    Ack,
}

impl RecordType {
    fn as_str(self) -> &'static str {
        match self {
            RecordType::Update => "UPDATE",
            RecordType::Ack => "ACK",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "UPDATE" => Some(RecordType::Update),
            "ACK" => Some(RecordType::Ack),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordEncodeError {
    #[error("cbor encode: {0}")]
    Cbor(#[from] minicbor::encode::Error<Infallible>),
}

#[derive(Debug, Error)]
pub enum RecordDecodeError {
    #[error("decode limit exceeded: {0}")]
    DecodeLimit(&'static str),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),
    #[error("trailing bytes after record body")]
    TrailingBytes,
    #[error("cbor decode: {0}")]
    Cbor(#[from] minicbor::decode::Error),
}

impl StatusUpdateRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StatusUpdateRecord::Update(_) => RecordType::Update.as_str(),
            StatusUpdateRecord::Ack(_) => RecordType::Ack.as_str(),
        }
    }

    pub fn uuid(&self) -> UpdateId {
        match self {
            StatusUpdateRecord::Update(update) => update.uuid,
            StatusUpdateRecord::Ack(uuid) => *uuid,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordEncodeError> {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        enc.map(2)?;
        enc.str("type")?;
        match self {
            StatusUpdateRecord::Update(update) => {
                enc.str(RecordType::Update.as_str())?;
                enc.str("update")?;
                encode_update(&mut enc, update)?;
            }
            StatusUpdateRecord::Ack(uuid) => {
                enc.str(RecordType::Ack.as_str())?;
                enc.str("uuid")?;
                enc.bytes(uuid.as_bytes())?;
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8], limits: &Limits) -> Result<Self, RecordDecodeError> {
        let mut dec = Decoder::new(bytes);
        let map_len = decode_map_len(&mut dec)?;

        let mut record_type = None;
        let mut update = None;
        let mut uuid = None;

        for _ in 0..map_len {
            let key = decode_text(&mut dec, limits)?;
            match key {
                "type" => {
                    let raw = decode_text(&mut dec, limits)?;
                    record_type = Some(
                        RecordType::parse(raw)
                            .ok_or_else(|| RecordDecodeError::UnknownRecordType(raw.to_string()))?,
                    );
                }
                "update" => update = Some(decode_update(&mut dec, limits)?),
                "uuid" => uuid = Some(decode_update_id(&mut dec)?),
                _ => {
                    dec.skip()?;
                }
            }
        }

        if dec.position() != bytes.len() {
            return Err(RecordDecodeError::TrailingBytes);
        }

        match record_type.ok_or(RecordDecodeError::MissingField("type"))? {
            RecordType::Update => Ok(StatusUpdateRecord::Update(
                update.ok_or(RecordDecodeError::MissingField("update"))?,
            )),
            RecordType::Ack => Ok(StatusUpdateRecord::Ack(
                uuid.ok_or(RecordDecodeError::MissingField("uuid"))?,
            )),
        }
    }
}

fn encode_update(
    enc: &mut Encoder<&mut Vec<u8>>,
    update: &StatusUpdate,
) -> Result<(), RecordEncodeError> {
    let mut len = 6;
    if update.message.is_some() {
        len += 1;
    }

    enc.map(len)?;
    enc.str("framework_id")?;
    enc.str(update.framework_id.as_str())?;
    enc.str("task_id")?;
    enc.str(update.task_id.as_str())?;
    enc.str("uuid")?;
    enc.bytes(update.uuid.as_bytes())?;
    enc.str("state")?;
    enc.str(update.state.as_str())?;
    if let Some(message) = &update.message {
        enc.str("message")?;
        enc.str(message)?;
    }
    enc.str("data")?;
    enc.bytes(update.data.as_ref())?;
    enc.str("timestamp_ms")?;
    enc.u64(update.timestamp_ms)?;
    Ok(())
}

fn decode_update(dec: &mut Decoder, limits: &Limits) -> Result<StatusUpdate, RecordDecodeError> {
    let map_len = decode_map_len(dec)?;

    let mut framework_id = None;
    let mut task_id = None;
    let mut uuid = None;
    let mut state = None;
    let mut message = None;
    let mut data = None;
    let mut timestamp_ms = None;

    for _ in 0..map_len {
        let key = decode_text(dec, limits)?;
        match key {
            "framework_id" => {
                let raw = decode_text(dec, limits)?;
                framework_id = Some(FrameworkId::new(raw).map_err(|err| {
                    RecordDecodeError::InvalidField {
                        field: "framework_id",
                        reason: err.to_string(),
                    }
                })?);
            }
            "task_id" => {
                let raw = decode_text(dec, limits)?;
                task_id =
                    Some(
                        TaskId::new(raw).map_err(|err| RecordDecodeError::InvalidField {
                            field: "task_id",
                            reason: err.to_string(),
                        })?,
                    );
            }
            "uuid" => uuid = Some(decode_update_id(dec)?),
            "state" => {
                let raw = decode_text(dec, limits)?;
                state = Some(TaskState::parse(raw).ok_or_else(|| {
                    RecordDecodeError::InvalidField {
                        field: "state",
                        reason: format!("unknown task state {raw:?}"),
                    }
                })?);
            }
            "message" => message = Some(decode_text(dec, limits)?.to_string()),
            "data" => {
                let raw = dec.bytes()?;
                if raw.len() > limits.max_data_bytes {
                    return Err(RecordDecodeError::DecodeLimit("data"));
                }
                data = Some(Bytes::copy_from_slice(raw));
            }
            "timestamp_ms" => timestamp_ms = Some(dec.u64()?),
            _ => {
                dec.skip()?;
            }
        }
    }

    Ok(StatusUpdate {
        framework_id: framework_id.ok_or(RecordDecodeError::MissingField("framework_id"))?,
        task_id: task_id.ok_or(RecordDecodeError::MissingField("task_id"))?,
        uuid: uuid.ok_or(RecordDecodeError::MissingField("uuid"))?,
        state: state.ok_or(RecordDecodeError::MissingField("state"))?,
        message,
        data: data.ok_or(RecordDecodeError::MissingField("data"))?,
        timestamp_ms: timestamp_ms.ok_or(RecordDecodeError::MissingField("timestamp_ms"))?,
    })
}

fn decode_update_id(dec: &mut Decoder) -> Result<UpdateId, RecordDecodeError> {
    let raw = dec.bytes()?;
    let bytes: [u8; 16] = raw
        .try_into()
        .map_err(|_| RecordDecodeError::InvalidField {
            field: "uuid",
            reason: format!("expected 16 bytes, got {}", raw.len()),
        })?;
    Ok(UpdateId::from_bytes(bytes))
}

fn decode_map_len(dec: &mut Decoder) -> Result<u64, RecordDecodeError> {
    match dec.map()? {
        Some(len) => Ok(len),
        None => Err(RecordDecodeError::IndefiniteLength),
    }
}

fn decode_text<'a>(dec: &mut Decoder<'a>, limits: &Limits) -> Result<&'a str, RecordDecodeError> {
    let raw = dec.str()?;
    if raw.len() > limits.max_text_len {
        return Err(RecordDecodeError::DecodeLimit("text"));
    }
    Ok(raw)
}
