//! Safety limits for checkpoint log records.

use serde::{Deserialize, Serialize};

/// Values are intentionally explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest record body (CBOR) accepted in a checkpoint log.
    pub max_record_bytes: usize,
    /// Longest text string accepted while decoding a record.
    pub max_text_len: usize,
    /// Largest opaque data payload carried by a single update.
    pub max_data_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_record_bytes: 1024 * 1024,
            max_text_len: 64 * 1024,
            max_data_bytes: 512 * 1024,
        }
    }
}
