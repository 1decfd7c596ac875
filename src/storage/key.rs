//! Bucket key codec
//!
//! Keys within a tag bucket look like `2024-05-01T12:00:05Z-seq:<20 digits>`:
//! a second-resolution RFC3339 UTC timestamp followed by a zero-padded
//! per-store sequence number. The timestamp prefix is always 20 bytes for
//! years 0000..=9999, so byte-wise key order is chronological order, and the
//! sequence suffix keeps same-second writes unique and in write order.
//!
//! Range scans seek to the start prefix and stop at the first key whose
//! prefix (truncated to the length of the end bound) sorts after the end
//! bound, which makes the scan inclusive of every key in the end second.

use chrono::{DateTime, Utc};

use crate::storage::error::{StorageError, StorageResult};

/// 0000-01-01T00:00:00Z
pub const MIN_KEY_SECS: i64 = -62_167_219_200;
/// 9999-12-31T23:59:59Z
pub const MAX_KEY_SECS: i64 = 253_402_300_799;

const KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp as the fixed-width key prefix
pub fn time_prefix(secs: i64) -> Option<String> {
    if !(MIN_KEY_SECS..=MAX_KEY_SECS).contains(&secs) {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.format(KEY_FORMAT).to_string())
}

/// Reject timestamps outside years 0000..=9999, for every backend alike
pub fn check_timestamp(secs: i64) -> StorageResult<i64> {
    if (MIN_KEY_SECS..=MAX_KEY_SECS).contains(&secs) {
        Ok(secs)
    } else {
        Err(StorageError::InvalidTimestamp(secs))
    }
}

/// Build the full bucket key for a write
pub fn bucket_key(created_at: i64, seq: u64) -> StorageResult<String> {
    let prefix = time_prefix(created_at).ok_or(StorageError::InvalidTimestamp(created_at))?;
    Ok(format!("{}-seq:{:020}", prefix, seq))
}

/// Inclusive key bounds for `[until - range, until]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBounds {
    start: String,
    end: String,
    empty: bool,
}

impl ScanBounds {
    /// A bound outside the encodable years is clamped to the first/last key
    /// second. A window lying wholly outside them is empty.
    pub fn new(range_secs: i64, until_secs: i64) -> Self {
        let start = until_secs.saturating_sub(range_secs);
        let empty = start > until_secs || start > MAX_KEY_SECS || until_secs < MIN_KEY_SECS;
        Self {
            start: clamped_prefix(start),
            end: clamped_prefix(until_secs),
            empty,
        }
    }

    /// First key to seek to
    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// True once `key` lies beyond the end second
    pub fn past_end(&self, key: &str) -> bool {
        let key = key.as_bytes();
        let cut = key.len().min(self.end.len());
        &key[..cut] > self.end.as_bytes()
    }

    /// Nothing can match: inverted, or entirely before year 0000 or after 9999
    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

fn clamped_prefix(secs: i64) -> String {
    let secs = secs.clamp(MIN_KEY_SECS, MAX_KEY_SECS);
    // In range after the clamp, so formatting cannot fail.
    time_prefix(secs).unwrap_or_default()
}
