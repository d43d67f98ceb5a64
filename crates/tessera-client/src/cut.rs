//! Splitting data tiles into entries.
//!
//! A data tile is a concatenation of variable-length entries; the log's
//! framing is not ours to know, so the caller supplies a cut function
//! (or picks one of the presets below). The cut function receives the
//! unconsumed remainder of a tile, never empty, and must not mutate it.

use std::sync::Arc;

use tessera_core::{record_hash, Hash};

use crate::error::BoxError;

/// One entry sliced off the front of a data tile.
pub struct CutEntry {
    /// The entry bytes, as they should be yielded to the consumer.
    pub entry: Vec<u8>,
    /// The record hash committing the entry to the tree.
    pub record_hash: Hash,
    /// How many bytes of the input the entry consumed (entry plus any
    /// framing). Must be at least 1 and at most the input length.
    pub consumed: usize,
}

/// A cut function: slices the next entry off a data tile.
pub type CutEntryFn = Arc<dyn Fn(&[u8]) -> Result<CutEntry, BoxError> + Send + Sync>;

/// Entries separated by blank lines.
///
/// The next entry runs up to (and keeps) the newline before the first
/// blank line; the blank line itself is consumed as framing. A tile with
/// no blank line left is one final entry. The record hash covers the
/// entry as yielded.
pub fn blank_line_entries() -> CutEntryFn {
    Arc::new(|tile| {
        let (entry, consumed) = match tile.windows(2).position(|w| w == b"\n\n") {
            // Keep one of the two newlines on the entry.
            Some(idx) => (tile[..idx + 1].to_vec(), idx + 2),
            None => (tile.to_vec(), tile.len()),
        };
        let record_hash = record_hash(&entry);
        Ok(CutEntry {
            entry,
            record_hash,
            consumed,
        })
    })
}

/// Entries framed by a 16-bit big-endian length prefix.
///
/// The record hash covers the raw entry bytes, without the prefix.
pub fn length_prefixed_entries() -> CutEntryFn {
    Arc::new(|tile| {
        if tile.len() < 2 {
            return Err("truncated length prefix".into());
        }
        let len = usize::from(u16::from_be_bytes([tile[0], tile[1]]));
        let end = 2 + len;
        if tile.len() < end {
            return Err(format!(
                "entry length {len} exceeds {} remaining bytes",
                tile.len() - 2
            )
            .into());
        }
        let entry = tile[2..end].to_vec();
        Ok(CutEntry {
            record_hash: record_hash(&entry),
            entry,
            consumed: end,
        })
    })
}
