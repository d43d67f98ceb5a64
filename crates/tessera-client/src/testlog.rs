//! In-memory log fixtures shared by the client tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tessera_core::{record_hash, tree_hash, Hash, Tile, Tree};

use crate::error::Result;
use crate::source::TileSource;
use crate::TILE_WIDTH;

/// A complete in-memory log in the blank-line entry format.
pub(crate) struct TestLog {
    entries: Vec<Vec<u8>>,
    leaves: Vec<Hash>,
}

impl TestLog {
    pub fn new(size: u64) -> Self {
        let entries: Vec<Vec<u8>> = (0..size)
            .map(|i| format!("entry {i}").into_bytes())
            .collect();
        let leaves = entries
            .iter()
            .map(|content| {
                let mut framed = content.clone();
                framed.push(b'\n');
                record_hash(&framed)
            })
            .collect();
        TestLog { entries, leaves }
    }

    /// Tree head over the first `size` entries.
    pub fn tree(&self, size: u64) -> Tree {
        Tree::new(size, tree_hash(&self.leaves[..size as usize]))
    }

    /// Entry `index` as the client yields it.
    pub fn entry(&self, index: u64) -> Vec<u8> {
        let mut framed = self.entries[index as usize].clone();
        framed.push(b'\n');
        framed
    }

    fn data_tile(&self, tile: &Tile) -> Vec<u8> {
        let start = (tile.index * TILE_WIDTH) as usize;
        let mut out = Vec::new();
        for content in &self.entries[start..start + tile.width as usize] {
            out.extend_from_slice(content);
            out.extend_from_slice(b"\n\n");
        }
        out
    }

    fn hash_tile(&self, tile: &Tile) -> Vec<u8> {
        let row_level = tile.level as u32 * u32::from(tile.height);
        let mut out = Vec::new();
        for i in 0..u64::from(tile.width) {
            let pos = (tile.index << tile.height) + i;
            let lo = (pos << row_level) as usize;
            let hi = ((pos + 1) << row_level) as usize;
            out.extend_from_slice(tree_hash(&self.leaves[lo..hi]).as_bytes());
        }
        out
    }

    pub fn tile(&self, tile: &Tile) -> Vec<u8> {
        if tile.is_data() {
            self.data_tile(tile)
        } else {
            self.hash_tile(tile)
        }
    }
}

/// Serves tiles straight out of a [`TestLog`], with optional data-tile
/// corruption for failure tests.
pub(crate) struct LogSource {
    log: Arc<TestLog>,
    data_suffix: Vec<u8>,
    drop_entries: usize,
}

impl LogSource {
    pub fn new(log: Arc<TestLog>) -> Self {
        LogSource {
            log,
            data_suffix: Vec::new(),
            drop_entries: 0,
        }
    }

    /// Append junk to every served data tile.
    pub fn with_data_tile_suffix(mut self, suffix: Vec<u8>) -> Self {
        self.data_suffix = suffix;
        self
    }

    /// Drop the bytes of the last `n` entries from every served data
    /// tile.
    pub fn with_data_tile_truncation(mut self, n: usize) -> Self {
        self.drop_entries = n;
        self
    }
}

#[async_trait]
impl TileSource for LogSource {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        Ok(tiles
            .iter()
            .map(|t| {
                if !t.is_data() {
                    return self.log.tile(t);
                }
                let keep = (t.width as usize).saturating_sub(self.drop_entries);
                let start = (t.index * TILE_WIDTH) as usize;
                let mut data = Vec::new();
                for content in &self.log.entries[start..start + keep] {
                    data.extend_from_slice(content);
                    data.extend_from_slice(b"\n\n");
                }
                data.extend_from_slice(&self.data_suffix);
                data
            })
            .collect())
    }
}

/// Records every read batch passing through to the inner source.
pub(crate) struct Recorder<S> {
    inner: S,
    batches: Mutex<Vec<Vec<Tile>>>,
}

impl<S> Recorder<S> {
    pub fn new(inner: S) -> Self {
        Recorder {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn read_batches(&self) -> Vec<Vec<Tile>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn clear_read_batches(&self) {
        self.batches.lock().unwrap().clear();
    }
}

#[async_trait]
impl<S: TileSource> TileSource for Recorder<S> {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        self.batches.lock().unwrap().push(tiles.to_vec());
        self.inner.read_tiles(tiles).await
    }

    fn save_tiles(&self, tiles: &[Tile], data: &[Vec<u8>]) {
        self.inner.save_tiles(tiles, data);
    }
}

/// Hangs on every read from the `after`-th call on (zero-based), to
/// exercise timeouts and cancellation.
pub(crate) struct Stall<S> {
    inner: S,
    after: usize,
    calls: AtomicUsize,
}

impl<S> Stall<S> {
    pub fn new(inner: S, after: usize) -> Self {
        Stall {
            inner,
            after,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: TileSource> TileSource for Stall<S> {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.after {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.read_tiles(tiles).await
    }
}
