//! The streaming engine: batched, authenticated entry iteration.

use std::collections::VecDeque;
use std::time::Duration;

use tessera_core::{stored_hash_index, ProofPlan, Tile, Tree};

use crate::cancel::CancelToken;
use crate::cut::CutEntryFn;
use crate::edge::EdgeCache;
use crate::error::{ClientError, Result};
use crate::source::TileSource;
use crate::{TILE_HEIGHT, TILE_WIDTH};

/// Data tiles fetched per batch. Bounds request fan-out and the entries
/// held in memory at once.
const MAX_BATCH_TILES: u64 = 50;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A client that reads entries out of a tiled log through a
/// [`TileSource`], verifying every entry's inclusion under the tree head
/// before yielding it.
///
/// The source is wrapped in an in-memory cache of the two live tiles per
/// level, so steady-state tailing re-fetches almost nothing.
pub struct Client<S: TileSource> {
    source: EdgeCache<S>,
    cut: CutEntryFn,
    timeout: Duration,
    cancel: CancelToken,
    err: Option<ClientError>,
}

impl<S: TileSource> Client<S> {
    /// Create a client reading tiles from `source` and splitting data
    /// tiles with `cut`. The source would typically be a
    /// [`TileFetcher`], optionally wrapped in a [`PermanentCache`].
    ///
    /// [`TileFetcher`]: crate::TileFetcher
    /// [`PermanentCache`]: crate::PermanentCache
    pub fn new(source: S, cut: CutEntryFn) -> Self {
        Client {
            source: EdgeCache::new(source),
            cut,
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelToken::new(),
            err: None,
        }
    }

    /// Bound the time spent producing each next entry. Default: 5
    /// minutes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a cancellation signal; firing it ends any in-progress
    /// iteration and aborts in-flight tile reads.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The error that ended the latest [`entries`](Self::entries)
    /// iteration, if any. Must be consulted once the iterator is
    /// exhausted.
    pub fn err(&self) -> Option<&ClientError> {
        self.err.as_ref()
    }

    /// Iterate entries of `tree` starting at index `start`.
    ///
    /// The tree head must already be verified by the caller. Iteration
    /// may stop before `tree.size` to avoid fetching the trailing
    /// partial data tile; resuming with the same tree yields the
    /// remaining entries, but clients tailing a growing log should fetch
    /// a newer tree head and pass that instead.
    ///
    /// Check [`err`](Self::err) after the iterator is exhausted.
    pub fn entries(&mut self, tree: Tree, start: u64) -> Entries<'_, S> {
        self.err = None;
        Entries {
            client: self,
            tree,
            start,
            buffer: VecDeque::new(),
            pending_err: None,
            loaded_all: false,
            done: false,
        }
    }
}

/// Pull iterator over authenticated log entries, created by
/// [`Client::entries`].
///
/// Dropping it mid-iteration cancels any in-flight tile reads.
pub struct Entries<'a, S: TileSource> {
    client: &'a mut Client<S>,
    tree: Tree,
    /// Next index not yet consumed from the log; entries below the
    /// caller's original start are cut and verified but not yielded.
    start: u64,
    buffer: VecDeque<(u64, Vec<u8>)>,
    /// A batch failure noticed while verified entries were still
    /// buffered; surfaced once the buffer drains.
    pending_err: Option<ClientError>,
    loaded_all: bool,
    done: bool,
}

impl<S: TileSource> Entries<'_, S> {
    /// The next `(index, entry)` pair, or `None` when iteration is over.
    /// Indexes ascend contiguously from the first yielded index.
    pub async fn next(&mut self) -> Option<(u64, Vec<u8>)> {
        if self.done {
            return None;
        }
        if self.client.cancel.is_cancelled() {
            self.fail(ClientError::Cancelled);
            return None;
        }
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if let Some(err) = self.pending_err.take() {
                self.fail(err);
                return None;
            }
            if self.loaded_all {
                self.done = true;
                return None;
            }

            let cancel = self.client.cancel.clone();
            let timeout = self.client.timeout;
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                loaded = tokio::time::timeout(timeout, self.load_batch()) => {
                    match loaded {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::Timeout),
                    }
                }
            };
            if let Err(err) = result {
                if self.buffer.is_empty() {
                    self.fail(err);
                    return None;
                }
                // Entries already verified still get yielded; the error
                // follows them.
                self.pending_err = Some(err);
            }
        }
    }

    fn fail(&mut self, err: ClientError) {
        self.client.err = Some(err);
        self.done = true;
    }

    /// Fetch, authenticate, and buffer the next run of data tiles.
    async fn load_batch(&mut self) -> Result<()> {
        let tree = self.tree;
        if self.start > tree.size {
            return Err(ClientError::Config(format!(
                "start index {} is beyond tree size {}",
                self.start, tree.size
            )));
        }

        let base = self.start / TILE_WIDTH * TILE_WIDTH;
        // Don't fetch the trailing partial tile while full tiles remain:
        // in steady state a later call passes a bigger tree where that
        // tile is full. Once start reaches the partial tile, fetch it.
        let mut top = tree.size / TILE_WIDTH * TILE_WIDTH;
        if top == base {
            top = tree.size;
        }

        let mut tiles = Vec::new();
        for k in 0..MAX_BATCH_TILES {
            let tile_start = base + k * TILE_WIDTH;
            if tile_start >= top {
                break;
            }
            let tile_end = (tile_start + TILE_WIDTH).min(top);
            tiles.push(Tile::data(
                TILE_HEIGHT,
                tile_start / TILE_WIDTH,
                (tile_end - tile_start) as u32,
            ));
        }
        if tiles.is_empty() {
            self.loaded_all = true;
            return Ok(());
        }

        let tile_data = self.client.source.read_tiles(&tiles).await?;

        // Authenticate the whole batch's leaf hashes before yielding
        // anything out of it.
        let mut indexes = Vec::with_capacity(tiles.len() * TILE_WIDTH as usize);
        for t in &tiles {
            for i in 0..u64::from(t.width) {
                indexes.push(stored_hash_index(0, t.index * TILE_WIDTH + i));
            }
        }
        let plan = ProofPlan::new(&tree, TILE_HEIGHT, &indexes)?;
        let plan_data = self.client.source.read_tiles(plan.tiles()).await?;
        let hashes = plan.authenticate(&plan_data)?;
        self.client.source.save_tiles(plan.tiles(), &plan_data);

        for (ti, tile) in tiles.iter().enumerate() {
            let tile_start = tile.index * TILE_WIDTH;
            let tile_end = tile_start + u64::from(tile.width);
            let mut data: &[u8] = &tile_data[ti];
            for i in tile_start..tile_end {
                if data.is_empty() {
                    return Err(ClientError::TruncatedTile(tile.index));
                }
                let cut = (self.client.cut)(data)
                    .map_err(|source| ClientError::Cut { index: i, source })?;
                if cut.consumed == 0 || cut.consumed > data.len() {
                    return Err(ClientError::Cut {
                        index: i,
                        source: format!(
                            "cut consumed {} of {} bytes",
                            cut.consumed,
                            data.len()
                        )
                        .into(),
                    });
                }
                if cut.record_hash != hashes[(i - base) as usize] {
                    return Err(ClientError::HashMismatch(i));
                }
                data = &data[cut.consumed..];
                if i >= self.start {
                    self.buffer.push_back((i, cut.entry));
                }
            }
            if !data.is_empty() {
                return Err(ClientError::LeftoverTileData(tile.index));
            }
            self.start = tile_end;
        }

        self.client.source.save_tiles(&tiles, &tile_data);

        if self.start == top {
            self.loaded_all = true;
        }
        Ok(())
    }
}
