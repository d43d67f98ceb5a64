//! In-memory cache of the two live tile edges per level.
//!
//! During iteration two tiles matter at each level: the rightmost tile,
//! read over and over to recompute the tree hash, and the tile the walk
//! is currently passing through. Keeping exactly those two per level
//! suppresses nearly all redundant reads while tailing a growing log.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tessera_core::Tile;

use crate::error::{ClientError, Result};
use crate::source::TileSource;

#[derive(Clone)]
struct CachedTile {
    tile: Tile,
    data: Vec<u8>,
}

/// Two-slot-per-level memoizing layer over an inner [`TileSource`].
///
/// Owned by a single client; the interior lock only guards against
/// overlapping borrow shapes, not real concurrency.
pub(crate) struct EdgeCache<S> {
    inner: S,
    levels: Mutex<HashMap<i8, [Option<CachedTile>; 2]>>,
}

impl<S> EdgeCache<S> {
    pub(crate) fn new(inner: S) -> Self {
        EdgeCache {
            inner,
            levels: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn inner(&self) -> &S {
        &self.inner
    }
}

/// Slot ordering for displacement: an empty slot is less than any tile,
/// and occupied slots compare by `(index, width)`.
///
/// Panics if asked to compare tiles at different levels; the cache keys
/// slots by level so this never happens.
fn tile_less(a: Option<&Tile>, b: Option<&Tile>) -> bool {
    match (a, b) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(a), Some(b)) => {
            assert_eq!(a.level, b.level, "compared tiles at different levels");
            a.index < b.index || (a.index == b.index && a.width < b.width)
        }
    }
}

#[async_trait]
impl<S: TileSource> TileSource for EdgeCache<S> {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        let mut data: Vec<Option<Vec<u8>>> = vec![None; tiles.len()];
        let mut missing = Vec::new();
        {
            let levels = self.levels.lock().expect("lock poisoned");
            for (i, t) in tiles.iter().enumerate() {
                let hit = levels.get(&t.level).and_then(|slots| {
                    slots
                        .iter()
                        .flatten()
                        .find(|c| c.tile == *t)
                        .map(|c| c.data.clone())
                });
                match hit {
                    Some(d) => data[i] = Some(d),
                    None => missing.push(*t),
                }
            }
        }
        if !missing.is_empty() {
            let fetched = self.inner.read_tiles(&missing).await?;
            if fetched.len() != missing.len() {
                return Err(ClientError::SourceLength {
                    got: fetched.len(),
                    want: missing.len(),
                });
            }
            let mut fetched = fetched.into_iter();
            for slot in data.iter_mut() {
                if slot.is_none() {
                    *slot = fetched.next();
                }
            }
        }
        Ok(data.into_iter().map(|d| d.unwrap_or_default()).collect())
    }

    fn save_tiles(&self, tiles: &[Tile], data: &[Vec<u8>]) {
        // Anything already cached here was already saved by the lower
        // layers too; only forward the rest.
        let mut fwd_tiles = Vec::with_capacity(tiles.len());
        let mut fwd_data = Vec::with_capacity(tiles.len());
        {
            let levels = self.levels.lock().expect("lock poisoned");
            for (i, t) in tiles.iter().enumerate() {
                let cached = levels
                    .get(&t.level)
                    .is_some_and(|slots| slots.iter().flatten().any(|c| c.tile == *t));
                if !cached {
                    fwd_tiles.push(*t);
                    fwd_data.push(data[i].clone());
                }
            }
        }
        self.inner.save_tiles(&fwd_tiles, &fwd_data);

        let mut levels = self.levels.lock().expect("lock poisoned");
        for (i, t) in tiles.iter().enumerate() {
            let entry = CachedTile {
                tile: *t,
                data: data[i].clone(),
            };
            match levels.get_mut(&t.level) {
                None => {
                    levels.insert(t.level, [Some(entry), None]);
                }
                Some(slots) => {
                    let s0 = slots[0].as_ref().map(|c| &c.tile);
                    let s1 = slots[1].as_ref().map(|c| &c.tile);
                    if s0 == Some(&entry.tile) || s1 == Some(&entry.tile) {
                        // Already present; never displace with a duplicate.
                    } else if tile_less(s0, Some(&entry.tile)) && tile_less(s0, s1) {
                        slots[0] = Some(entry);
                    } else if tile_less(s1, Some(&entry.tile)) && tile_less(s1, s0) {
                        slots[1] = Some(entry);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves generated bytes for any tile and counts reads.
    struct StubSource {
        reads: AtomicUsize,
    }

    impl StubSource {
        fn new() -> Self {
            StubSource {
                reads: AtomicUsize::new(0),
            }
        }

        fn fill(t: &Tile) -> Vec<u8> {
            vec![t.index as u8 ^ t.width as u8; 4]
        }
    }

    #[async_trait]
    impl TileSource for StubSource {
        async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
            self.reads.fetch_add(tiles.len(), Ordering::SeqCst);
            Ok(tiles.iter().map(Self::fill).collect())
        }
    }

    fn tile(level: i8, index: u64, width: u32) -> Tile {
        Tile {
            height: 8,
            level,
            index,
            width,
        }
    }

    #[tokio::test]
    async fn serves_saved_tiles_without_inner_reads() {
        let cache = EdgeCache::new(StubSource::new());
        let tiles = [tile(0, 0, 256), tile(0, 1, 44)];
        let data = cache.read_tiles(&tiles).await.unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), 2);

        cache.save_tiles(&tiles, &data);
        let again = cache.read_tiles(&tiles).await.unwrap();
        assert_eq!(again, data);
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn splices_hits_and_misses_in_order() {
        let cache = EdgeCache::new(StubSource::new());
        let cached = [tile(0, 5, 256)];
        let data = cache.read_tiles(&cached).await.unwrap();
        cache.save_tiles(&cached, &data);

        let mixed = [tile(0, 4, 256), tile(0, 5, 256), tile(0, 6, 256)];
        let out = cache.read_tiles(&mixed).await.unwrap();
        assert_eq!(out[0], StubSource::fill(&mixed[0]));
        assert_eq!(out[1], data[0]);
        assert_eq!(out[2], StubSource::fill(&mixed[2]));
        // Only the two misses hit the inner source.
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn displaces_the_older_slot() {
        let cache = EdgeCache::new(StubSource::new());
        for t in [tile(0, 0, 256), tile(0, 1, 256), tile(0, 2, 256)] {
            let data = cache.read_tiles(&[t]).await.unwrap();
            cache.save_tiles(&[t], &data);
        }
        // Tiles 1 and 2 survive, tile 0 was displaced.
        let before = cache.inner().reads.load(Ordering::SeqCst);
        cache
            .read_tiles(&[tile(0, 1, 256), tile(0, 2, 256)])
            .await
            .unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), before);
        cache.read_tiles(&[tile(0, 0, 256)]).await.unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn keeps_filled_tile_and_new_edge() {
        let cache = EdgeCache::new(StubSource::new());
        // The partial right edge fills up, then the tree grows a fresh
        // partial edge one tile further right.
        for t in [tile(0, 1, 164), tile(0, 1, 256), tile(0, 2, 48)] {
            let data = cache.read_tiles(&[t]).await.unwrap();
            cache.save_tiles(&[t], &data);
        }
        let before = cache.inner().reads.load(Ordering::SeqCst);
        // The full tile and the new edge are cached; the stale partial
        // version of the filled tile is gone.
        cache
            .read_tiles(&[tile(0, 1, 256), tile(0, 2, 48)])
            .await
            .unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), before);
        cache.read_tiles(&[tile(0, 1, 164)]).await.unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn duplicate_save_keeps_both_slots() {
        let cache = EdgeCache::new(StubSource::new());
        for t in [tile(0, 1, 256), tile(0, 2, 256), tile(0, 1, 256)] {
            let data = cache.read_tiles(&[t]).await.unwrap();
            cache.save_tiles(&[t], &data);
        }
        let before = cache.inner().reads.load(Ordering::SeqCst);
        cache
            .read_tiles(&[tile(0, 1, 256), tile(0, 2, 256)])
            .await
            .unwrap();
        assert_eq!(cache.inner().reads.load(Ordering::SeqCst), before);
    }

    #[test]
    fn slot_ordering_treats_empty_as_least() {
        let a = tile(0, 3, 256);
        let b = tile(0, 3, 40);
        assert!(tile_less(None, Some(&a)));
        assert!(tile_less(None, None));
        assert!(!tile_less(Some(&a), None));
        assert!(tile_less(Some(&b), Some(&a)));
        assert!(!tile_less(Some(&a), Some(&b)));
    }

    #[test]
    #[should_panic(expected = "different levels")]
    fn slot_ordering_rejects_cross_level() {
        let a = tile(0, 0, 256);
        let b = tile(1, 0, 256);
        tile_less(Some(&a), Some(&b));
    }
}
