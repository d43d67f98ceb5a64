//! Tile coordinates and the stored-hash index numbering.
//!
//! Interior hashes of the tree are laid out in a dense linear ordering
//! where level 0's n-th hash is followed by the hashes of every subtree
//! that record completes. Tiles of height `H` slice that structure into
//! fragments covering `H` levels and `2^H` base hashes each; a tile's
//! published data is its bottom row of hashes, and everything above is
//! recomputed from it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, TlogError};
use crate::hash::{node_hash, Hash, HASH_SIZE};

/// The level used by tiles that carry raw record bytes instead of hashes.
pub const DATA_TILE_LEVEL: i8 = -1;

/// A tile address within a tiled log.
///
/// `height` is the log-wide tile height, `level` the tile level (with
/// [`DATA_TILE_LEVEL`] for data tiles), `index` the tile position within
/// its level, and `width` the number of base hashes (or records) present:
/// `1..=2^height`, with anything less than `2^height` marking a partial
/// tile at the right edge of the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub height: u8,
    pub level: i8,
    pub index: u64,
    pub width: u32,
}

impl Tile {
    /// A data tile holding `width` records starting at record
    /// `index * 2^height`.
    pub fn data(height: u8, index: u64, width: u32) -> Self {
        Tile {
            height,
            level: DATA_TILE_LEVEL,
            index,
            width,
        }
    }

    pub fn is_data(&self) -> bool {
        self.level == DATA_TILE_LEVEL
    }

    pub fn is_full(&self) -> bool {
        let full = 1u64.checked_shl(u32::from(self.height)).unwrap_or(0);
        u64::from(self.width) == full
    }

    /// The `k`-th tile parent of this hash tile in a tree with
    /// `tree_size` records, with its width clipped to the tree edge.
    /// `None` if the tree has no hashes at that position. Data tiles have
    /// no parents.
    pub fn parent(&self, k: u8, tree_size: u64) -> Option<Tile> {
        if self.level < 0 {
            return None;
        }
        let height = u32::from(self.height);
        let mut t = *self;
        t.level += k as i8;
        let up = u32::from(k) * height;
        t.index = if up >= 64 { 0 } else { self.index >> up };
        t.width = 1 << height;
        let level_shift = t.level as u32 * height;
        let max = if level_shift >= 64 {
            0
        } else {
            tree_size >> level_shift
        };
        let tile_start = t.index << height;
        if tile_start + u64::from(t.width) >= max {
            if tile_start >= max {
                return None;
            }
            t.width = (max - tile_start) as u32;
        }
        Some(t)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", tile_path(self))
    }
}

/// Map tree coordinates `(level, n)` to the dense stored-hash ordering.
///
/// Level 0's n-th hash is stored at `n + n/2 + n/4 + ...`, right after
/// the hashes of every subtree completed by earlier records.
pub fn stored_hash_index(level: u8, n: u64) -> u64 {
    // Work down to the level 0 ordering: level L's n-th hash is written
    // right after level L+1's (2n+1)-th hash.
    let mut n = n;
    for _ in 0..level {
        n = 2 * n + 1;
    }
    let mut i = 0u64;
    let mut x = n;
    while x > 0 {
        i += x;
        x >>= 1;
    }
    i + u64::from(level)
}

/// Inverse of [`stored_hash_index`].
pub fn split_stored_hash_index(index: u64) -> (u8, u64) {
    // Determine the last level 0 record stored at or before index.
    // stored_hash_index(0, n) < 2n, so the n we want is in
    // [index/2, index/2 + log2(index)].
    let mut n = index / 2;
    let mut index_n = stored_hash_index(0, n);
    loop {
        // Each new record n adds 1 + trailing_zeros(n+1) hashes.
        let x = index_n + 1 + u64::from((n + 1).trailing_zeros());
        if x > index {
            break;
        }
        n += 1;
        index_n = x;
    }
    // The hash we want was committed with record n, so it is one of
    // (0, n), (1, n/2), (2, n/4), ...
    let level = (index - index_n) as u8;
    (level, n >> level)
}

/// Number of stored hashes for a log with `n` records.
pub fn stored_hash_count(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    // Hashes up to the last record hash, plus the hashes of every subtree
    // that record completes.
    let mut count = stored_hash_index(0, n - 1) + 1;
    let mut i = n - 1;
    while i & 1 != 0 {
        count += 1;
        i >>= 1;
    }
    count
}

/// The hash tile of the given height storing stored-hash `index`, along
/// with the byte range within the tile data whose subtree hash is the
/// stored hash.
pub fn tile_for_index(height: u8, index: u64) -> (Tile, usize, usize) {
    let (level, n) = split_stored_hash_index(index);
    let tile_level = level / height;
    let in_tile = u32::from(level - tile_level * height);
    let tile_index = (n << in_tile) >> height;
    let n = n - ((tile_index << height) >> in_tile);
    let tile = Tile {
        height,
        level: tile_level as i8,
        index: tile_index,
        width: ((n + 1) << in_tile) as u32,
    };
    let start = ((n << in_tile) as usize) * HASH_SIZE;
    let end = (((n + 1) << in_tile) as usize) * HASH_SIZE;
    (tile, start, end)
}

/// Recover the stored hash at `index` from a tile's data, provided the
/// tile is [`tile_for_index`]'s tile for that index or a wider version
/// of it.
pub fn hash_from_tile(tile: &Tile, data: &[u8], index: u64) -> Result<Hash> {
    if tile.height < 1
        || tile.height > 30
        || tile.level < 0
        || tile.level >= 64
        || tile.width < 1
        || u64::from(tile.width) > 1 << tile.height
    {
        return Err(TlogError::InvalidTile(*tile));
    }
    let want = tile.width as usize * HASH_SIZE;
    if data.len() < want {
        return Err(TlogError::BadTileLength {
            tile: *tile,
            len: data.len(),
            want,
        });
    }
    let (t, start, end) = tile_for_index(tile.height, index);
    if t.level != tile.level || t.index != tile.index || t.width > tile.width {
        return Err(TlogError::IndexNotInTile {
            index,
            tile: *tile,
        });
    }
    Ok(subtree_hash(&data[start..end]))
}

/// Subtree hash over a power-of-two run of stored hashes.
pub(crate) fn subtree_hash(data: &[u8]) -> Hash {
    if data.len() == HASH_SIZE {
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(data);
        return Hash(h);
    }
    let half = data.len() / 2;
    node_hash(&subtree_hash(&data[..half]), &subtree_hash(&data[half..]))
}

/// Tile coordinate path for `tile`, following the tiled-log layout:
/// `tile/<level>/x<nnn>/.../<nnn>[.p/<width>]`, with data tiles under
/// `tile/entries/`.
pub fn tile_path(tile: &Tile) -> String {
    let level = if tile.is_data() {
        "entries".to_string()
    } else {
        tile.level.to_string()
    };
    let mut n_str = format!("{:03}", tile.index % 1000);
    let mut n = tile.index / 1000;
    while n > 0 {
        n_str = format!("x{:03}/{}", n % 1000, n_str);
        n /= 1000;
    }
    let p_str = if tile.is_full() {
        String::new()
    } else {
        format!(".p/{}", tile.width)
    };
    format!("tile/{level}/{n_str}{p_str}")
}
