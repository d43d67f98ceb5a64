//! Authentication of stored hashes against a trusted tree head.
//!
//! Authenticating a batch of stored-hash indexes takes two steps with a
//! fetch in between, so that all tile I/O stays in the caller's hands:
//!
//! 1. [`ProofPlan::new`] computes the set of hash tiles needed to both
//!    recompute the tree head from the right edge and reach every
//!    requested index, parents ordered before children.
//! 2. The caller fetches those tiles however it likes and hands the bytes
//!    to [`ProofPlan::authenticate`], which fails closed: the recomputed
//!    root must equal the trusted root, and every remaining tile must
//!    hash to the value embedded in its parent, before any requested
//!    hash is returned.
//!
//! The right-edge tiles are fully covered by the subtree decomposition of
//! the tree size, so matching the root authenticates every byte of them;
//! all other planned tiles are full and are checked against their
//! parents.

use std::collections::HashMap;

use crate::error::{Result, TlogError};
use crate::hash::{max_pow2, node_hash, Hash, HASH_SIZE};
use crate::tile::{hash_from_tile, stored_hash_index, subtree_hash, tile_for_index, Tile};
use crate::Tree;

/// A planned set of tile fetches that will authenticate a batch of
/// stored-hash indexes against one tree head.
#[derive(Debug)]
pub struct ProofPlan {
    root: Hash,
    size: u64,
    height: u8,
    indexes: Vec<u64>,
    tiles: Vec<Tile>,
    tile_order: HashMap<Tile, usize>,
    /// Tiles in `tiles[..edge_tiles]` are authenticated by recomputing
    /// the root; the rest are checked against their parents.
    edge_tiles: usize,
    stx: Vec<u64>,
    stx_tile_order: Vec<usize>,
    index_tile_order: Vec<usize>,
}

impl ProofPlan {
    /// Plan the tile fetches needed to authenticate `indexes` (stored-hash
    /// indexes) against `tree`, using hash tiles of the given height.
    pub fn new(tree: &Tree, height: u8, indexes: &[u64]) -> Result<Self> {
        let mut tiles = Vec::new();
        let mut tile_order: HashMap<Tile, usize> = HashMap::new();

        // Tiles needed to recompute the tree head. If the recomputation
        // matches, these tiles are authenticated.
        let stx = subtree_indexes(0, tree.size);
        let mut stx_tile_order = vec![0usize; stx.len()];
        for (i, &x) in stx.iter().enumerate() {
            let (t, _, _) = tile_for_index(height, x);
            let t = t
                .parent(0, tree.size)
                .ok_or(TlogError::PlanInvariant("edge tile outside tree"))?;
            if let Some(&j) = tile_order.get(&t) {
                stx_tile_order[i] = j;
                continue;
            }
            stx_tile_order[i] = tiles.len();
            tile_order.insert(t, tiles.len());
            tiles.push(t);
        }
        let edge_tiles = tiles.len();

        // Tiles containing the requested indexes, along with any parent
        // tiles needed for authentication. For most batches the parents
        // are being fetched anyway.
        let leaf_limit = stored_hash_index(0, tree.size);
        let mut index_tile_order = vec![0usize; indexes.len()];
        for (i, &x) in indexes.iter().enumerate() {
            if x >= leaf_limit {
                return Err(TlogError::IndexOutOfTree {
                    index: x,
                    size: tree.size,
                });
            }
            let (t, _, _) = tile_for_index(height, x);

            // Walk up until we reach a tile already planned; that one is
            // (or will be) authenticated.
            let mut k = 0u8;
            loop {
                let p = t
                    .parent(k, tree.size)
                    .ok_or(TlogError::PlanInvariant("ran out of tile parents"))?;
                if let Some(&j) = tile_order.get(&p) {
                    if k == 0 {
                        index_tile_order[i] = j;
                    }
                    break;
                }
                k += 1;
            }

            // Walk back down recording child tiles after their parents.
            while k > 0 {
                k -= 1;
                let p = t
                    .parent(k, tree.size)
                    .ok_or(TlogError::PlanInvariant("ran out of tile parents"))?;
                if !p.is_full() {
                    // Only full tiles have parents.
                    return Err(TlogError::PlanInvariant("partial tile below a parent"));
                }
                tile_order.insert(p, tiles.len());
                if k == 0 {
                    index_tile_order[i] = tiles.len();
                }
                tiles.push(p);
            }
        }

        Ok(ProofPlan {
            root: tree.hash,
            size: tree.size,
            height,
            indexes: indexes.to_vec(),
            tiles,
            tile_order,
            edge_tiles,
            stx,
            stx_tile_order,
            index_tile_order,
        })
    }

    /// The tiles to fetch, in order. The caller must hand
    /// [`authenticate`](Self::authenticate) one data buffer per tile, in
    /// the same order.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Verify the fetched tile data against the tree head and return the
    /// requested stored hashes, in the order the indexes were given.
    pub fn authenticate(&self, data: &[Vec<u8>]) -> Result<Vec<Hash>> {
        if data.len() != self.tiles.len() {
            return Err(TlogError::BadTileCount {
                got: data.len(),
                want: self.tiles.len(),
            });
        }
        for (tile, buf) in self.tiles.iter().zip(data) {
            let want = tile.width as usize * HASH_SIZE;
            if buf.len() != want {
                return Err(TlogError::BadTileLength {
                    tile: *tile,
                    len: buf.len(),
                    want,
                });
            }
        }

        if self.stx.is_empty() {
            // Empty tree: nothing to authenticate, nothing to return.
            return Ok(Vec::new());
        }

        // Recompute the tree head from the subtree decomposition,
        // right to left.
        let last = self.stx.len() - 1;
        let j = self.stx_tile_order[last];
        let mut th = hash_from_tile(&self.tiles[j], &data[j], self.stx[last])?;
        for i in (0..last).rev() {
            let j = self.stx_tile_order[i];
            let h = hash_from_tile(&self.tiles[j], &data[j], self.stx[i])?;
            th = node_hash(&h, &th);
        }
        if th != self.root {
            // At least one tile is wrong, but there is no telling which.
            return Err(TlogError::InconsistentTile);
        }

        // Check the remaining (full) tiles against their parents, which
        // are authenticated first because parents precede children.
        for i in self.edge_tiles..self.tiles.len() {
            let tile = self.tiles[i];
            let p = tile
                .parent(1, self.size)
                .ok_or(TlogError::PlanInvariant("lost parent of planned tile"))?;
            let j = *self
                .tile_order
                .get(&p)
                .ok_or(TlogError::PlanInvariant("parent of planned tile not planned"))?;
            let want = hash_from_tile(
                &p,
                &data[j],
                stored_hash_index(p.level as u8 * self.height, tile.index),
            )?;
            if want != subtree_hash(&data[i]) {
                return Err(TlogError::InconsistentTile);
            }
        }

        // Every tile is authenticated; pull out the requested hashes.
        let mut hashes = Vec::with_capacity(self.indexes.len());
        for (i, &x) in self.indexes.iter().enumerate() {
            let j = self.index_tile_order[i];
            hashes.push(hash_from_tile(&self.tiles[j], &data[j], x)?);
        }
        Ok(hashes)
    }
}

/// Stored-hash indexes of the subtree decomposition of records
/// `[lo, hi)`: the roots whose hashes fold (right to left) into the hash
/// of that range.
fn subtree_indexes(mut lo: u64, hi: u64) -> Vec<u64> {
    let mut need = Vec::new();
    while lo < hi {
        let (k, level) = max_pow2(hi - lo + 1);
        debug_assert_eq!(lo & (k - 1), 0, "unaligned subtree split");
        need.push(stored_hash_index(level, lo >> level));
        lo += k;
    }
    need
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{record_hash, tree_hash};
    use crate::tile::split_stored_hash_index;

    fn leaves(n: u64) -> Vec<Hash> {
        (0..n).map(|i| record_hash(&i.to_be_bytes())).collect()
    }

    /// Serve a hash tile's data from the leaf hashes: the tile's bottom
    /// row is the subtree hashes at tree level `level * height`.
    fn tile_data(leaves: &[Hash], t: &Tile) -> Vec<u8> {
        let row_level = t.level as u32 * u32::from(t.height);
        let mut out = Vec::new();
        for i in 0..u64::from(t.width) {
            let pos = (t.index << t.height) + i;
            let lo = (pos << row_level) as usize;
            let hi = ((pos + 1) << row_level) as usize;
            out.extend_from_slice(&tree_hash(&leaves[lo..hi]).0);
        }
        out
    }

    fn tree_of(leaves: &[Hash]) -> Tree {
        Tree::new(leaves.len() as u64, tree_hash(leaves))
    }

    #[test]
    fn subtree_indexes_decompose_greedily() {
        // 300 = 256 + 32 + 8 + 4.
        let stx = subtree_indexes(0, 300);
        let got: Vec<(u8, u64)> = stx.iter().map(|&x| split_stored_hash_index(x)).collect();
        assert_eq!(got, vec![(8, 0), (5, 8), (3, 36), (2, 74)]);
    }

    #[test]
    fn authenticates_leaf_hashes() {
        let leaves = leaves(300);
        let tree = tree_of(&leaves);
        let indexes: Vec<u64> = [0u64, 17, 255, 256, 299]
            .iter()
            .map(|&n| stored_hash_index(0, n))
            .collect();

        let plan = ProofPlan::new(&tree, 8, &indexes).unwrap();
        let data: Vec<Vec<u8>> = plan.tiles().iter().map(|t| tile_data(&leaves, t)).collect();
        let hashes = plan.authenticate(&data).unwrap();

        assert_eq!(hashes, vec![leaves[0], leaves[17], leaves[255], leaves[256], leaves[299]]);
    }

    #[test]
    fn authenticates_across_tile_levels() {
        // Big enough that level-1 hash tiles exist and the requested
        // leaves sit under a full level-1 parent.
        let leaves = leaves(66_000);
        let tree = tree_of(&leaves);
        let indexes: Vec<u64> = [0u64, 511, 40_000, 65_999]
            .iter()
            .map(|&n| stored_hash_index(0, n))
            .collect();

        let plan = ProofPlan::new(&tree, 8, &indexes).unwrap();
        // Tiles are planned once each.
        let mut seen = std::collections::HashSet::new();
        assert!(plan.tiles().iter().all(|t| seen.insert(*t)));

        let data: Vec<Vec<u8>> = plan.tiles().iter().map(|t| tile_data(&leaves, t)).collect();
        let hashes = plan.authenticate(&data).unwrap();
        assert_eq!(
            hashes,
            vec![leaves[0], leaves[511], leaves[40_000], leaves[65_999]]
        );
    }

    #[test]
    fn rejects_corrupted_tile() {
        let leaves = leaves(300);
        let tree = tree_of(&leaves);
        let indexes = vec![stored_hash_index(0, 123)];

        let plan = ProofPlan::new(&tree, 8, &indexes).unwrap();
        for corrupt in 0..plan.tiles().len() {
            let mut data: Vec<Vec<u8>> =
                plan.tiles().iter().map(|t| tile_data(&leaves, t)).collect();
            data[corrupt][0] ^= 0x01;
            assert!(matches!(
                plan.authenticate(&data).unwrap_err(),
                TlogError::InconsistentTile
            ));
        }
    }

    #[test]
    fn rejects_wrong_root() {
        let leaves = leaves(128);
        let mut tree = tree_of(&leaves);
        tree.hash = record_hash(b"not the root");
        let plan = ProofPlan::new(&tree, 8, &[stored_hash_index(0, 5)]).unwrap();
        let data: Vec<Vec<u8>> = plan.tiles().iter().map(|t| tile_data(&leaves, t)).collect();
        assert!(matches!(
            plan.authenticate(&data).unwrap_err(),
            TlogError::InconsistentTile
        ));
    }

    #[test]
    fn rejects_index_outside_tree() {
        let leaves = leaves(10);
        let tree = tree_of(&leaves);
        let err = ProofPlan::new(&tree, 8, &[stored_hash_index(0, 10)]).unwrap_err();
        assert!(matches!(err, TlogError::IndexOutOfTree { .. }));
    }

    #[test]
    fn rejects_short_data_vector() {
        let leaves = leaves(16);
        let tree = tree_of(&leaves);
        let plan = ProofPlan::new(&tree, 8, &[stored_hash_index(0, 3)]).unwrap();
        assert!(matches!(
            plan.authenticate(&[]).unwrap_err(),
            TlogError::BadTileCount { .. }
        ));
    }

    #[test]
    fn empty_tree_plans_nothing() {
        let tree = Tree::new(0, tree_hash(&[]));
        let plan = ProofPlan::new(&tree, 8, &[]).unwrap();
        assert!(plan.tiles().is_empty());
        assert!(plan.authenticate(&[]).unwrap().is_empty());
    }
}
