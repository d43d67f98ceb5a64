//! Merkle tile algebra for tiled transparency logs.
//!
//! A tiled log publishes an append-only Merkle tree as fixed-height
//! subtree fragments ("tiles"), each addressable as a single resource.
//! This crate holds the pure math for working with such a tree:
//!
//! - [`hash`]: the RFC 6962 record/node/tree hashing,
//! - [`tile`]: tile coordinates, the stored-hash index numbering, and the
//!   default tile path scheme,
//! - [`proof`]: planning and verifying the tile fetches needed to
//!   authenticate leaf hashes against a trusted tree head.
//!
//! Everything here is deterministic and does no I/O. Fetching tiles and
//! streaming entries lives in the companion client crate.

pub mod error;
pub mod hash;
pub mod proof;
pub mod tile;

pub use error::{Result, TlogError};
pub use hash::{node_hash, record_hash, tree_hash, Hash, HASH_SIZE};
pub use proof::ProofPlan;
pub use tile::{
    hash_from_tile, split_stored_hash_index, stored_hash_count, stored_hash_index, tile_path, Tile,
};

use serde::{Deserialize, Serialize};

/// A tree head: the number of entries in the log and the root hash over
/// them. The caller is responsible for obtaining this from a verified
/// checkpoint; everything downstream treats it as ground truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub size: u64,
    pub hash: Hash,
}

impl Tree {
    pub fn new(size: u64, hash: Hash) -> Self {
        Tree { size, hash }
    }
}
