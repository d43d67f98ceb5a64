use thiserror::Error;

use crate::tile::Tile;

/// Errors from tile math and authentication.
///
/// All verification is fail-closed: any error means the data in hand must
/// not be trusted.
#[derive(Debug, Error)]
pub enum TlogError {
    #[error("invalid tile {0}")]
    InvalidTile(Tile),

    #[error("stored hash index {index} is not in {tile}")]
    IndexNotInTile { index: u64, tile: Tile },

    #[error("index {index} is not in tree of size {size}")]
    IndexOutOfTree { index: u64, size: u64 },

    #[error("tile {tile} data is {len} bytes, want {want}")]
    BadTileLength { tile: Tile, len: usize, want: usize },

    #[error("got {got} tile data buffers, want {want}")]
    BadTileCount { got: usize, want: usize },

    #[error("tile data does not match tree hash")]
    InconsistentTile,

    #[error("tile planning invariant broken: {0}")]
    PlanInvariant(&'static str),
}

/// Result type for tile math and authentication.
pub type Result<T> = std::result::Result<T, TlogError>;
