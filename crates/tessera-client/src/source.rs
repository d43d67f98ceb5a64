//! The tile source contract: the plug point every layer of the stack
//! implements.

use async_trait::async_trait;

use tessera_core::Tile;

use crate::error::Result;

/// A source of tile data.
///
/// Implementations form a stack at runtime: the streaming client reads
/// through an in-memory edge cache, optionally a [`PermanentCache`]
/// directory, down to a [`TileFetcher`] talking to the log. Reads
/// propagate down until a hit; saves propagate up so each layer can
/// memoize what the layer above just verified.
///
/// [`PermanentCache`]: crate::PermanentCache
/// [`TileFetcher`]: crate::TileFetcher
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch the data for each tile, in input order. All-or-nothing: a
    /// single unobtainable tile fails the whole call.
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>>;

    /// Offer verified tiles for caching. Advisory and infallible:
    /// implementations must tolerate double-saves and must not persist
    /// partial tiles to permanent storage. The default does nothing.
    fn save_tiles(&self, _tiles: &[Tile], _data: &[Vec<u8>]) {}
}
