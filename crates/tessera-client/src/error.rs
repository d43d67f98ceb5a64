use thiserror::Error;

use tessera_core::TlogError;

/// Error type carried by the cut function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the tile source stack and the streaming client.
///
/// Iteration fails closed: any of these ends the entry stream, and no
/// entry past the failure point is yielded.
#[derive(Debug, Error)]
pub enum ClientError {
    /// All HTTP retries were exhausted, or the server answered with a
    /// non-retryable status.
    #[error("{path}: {detail}")]
    Transport { path: String, detail: String },

    /// Unexpected permanent-cache filesystem error. A missing file is a
    /// cache miss, not an error.
    #[error("tile cache i/o error: {0}")]
    CacheIo(#[from] std::io::Error),

    /// The cut function rejected the tile data.
    #[error("failed to cut entry {index}: {source}")]
    Cut { index: u64, source: BoxError },

    /// Tile data ran out before all of the tile's entries were cut.
    #[error("unexpected end of tile data for tile {0}")]
    TruncatedTile(u64),

    /// Tile data remained after all of the tile's entries were cut.
    #[error("unexpected leftover data in tile {0}")]
    LeftoverTileData(u64),

    /// The record hash of a cut entry does not match the authenticated
    /// leaf hash.
    #[error("hash mismatch for entry {0}")]
    HashMismatch(u64),

    /// The authentication planner could not authenticate the requested
    /// hashes.
    #[error(transparent)]
    Proof(#[from] TlogError),

    /// Construction-time or request-shape misconfiguration.
    #[error("{0}")]
    Config(String),

    /// A tile source broke the all-or-nothing read contract.
    #[error("tile source returned {got} results for {want} tiles")]
    SourceLength { got: usize, want: usize },

    /// The parent cancellation signal fired.
    #[error("iteration cancelled")]
    Cancelled,

    /// The per-entry wait bound elapsed.
    #[error("timed out waiting for next entry")]
    Timeout,
}

/// Result type for tile source and client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
