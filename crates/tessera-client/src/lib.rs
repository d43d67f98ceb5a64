//! Streaming client for tiled transparency logs.
//!
//! A tiled log serves its Merkle tree as fixed-size tiles over HTTP.
//! This crate fetches data tiles in batches, authenticates every entry
//! against a caller-verified tree head, and yields `(index, entry)`
//! pairs through a resumable pull iterator.
//!
//! The moving parts stack as tile sources, reads propagating down and
//! saves back up:
//!
//! ```text
//! Client (streaming engine)
//!   -> edge memory cache (two live tiles per level)
//!   -> PermanentCache    (optional, full tiles on disk)
//!   -> TileFetcher       (HTTP, retries, bounded parallelism)
//! ```
//!
//! ```no_run
//! # async fn run() -> tessera_client::Result<()> {
//! use tessera_client::{blank_line_entries, Client, TileFetcher};
//! use tessera_core::{Hash, Tree};
//!
//! let fetcher = TileFetcher::new("https://log.example/")?;
//! let mut client = Client::new(fetcher, blank_line_entries());
//!
//! // The tree head comes from a checkpoint the caller has verified.
//! let tree = Tree::new(300, Hash::ZERO);
//! let mut entries = client.entries(tree, 0);
//! while let Some((index, entry)) = entries.next().await {
//!     println!("{index}: {} bytes", entry.len());
//! }
//! drop(entries);
//! if let Some(err) = client.err() {
//!     eprintln!("iteration failed: {err}");
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod cancel;
mod client;
mod cut;
mod edge;
mod error;
mod fetcher;
mod source;

#[cfg(test)]
mod testlog;

pub use cache::PermanentCache;
pub use cancel::CancelToken;
pub use client::{Client, Entries};
pub use cut::{blank_line_entries, length_prefixed_entries, CutEntry, CutEntryFn};
pub use error::{BoxError, ClientError, Result};
pub use fetcher::TileFetcher;
pub use source::TileSource;

// Re-export the core types that appear in this crate's API.
pub use tessera_core::{Hash, Tile, Tree};

/// The log-wide tile height.
pub const TILE_HEIGHT: u8 = 8;

/// Entries per full data tile: `2^TILE_HEIGHT`.
pub const TILE_WIDTH: u64 = 1 << TILE_HEIGHT;
