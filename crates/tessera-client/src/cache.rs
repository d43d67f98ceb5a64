//! Directory-backed cache of full, verified tiles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use tessera_core::{tile_path, Tile};

use crate::error::{ClientError, Result};
use crate::source::TileSource;
use crate::TILE_HEIGHT;

/// A [`TileSource`] that caches full tiles as files under a directory,
/// delegating misses to an inner source.
///
/// Tiles are immutable by path once full, so files are never rewritten;
/// partial tiles are never stored, because they change as the tree
/// grows. Saving is best effort: write failures are logged and
/// swallowed. The directory outlives any process; concurrent writers are
/// tolerated only insofar as duplicate writes are idempotent.
pub struct PermanentCache<S> {
    inner: S,
    dir: PathBuf,
    tile_path: Arc<dyn Fn(&Tile) -> String + Send + Sync>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for PermanentCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermanentCache")
            .field("inner", &self.inner)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl<S> PermanentCache<S> {
    /// Create a cache over `dir`, which must already exist.
    pub fn new(inner: S, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(ClientError::Config(format!(
                    "cache directory {} does not exist or is not a directory",
                    dir.display()
                )))
            }
        }
        Ok(PermanentCache {
            inner,
            dir,
            tile_path: Arc::new(|t| tile_path(t)),
        })
    }

    /// Override the descriptor-to-path mapping. The default follows the
    /// tiled-log layout implemented by [`tessera_core::tile_path`].
    pub fn with_tile_path(
        mut self,
        tile_path: impl Fn(&Tile) -> String + Send + Sync + 'static,
    ) -> Self {
        self.tile_path = Arc::new(tile_path);
        self
    }

    fn path_for(&self, tile: &Tile) -> PathBuf {
        self.dir.join((self.tile_path)(tile))
    }

    pub(crate) fn inner(&self) -> &S {
        &self.inner
    }
}

fn create_parent_dirs(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(parent)
}

fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)
}

#[async_trait]
impl<S: TileSource> TileSource for PermanentCache<S> {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        let mut data: Vec<Option<Vec<u8>>> = vec![None; tiles.len()];
        let mut missing = Vec::new();
        for (i, t) in tiles.iter().enumerate() {
            if t.height != TILE_HEIGHT {
                return Err(ClientError::Config(format!(
                    "unexpected tile height {}",
                    t.height
                )));
            }
            match tokio::fs::read(self.path_for(t)).await {
                Ok(d) => {
                    debug!(path = %(self.tile_path)(t), size = d.len(), "loaded tile from cache");
                    data[i] = Some(d);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => missing.push(*t),
                Err(e) => return Err(ClientError::CacheIo(e)),
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
        for (i, t) in tiles.iter().enumerate() {
            if t.height != TILE_HEIGHT {
                error!(tile = %t, height = t.height, "unexpected tile height");
                continue;
            }
            if !t.is_full() {
                // Partial tiles change as the tree grows.
                continue;
            }
            let path = self.path_for(t);
            if path.exists() {
                continue;
            }
            if let Err(e) = create_parent_dirs(&path) {
                warn!(path = %path.display(), error = %e, "failed to create cache directory");
                continue;
            }
            match write_new_file(&path, &data[i]) {
                Ok(()) => {
                    debug!(path = %(self.tile_path)(t), size = data[i].len(), "saved tile to cache");
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to write cached tile");
                }
            }
        }
        self.inner.save_tiles(tiles, data);
    }
}
