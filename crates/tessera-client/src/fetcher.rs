//! Fetching tiles from a log server over HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::header::{HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use tessera_core::{tile_path, Tile};

use crate::error::{ClientError, Result};
use crate::source::TileSource;
use crate::TILE_HEIGHT;

const DEFAULT_USER_AGENT: &str = concat!("tessera-client/", env!("CARGO_PKG_VERSION"));

/// Attempts per tile before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// A [`TileSource`] that fetches tiles from a log's HTTP endpoint.
///
/// Requests for a batch run concurrently, optionally capped; the first
/// unrecoverable failure cancels the remaining requests. Each request is
/// retried on network errors, 429, and 5xx responses, honoring
/// `Retry-After` when the server provides one. Saving is a no-op.
pub struct TileFetcher {
    base: String,
    http: reqwest::Client,
    user_agent: String,
    limit: Option<usize>,
    tile_path: Arc<dyn Fn(&Tile) -> String + Send + Sync>,
    retry_unit: Duration,
}

impl TileFetcher {
    /// Create a fetcher for the log at `base` (a trailing `/` is added if
    /// missing). The default HTTP client uses a 10 second request
    /// timeout; note that a batch may need many parallel connections to
    /// the same host.
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(TileFetcher {
            base,
            http,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            limit: None,
            tile_path: Arc::new(|t| tile_path(t)),
            retry_unit: Duration::from_secs(1),
        })
    }

    /// Override the HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Override the User-Agent header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Cap the number of concurrent requests per batch. Unlimited by
    /// default.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
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

    async fn fetch_tile(&self, tile: &Tile) -> Result<Vec<u8>> {
        let path = (self.tile_path)(tile);
        let url = format!("{}{}", self.base, path);
        let mut failures: Vec<String> = Vec::new();
        let mut retry_at: Option<Instant> = None;

        for retry in 0..MAX_ATTEMPTS {
            if retry > 0 {
                let pause = match retry_at.take() {
                    Some(at) => at.saturating_duration_since(Instant::now()),
                    None => backoff_delay(self.retry_unit, retry - 1),
                };
                info!(%path, ?pause, retry, "retrying tile fetch");
                tokio::time::sleep(pause).await;
            }

            let resp = match self
                .http
                .get(&url)
                .header(USER_AGENT, &self.user_agent)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                retry_at = parse_retry_after(resp.headers().get(RETRY_AFTER));
                failures.push(format!("unexpected status code {}", status.as_u16()));
                continue;
            }
            if status != StatusCode::OK {
                return Err(ClientError::Transport {
                    path,
                    detail: format!("unexpected status code {}", status.as_u16()),
                });
            }
            match resp.bytes().await {
                Ok(body) => {
                    debug!(%path, size = body.len(), "fetched tile");
                    return Ok(body.to_vec());
                }
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            }
        }

        Err(ClientError::Transport {
            path,
            detail: failures.join("; "),
        })
    }
}

/// Backoff before the retry with the given zero-based number:
/// `unit * 5^retry`, so one unit, then 5, 25, and 125 units.
fn backoff_delay(unit: Duration, retry: u32) -> Duration {
    unit * 5u32.saturating_pow(retry)
}

/// Parse a `Retry-After` header into the instant to retry at: either a
/// non-negative integer number of seconds or an HTTP-date. Unparseable
/// values are ignored.
fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Instant> {
    let s = value?.to_str().ok()?.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Instant::now() + Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(s).ok()?;
    let delta = when.signed_duration_since(chrono::Utc::now()).to_std().ok()?;
    Some(Instant::now() + delta)
}

#[async_trait]
impl TileSource for TileFetcher {
    async fn read_tiles(&self, tiles: &[Tile]) -> Result<Vec<Vec<u8>>> {
        for t in tiles {
            if t.height != TILE_HEIGHT {
                return Err(ClientError::Config(format!(
                    "unexpected tile height {}",
                    t.height
                )));
            }
        }

        let semaphore = self.limit.map(|n| Arc::new(Semaphore::new(n)));
        let mut pending: FuturesUnordered<_> = tiles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = match &semaphore {
                        Some(s) => Some(s.acquire().await.expect("semaphore closed")),
                        None => None,
                    };
                    (i, self.fetch_tile(t).await)
                }
            })
            .collect();

        let mut data = vec![Vec::new(); tiles.len()];
        while let Some((i, result)) = pending.next().await {
            // An error drops the set, cancelling the requests still in
            // flight.
            data[i] = result?;
        }
        Ok(data)
    }
}
