// src/provider.rs
//! The serving façade: hot-hit → cold-promote → coalesced peer-fetch.
//!
//! Grounded on the teacher's `repository` module, which wires a fetcher, a
//! coalescer, and on-disk materialization behind one public surface; the
//! tier-promotion and `.dl`-staging details are grounded on
//! `filesystem/cas.rs`'s atomic-rename pattern.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::coalesce::CoalescingFetchCoordinator;
use crate::error::Result;
use crate::hash::Hash;
use crate::metrics::MetricsSink;
use crate::path_mapper::PathMapper;
use crate::peer::PeerFetcher;
use crate::tier::Tier;
use crate::touch::TouchSink;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Serves files from the Hot tier, transparently promoting from Cold or
/// pulling from the upstream peer, deduplicating concurrent fetches.
pub struct CachedFileProvider {
    hot_root: PathBuf,
    cold_root: Option<PathBuf>,
    peer: Option<Arc<PeerFetcher>>,
    coordinator: Arc<CoalescingFetchCoordinator>,
    metrics: Arc<dyn MetricsSink>,
    touch: Arc<dyn TouchSink>,
    #[allow(dead_code)]
    clock: Arc<dyn Clock>,
    wait_timeout: Duration,
}

impl CachedFileProvider {
    pub fn new(
        hot_root: PathBuf,
        cold_root: Option<PathBuf>,
        peer: Option<Arc<PeerFetcher>>,
        coordinator: Arc<CoalescingFetchCoordinator>,
        metrics: Arc<dyn MetricsSink>,
        touch: Arc<dyn TouchSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hot_root,
            cold_root,
            peer,
            coordinator,
            metrics,
            touch,
            clock,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Overrides the `GetOrFetch` waiter deadline; used by tests to avoid
    /// waiting a real 120 seconds for the wait-timeout scenario.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    fn cold_enabled(&self) -> bool {
        self.cold_root.is_some()
    }

    async fn hot_file_present(&self, hash: &Hash) -> bool {
        matches!(PathMapper::info_for(&self.hot_root, hash), Some(info) if info.len > 0)
    }

    /// Best-effort: ensures the file will (eventually) be available in Hot.
    pub async fn ensure_local(&self, hash: &Hash) {
        if self.hot_file_present(hash).await {
            return;
        }
        if self.promote_from_cold(hash).await {
            return;
        }
        let Some(peer) = self.peer.clone() else {
            return;
        };

        let hot_root = self.hot_root.clone();
        let cold_root = self.cold_root.clone();
        let metrics = self.metrics.clone();
        let destination_root = cold_root.clone().unwrap_or_else(|| hot_root.clone());
        let dest_tier = if self.cold_enabled() {
            Tier::Cold
        } else {
            Tier::Hot
        };
        let hash_owned = hash.clone();

        self.coordinator.start_or_join(hash, move || async move {
            metrics.downloading_inc();
            let outcome =
                fetch_and_materialize(peer, &hash_owned, &destination_root, dest_tier, &metrics)
                    .await;
            metrics.downloading_dec();

            if outcome && dest_tier == Tier::Cold {
                // Open question fix (spec §9): a peer fetch landing in Cold
                // must be promoted to Hot immediately, or serving fails
                // until a later, unrelated request happens to trigger it.
                if let Some(cold_root) = &cold_root {
                    if let Err(e) = promote_file(cold_root, &hot_root, &hash_owned).await {
                        tracing::warn!(error = %e, hash = %hash_owned, "post-fetch promotion failed");
                    }
                }
            }

            outcome
        });
    }

    /// Opens the Hot file read-only, touching recency tracking. `None` if
    /// absent.
    pub async fn open_local(&self, hash: &Hash) -> Option<tokio::fs::File> {
        let path = PathMapper::path_for(&self.hot_root, hash);
        let file = tokio::fs::File::open(&path).await.ok()?;
        let len = file.metadata().await.ok()?.len();

        let atime_path = path.clone();
        let hash_for_log = hash.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = filetime::set_file_atime(&atime_path, filetime::FileTime::now()) {
                tracing::warn!(error = %e, hash = %hash_for_log, "failed to update access time");
            }
        })
        .await;

        self.touch.touch(hash).await;
        self.metrics.size_served(len);
        Some(file)
    }

    /// `EnsureLocal` followed by awaiting any in-flight transfer, then
    /// `OpenLocal`.
    pub async fn get_or_fetch(&self, hash: &Hash) -> Option<tokio::fs::File> {
        self.ensure_local(hash).await;

        if let Some(handle) = self.coordinator.get(hash) {
            self.metrics.waiting_inc();
            let outcome = handle.wait(self.wait_timeout).await;
            self.metrics.waiting_dec();
            match outcome {
                Ok(true) => {}
                Ok(false) | Err(_) => return None,
            }
        }

        self.open_local(hash).await
    }

    pub fn any_downloading(&self, hashes: &[Hash]) -> bool {
        self.coordinator.contains(hashes)
    }

    /// Copies `<coldRoot>/shard/hash` into Hot via `.dl` staging and an
    /// atomic rename. Best-effort: any failure is logged and swallowed.
    ///
    /// Resets last-access and last-write time on the promoted copy, but not
    /// creation time: `filetime` exposes no portable creation-time setter, so
    /// a promoted file's creation time stays whatever the cold-tier copy had.
    pub async fn promote_from_cold(&self, hash: &Hash) -> bool {
        let Some(cold_root) = &self.cold_root else {
            return false;
        };
        match promote_file(cold_root, &self.hot_root, hash).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, hash = %hash, "promotion from cold failed");
                false
            }
        }
    }
}

/// Copies `cold_root`'s copy of `hash` into `hot_root`, rewriting its
/// timestamps to now so the promoted file is not immediately LRU-evictable.
///
/// Only last-access and last-write time are reset; `filetime` has no
/// portable way to set creation time, so a promoted file keeps the
/// creation time of its cold-tier copy instead of reading "now" as the
/// spec's promotion semantics call for.
async fn promote_file(cold_root: &Path, hot_root: &Path, hash: &Hash) -> Result<u64> {
    let cold_path = PathMapper::path_for(cold_root, hash);
    let hot_final = PathMapper::path_for(hot_root, hash);
    let hot_staging = PathMapper::staging_path_for(hot_root, hash);

    if let Some(parent) = hot_staging.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&cold_path, &hot_staging).await?;
    tokio::fs::rename(&hot_staging, &hot_final).await?;

    let timestamp_path = hot_final.clone();
    tokio::task::spawn_blocking(move || {
        let now = filetime::FileTime::now();
        // `filetime` has no portable creation-time setter; atime/mtime are
        // what the downstream retention math actually reads.
        filetime::set_file_times(&timestamp_path, now, now)
    })
    .await
    .map_err(|e| crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    Ok(tokio::fs::metadata(&hot_final).await?.len())
}

/// Streams `hash` from `peer` into a `.dl` path under `destination_root`,
/// then atomically renames it into place and accounts for it in `metrics`.
async fn fetch_and_materialize(
    peer: Arc<PeerFetcher>,
    hash: &Hash,
    destination_root: &Path,
    dest_tier: Tier,
    metrics: &Arc<dyn MetricsSink>,
) -> bool {
    let final_path = PathMapper::path_for(destination_root, hash);
    let staging_path = PathMapper::staging_path_for(destination_root, hash);

    if let Some(parent) = staging_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(error = %e, hash = %hash, "failed to create tier directory");
            return false;
        }
    }

    let file = match tokio::fs::File::create(&staging_path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, hash = %hash, "failed to create staging file");
            return false;
        }
    };

    if let Err(e) = peer.fetch(hash, file).await {
        tracing::warn!(error = %e, hash = %hash, "peer fetch failed");
        let _ = tokio::fs::remove_file(&staging_path).await;
        return false;
    }

    let len = match tokio::fs::metadata(&staging_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    if let Err(e) = tokio::fs::rename(&staging_path, &final_path).await {
        tracing::warn!(error = %e, hash = %hash, "failed to materialize fetched file");
        return false;
    }

    metrics.tier_file_added(dest_tier, len);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::metrics::AtomicMetricsSink;
    use crate::token::StaticTokenProvider;
    use crate::touch::RecordingTouchSink;
    use std::time::Duration as StdDuration;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seed_file(root: &Path, hash: &Hash, contents: &[u8]) {
        let path = PathMapper::path_for(root, hash);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, contents).await.unwrap();
    }

    fn provider(
        hot: PathBuf,
        cold: Option<PathBuf>,
        peer: Option<Arc<PeerFetcher>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> CachedFileProvider {
        CachedFileProvider::new(
            hot,
            cold,
            peer,
            Arc::new(CoalescingFetchCoordinator::new()),
            metrics,
            Arc::new(RecordingTouchSink::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn hot_hit_serves_without_peer_request() {
        let hot = tempdir().unwrap();
        let hash = Hash::new("AABB").unwrap();
        seed_file(hot.path(), &hash, b"0123456789").await;

        let metrics = Arc::new(AtomicMetricsSink::new());
        let p = provider(hot.path().to_path_buf(), None, None, metrics.clone());

        let mut file = p.get_or_fetch(&hash).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"0123456789");
        assert_eq!(metrics.bytes_served(), 10);
    }

    #[tokio::test]
    async fn cold_promote_populates_hot_and_keeps_cold() {
        let hot = tempdir().unwrap();
        let cold = tempdir().unwrap();
        let hash = Hash::new("CCDD").unwrap();
        seed_file(cold.path(), &hash, &[7u8; 42]).await;

        let metrics = Arc::new(AtomicMetricsSink::new());
        let p = provider(
            hot.path().to_path_buf(),
            Some(cold.path().to_path_buf()),
            None,
            metrics,
        );

        let mut file = p.get_or_fetch(&hash).await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 42);

        assert!(PathMapper::path_for(cold.path(), &hash).exists());
        assert!(PathMapper::path_for(hot.path(), &hash).exists());
    }

    #[tokio::test]
    async fn coalesced_peer_fetch_issues_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/files/.*"))
            .respond_with(move || {
                std::thread::sleep(StdDuration::from_millis(0));
                ResponseTemplate::new(200).set_body_bytes(vec![9u8; 100])
            })
            .expect(1)
            .mount(&server)
            .await;

        let hot = tempdir().unwrap();
        let hash = Hash::new("EE11").unwrap();
        let peer = Arc::new(
            PeerFetcher::new(
                server.uri(),
                "files",
                Arc::new(StaticTokenProvider::new("t")),
                false,
            )
            .unwrap(),
        );

        let metrics = Arc::new(AtomicMetricsSink::new());
        let p = Arc::new(provider(
            hot.path().to_path_buf(),
            None,
            Some(peer),
            metrics.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let p = p.clone();
            let hash = hash.clone();
            handles.push(tokio::spawn(async move { p.get_or_fetch(&hash).await }));
        }
        for h in handles {
            let mut file = h.await.unwrap().unwrap();
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf.len(), 100);
        }

        server.verify().await;
    }

    #[tokio::test]
    async fn peer_failure_leaves_no_file_and_allows_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/files/.*"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let hot = tempdir().unwrap();
        let hash = Hash::new("FF22").unwrap();
        let peer = Arc::new(
            PeerFetcher::new(
                server.uri(),
                "files",
                Arc::new(StaticTokenProvider::new("t")),
                false,
            )
            .unwrap(),
        );

        let metrics = Arc::new(AtomicMetricsSink::new());
        let p = provider(hot.path().to_path_buf(), None, Some(peer), metrics);

        assert!(p.get_or_fetch(&hash).await.is_none());
        assert!(!PathMapper::path_for(hot.path(), &hash).exists());
        assert!(!p.any_downloading(&[hash.clone()]));
    }

    #[tokio::test]
    async fn wait_timeout_returns_none_while_fetch_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/files/.*"))
            .respond_with(ResponseTemplate::new(200).set_delay(StdDuration::from_millis(200)))
            .mount(&server)
            .await;

        let hot = tempdir().unwrap();
        let hash = Hash::new("AB01").unwrap();
        let peer = Arc::new(
            PeerFetcher::new(
                server.uri(),
                "files",
                Arc::new(StaticTokenProvider::new("t")),
                false,
            )
            .unwrap(),
        );

        let metrics = Arc::new(AtomicMetricsSink::new());
        let p = provider(hot.path().to_path_buf(), None, Some(peer), metrics)
            .with_wait_timeout(StdDuration::from_millis(20));

        assert!(p.get_or_fetch(&hash).await.is_none());
        assert!(p.any_downloading(&[hash]));
    }
}
