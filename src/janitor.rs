// src/janitor.rs
//! Periodic reconciliation of on-disk tiers against the metadata registry:
//! retention, size-cap eviction, orphan purging, stuck-upload cleanup.
//!
//! Grounded on the teacher's `federation` worker-loop shape (a
//! cancellation-aware `tokio::select!` loop around one long-running task)
//! and `filesystem/cas.rs`'s walk-and-reconcile pattern, generalized here
//! across two tiers with a single transactional metadata commit per pass.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::coalesce::CoalescingFetchCoordinator;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::hash::Hash;
use crate::metadata::{MetadataRecord, MetadataStore};
use crate::metrics::MetricsSink;
use crate::path_mapper::{FileInfo, PathMapper};
use crate::tier::Tier;

const STUCK_UPLOAD_AGE: ChronoDuration = ChronoDuration::minutes(20);
const BACKFILL_CHUNK: usize = 1000;

/// A file discovered by a raw directory walk, before any interpretation of
/// its name as a [`Hash`] (a `.dl` staging leftover will not parse as one).
struct PhysicalFile {
    name: String,
    path: PathBuf,
    info: FileInfo,
}

fn enumerate_tier(root: &Path) -> Vec<PhysicalFile> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let meta = entry.metadata().ok()?;
            Some(PhysicalFile {
                name,
                path: entry.path().to_path_buf(),
                info: FileInfo {
                    len: meta.len(),
                    accessed: meta.accessed().ok()?,
                    modified: meta.modified().ok()?,
                    created: meta.created().ok(),
                },
            })
        })
        .collect()
}

fn parsed_hash(file: &PhysicalFile) -> Option<Hash> {
    Hash::new(&file.name).ok()
}

/// The hash an in-flight-transfer check should use for this physical file.
/// A `.dl` staging artifact belongs to the same hash as its eventual
/// finalized sibling, so the suffix must be stripped before consulting the
/// coordinator — `parsed_hash` alone would reject `"<HASH>.dl"` as
/// non-hex and make an active transfer's temp file indistinguishable from
/// an orphan, letting the janitor unlink it out from under the fetch.
fn transfer_hash(file: &PhysicalFile) -> Option<Hash> {
    match file.name.strip_suffix(".dl") {
        Some(base) => Hash::new(base).ok(),
        None => Hash::new(&file.name).ok(),
    }
}

/// Deletions and backfills accumulated across an iteration's two tier
/// passes plus stuck-upload cleanup, committed once at iteration end.
#[derive(Default)]
struct JanitorBatch {
    backfills: Vec<(Hash, u64)>,
    to_delete_from_metadata: Vec<Hash>,
}

async fn flush_backfills(metadata: &dyn MetadataStore, batch: &mut JanitorBatch) -> Result<()> {
    while !batch.backfills.is_empty() {
        let take = batch.backfills.len().min(BACKFILL_CHUNK);
        let chunk: Vec<_> = batch.backfills.drain(..take).collect();
        metadata.backfill_sizes(&chunk).await?;
    }
    Ok(())
}

/// `CleanUpOutdatedFiles`. Returns the set of hashes removed this pass, so
/// the caller can filter its physical-file list before the orphan pass.
async fn clean_up_outdated_files(
    tier_root: &Path,
    records: &[MetadataRecord],
    now: DateTime<Utc>,
    retention_days: i64,
    forced_deletion_hours: Option<i64>,
    delete_from_metadata: bool,
    coordinator: &CoalescingFetchCoordinator,
    batch: &mut JanitorBatch,
) -> HashSet<Hash> {
    let retention_cutoff = now - ChronoDuration::days(retention_days);
    let forced_cutoff = forced_deletion_hours
        .filter(|h| *h > 0)
        .map(|h| now - ChronoDuration::hours(h));

    let mut removed = HashSet::new();

    for record in records {
        if coordinator.contains(std::slice::from_ref(&record.hash)) {
            continue;
        }

        let info = PathMapper::info_for(tier_root, &record.hash);
        let should_delete = match &info {
            None => true,
            Some(info) => {
                let expired_by_access = DateTime::<Utc>::from(info.accessed) < retention_cutoff;
                let expired_by_write = forced_cutoff
                    .map(|cutoff| DateTime::<Utc>::from(info.modified) < cutoff)
                    .unwrap_or(false);
                expired_by_access || expired_by_write
            }
        };

        if should_delete {
            if info.is_some() {
                let path = PathMapper::path_for(tier_root, &record.hash);
                let _ = tokio::fs::remove_file(&path).await;
            }
            removed.insert(record.hash.clone());
            if delete_from_metadata {
                batch.to_delete_from_metadata.push(record.hash.clone());
            }
        } else if record.size == 0 {
            if let Some(info) = info {
                batch.backfills.push((record.hash.clone(), info.len));
            }
        }
    }

    removed
}

/// `CleanUpOrphanedFiles`. Honors cancellation between files.
async fn clean_up_orphaned_files(
    files: Vec<PhysicalFile>,
    metadata_keys: &HashSet<Hash>,
    coordinator: &CoalescingFetchCoordinator,
    tier: Tier,
    metrics: &dyn MetricsSink,
    cancel: &CancellationToken,
) -> Vec<PhysicalFile> {
    let mut survivors = Vec::with_capacity(files.len());

    for file in files {
        if cancel.is_cancelled() {
            survivors.push(file);
            continue;
        }

        let hash = parsed_hash(&file);
        let known = hash
            .as_ref()
            .map(|h| metadata_keys.contains(h))
            .unwrap_or(false);
        if known {
            survivors.push(file);
            continue;
        }

        let in_flight = transfer_hash(&file)
            .map(|h| coordinator.contains(std::slice::from_ref(&h)))
            .unwrap_or(false);
        if in_flight {
            survivors.push(file);
            continue;
        }

        if tokio::fs::remove_file(&file.path).await.is_ok() {
            metrics.tier_file_removed(tier, file.info.len);
        } else {
            survivors.push(file);
        }
    }

    survivors
}

/// `CleanUpFilesBeyondSizeLimit`.
///
/// Mirrors the spec's flagged sentinel: a disabled cap (`cap_bytes <= 0`)
/// returns an empty list rather than the unmodified input, even though the
/// caller folds this result straight into tier gauge accounting. Not
/// "fixed" here — see DESIGN.md for the reasoning.
async fn clean_up_files_beyond_size_limit(
    mut files: Vec<PhysicalFile>,
    cap_bytes: i64,
    delete_from_metadata: bool,
    coordinator: &CoalescingFetchCoordinator,
    tier: Tier,
    metrics: &dyn MetricsSink,
    batch: &mut JanitorBatch,
) -> Vec<PhysicalFile> {
    if cap_bytes <= 0 {
        return Vec::new();
    }

    files.sort_by_key(|f| f.info.accessed);
    let mut total: u64 = files.iter().map(|f| f.info.len).sum();

    let mut i = 0;
    while total > cap_bytes as u64 && i < files.len() {
        let in_flight = transfer_hash(&files[i])
            .map(|h| coordinator.contains(std::slice::from_ref(&h)))
            .unwrap_or(false);
        if in_flight {
            i += 1;
            continue;
        }

        let hash = parsed_hash(&files[i]);
        let file = files.remove(i);
        if tokio::fs::remove_file(&file.path).await.is_ok() {
            total = total.saturating_sub(file.info.len);
            metrics.tier_file_removed(tier, file.info.len);
            if delete_from_metadata {
                if let Some(hash) = hash {
                    batch.to_delete_from_metadata.push(hash);
                }
            }
        } else {
            files.insert(i, file);
            i += 1;
        }
    }

    files
}

/// `CleanUpStuckUploads`.
async fn clean_up_stuck_uploads(
    metadata: &dyn MetadataStore,
    now: DateTime<Utc>,
    batch: &mut JanitorBatch,
) -> Result<()> {
    let cutoff = now - STUCK_UPLOAD_AGE;
    let stuck = metadata.pending_uploads_older_than(cutoff).await?;
    batch.to_delete_from_metadata.extend(stuck);
    Ok(())
}

/// The next wall-clock instant aligned to a multiple of `cleanup_minutes`
/// within the current hour, per spec §4.6.
fn next_boundary_delay(now: DateTime<Utc>, cleanup_minutes: u32) -> Duration {
    if cleanup_minutes == 0 {
        return Duration::from_secs(0);
    }
    let floor_minute = (now.minute() / cleanup_minutes) * cleanup_minutes;
    let floored = now
        .with_minute(floor_minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let next = floored + ChronoDuration::minutes(cleanup_minutes as i64);
    (next - now).to_std().unwrap_or(Duration::from_secs(0))
}

/// Drives retention, capacity, and reconciliation sweeps over the Hot (and
/// optional Cold) tiers on a wall-clock-aligned cadence.
pub struct Janitor {
    hot_root: PathBuf,
    cold_root: Option<PathBuf>,
    hot_retention_days: i64,
    cold_retention_days: i64,
    forced_deletion_hours: Option<i64>,
    hot_cap_bytes: i64,
    cold_cap_bytes: i64,
    cleanup_check_minutes: u32,
    metadata: Arc<dyn MetadataStore>,
    coordinator: Arc<CoalescingFetchCoordinator>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl Janitor {
    pub fn new(
        config: &CacheConfig,
        metadata: Arc<dyn MetadataStore>,
        coordinator: Arc<CoalescingFetchCoordinator>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            hot_root: config.cache_directory.clone(),
            cold_root: config
                .cold_enabled()
                .then(|| config.cold_storage_directory.clone().unwrap()),
            hot_retention_days: config.unused_file_retention_period_in_days,
            cold_retention_days: config.cold_storage_unused_file_retention_period_in_days,
            forced_deletion_hours: config.forced_deletion_of_files_after_hours,
            hot_cap_bytes: config.hot_size_cap_bytes(),
            cold_cap_bytes: config.cold_size_cap_bytes(),
            cleanup_check_minutes: config.cleanup_check_in_minutes,
            metadata,
            coordinator,
            metrics,
            clock,
        }
    }

    fn cold_enabled(&self) -> bool {
        self.cold_root.is_some()
    }

    fn tally(files: &[PhysicalFile]) -> (u64, u64) {
        let bytes = files.iter().map(|f| f.info.len).sum();
        (files.len() as u64, bytes)
    }

    /// Runs one complete maintenance pass: Cold (if enabled), then Hot,
    /// then stuck-upload cleanup, then a single transactional metadata
    /// commit of everything accumulated above.
    pub async fn run_iteration(&self, cancel: &CancellationToken) -> Result<()> {
        let now = self.clock.now();
        let mut batch = JanitorBatch::default();

        let records = self.metadata.uploaded_records().await?;
        let metadata_keys = self.metadata.all_keys().await?;

        if let Some(cold_root) = self.cold_root.clone() {
            self.run_tier_pass(
                &cold_root,
                Tier::Cold,
                &records,
                &metadata_keys,
                now,
                self.cold_retention_days,
                None,
                true,
                self.cold_cap_bytes,
                cancel,
                &mut batch,
            )
            .await?;
        }

        self.run_tier_pass(
            &self.hot_root.clone(),
            Tier::Hot,
            &records,
            &metadata_keys,
            now,
            self.hot_retention_days,
            self.forced_deletion_hours,
            !self.cold_enabled(),
            self.hot_cap_bytes,
            cancel,
            &mut batch,
        )
        .await?;

        clean_up_stuck_uploads(self.metadata.as_ref(), now, &mut batch).await?;

        if !batch.to_delete_from_metadata.is_empty() {
            self.metadata
                .commit_deletions(&batch.to_delete_from_metadata)
                .await?;
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_tier_pass(
        &self,
        tier_root: &Path,
        tier: Tier,
        records: &[MetadataRecord],
        metadata_keys: &HashSet<Hash>,
        now: DateTime<Utc>,
        retention_days: i64,
        forced_deletion_hours: Option<i64>,
        delete_from_metadata: bool,
        cap_bytes: i64,
        cancel: &CancellationToken,
        batch: &mut JanitorBatch,
    ) -> Result<()> {
        let files = enumerate_tier(tier_root);

        let removed_by_retention = clean_up_outdated_files(
            tier_root,
            records,
            now,
            retention_days,
            forced_deletion_hours,
            delete_from_metadata,
            &self.coordinator,
            batch,
        )
        .await;
        flush_backfills(self.metadata.as_ref(), batch).await?;

        let remaining: Vec<_> = files
            .into_iter()
            .filter(|f| {
                parsed_hash(f)
                    .map(|h| !removed_by_retention.contains(&h))
                    .unwrap_or(true)
            })
            .collect();

        let remaining = clean_up_orphaned_files(
            remaining,
            metadata_keys,
            &self.coordinator,
            tier,
            self.metrics.as_ref(),
            cancel,
        )
        .await;

        let remaining = clean_up_files_beyond_size_limit(
            remaining,
            cap_bytes,
            delete_from_metadata,
            &self.coordinator,
            tier,
            self.metrics.as_ref(),
            batch,
        )
        .await;

        let (count, bytes) = Self::tally(&remaining);
        self.metrics.set_tier_totals(tier, count, bytes);

        Ok(())
    }

    /// Runs iterations on a wall-clock-aligned cadence until `cancel` fires.
    /// An iteration error is logged and the loop continues to the next
    /// boundary rather than aborting.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            if let Err(e) = self.run_iteration(&cancel).await {
                tracing::warn!(error = %e, "janitor iteration failed");
            }

            let delay = next_boundary_delay(self.clock.now(), self.cleanup_check_minutes);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
