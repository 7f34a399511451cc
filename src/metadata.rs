// src/metadata.rs
//! Metadata registry: external collaborator per spec, treated as a
//! transactional key-value store keyed by [`Hash`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::hash::Hash;

/// A record owned by the external metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub hash: Hash,
    /// `false` means an upload is in progress.
    pub uploaded: bool,
    pub upload_date: DateTime<Utc>,
    /// Byte length; 0 means unknown and must be backfilled.
    pub size: u64,
}

impl MetadataRecord {
    pub fn new_uploaded(hash: Hash, upload_date: DateTime<Utc>, size: u64) -> Self {
        Self {
            hash,
            uploaded: true,
            upload_date,
            size,
        }
    }

    pub fn new_pending(hash: Hash, upload_date: DateTime<Utc>) -> Self {
        Self {
            hash,
            uploaded: false,
            upload_date,
            size: 0,
        }
    }
}

/// The transactional KV store the janitor reconciles against.
///
/// Real deployments back this with whatever stores upload metadata (a SQL
/// table, typically); [`InMemoryMetadataStore`] below is the reference
/// implementation used by tests and by small single-process deployments.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All records with `uploaded = true`, for retention-pass iteration.
    async fn uploaded_records(&self) -> Result<Vec<MetadataRecord>>;

    /// Every hash currently present as a key, for orphan detection.
    async fn all_keys(&self) -> Result<HashSet<Hash>>;

    /// Hashes of records with `uploaded = false` and `upload_date < cutoff`.
    async fn pending_uploads_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Hash>>;

    /// Sets `size` on existing records; called in batches of up to 1000.
    async fn backfill_sizes(&self, sizes: &[(Hash, u64)]) -> Result<()>;

    /// Atomically removes every named record. The single commit point for
    /// a janitor iteration's accumulated deletions.
    async fn commit_deletions(&self, hashes: &[Hash]) -> Result<()>;

    /// Used by the upload subsystem (external to this crate) to register
    /// a record; exposed here so tests can seed the store directly.
    async fn upsert(&self, record: MetadataRecord) -> Result<()>;

    async fn get(&self, hash: &Hash) -> Result<Option<MetadataRecord>>;
}

/// An in-memory, `RwLock`-backed reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<Hash, MetadataRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn uploaded_records(&self) -> Result<Vec<MetadataRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.uploaded)
            .cloned()
            .collect())
    }

    async fn all_keys(&self) -> Result<HashSet<Hash>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn pending_uploads_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Hash>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| !r.uploaded && r.upload_date < cutoff)
            .map(|r| r.hash.clone())
            .collect())
    }

    async fn backfill_sizes(&self, sizes: &[(Hash, u64)]) -> Result<()> {
        let mut guard = self.records.write().await;
        for (hash, size) in sizes {
            if let Some(record) = guard.get_mut(hash) {
                record.size = *size;
            }
        }
        Ok(())
    }

    async fn commit_deletions(&self, hashes: &[Hash]) -> Result<()> {
        let mut guard = self.records.write().await;
        for hash in hashes {
            guard.remove(hash);
        }
        Ok(())
    }

    async fn upsert(&self, record: MetadataRecord) -> Result<()> {
        self.records.write().await.insert(record.hash.clone(), record);
        Ok(())
    }

    async fn get(&self, hash: &Hash) -> Result<Option<MetadataRecord>> {
        Ok(self.records.read().await.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(s: &str) -> Hash {
        Hash::new(s).unwrap()
    }

    #[tokio::test]
    async fn backfill_only_touches_existing_records() {
        let store = InMemoryMetadataStore::new();
        store
            .upsert(MetadataRecord::new_uploaded(hash("AA"), Utc::now(), 0))
            .await
            .unwrap();

        store.backfill_sizes(&[(hash("AA"), 42), (hash("BB"), 7)]).await.unwrap();

        assert_eq!(store.get(&hash("AA")).await.unwrap().unwrap().size, 42);
        assert!(store.get(&hash("BB")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_uploads_filters_by_age_and_status() {
        let store = InMemoryMetadataStore::new();
        let now = Utc::now();
        store
            .upsert(MetadataRecord::new_pending(hash("OLD"), now - chrono::Duration::hours(1)))
            .await
            .unwrap();
        store
            .upsert(MetadataRecord::new_pending(hash("NEW"), now))
            .await
            .unwrap();
        store
            .upsert(MetadataRecord::new_uploaded(hash("DONE"), now - chrono::Duration::hours(2), 10))
            .await
            .unwrap();

        let stuck = store
            .pending_uploads_older_than(now - chrono::Duration::minutes(20))
            .await
            .unwrap();
        assert_eq!(stuck, vec![hash("OLD")]);
    }

    #[tokio::test]
    async fn commit_deletions_removes_keys() {
        let store = InMemoryMetadataStore::new();
        store
            .upsert(MetadataRecord::new_uploaded(hash("AA"), Utc::now(), 1))
            .await
            .unwrap();
        store.commit_deletions(&[hash("AA")]).await.unwrap();
        assert!(store.all_keys().await.unwrap().is_empty());
    }
}
