// src/touch.rs
//! Hash-touch tracking sink: external collaborator per spec.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::hash::Hash;

/// Accepts recency notifications for a served hash.
#[async_trait]
pub trait TouchSink: Send + Sync {
    async fn touch(&self, hash: &Hash);
}

/// A sink that discards every touch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTouchSink;

#[async_trait]
impl TouchSink for NoopTouchSink {
    async fn touch(&self, _hash: &Hash) {}
}

/// A sink that records touches in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingTouchSink {
    touches: Mutex<Vec<Hash>>,
}

impl RecordingTouchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn touches(&self) -> Vec<Hash> {
        self.touches.lock().await.clone()
    }
}

#[async_trait]
impl TouchSink for RecordingTouchSink {
    async fn touch(&self, hash: &Hash) {
        self.touches.lock().await.push(hash.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_collects_touches() {
        let sink = RecordingTouchSink::new();
        let hash = Hash::new("AABB").unwrap();
        sink.touch(&hash).await;
        assert_eq!(sink.touches().await, vec![hash]);
    }
}
