//! Preview result cache keyed by artifact signature.
//!
//! Signatures (see [`crate::dag::signature`]) identify an artifact by the
//! upstream sub-DAG and parameter values that feed it, so a cached entry is
//! valid across DAG revisions as long as the producing prefix is unchanged.
//! A per-signature gate guarantees at most one concurrent computation per
//! signature; later arrivals wait and observe the filled entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::ArtifactResultMetadata;

/// Inline artifact produced by a preview run.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewArtifact {
    pub content: Vec<u8>,
    pub metadata: ArtifactResultMetadata,
}

type Cell = Arc<Mutex<Option<PreviewArtifact>>>;

#[derive(Default)]
pub struct PreviewCache {
    cells: Mutex<HashMap<Uuid, Cell>>,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, signature: Uuid) -> Cell {
        let mut cells = self.cells.lock().await;
        Arc::clone(cells.entry(signature).or_default())
    }

    /// Non-blocking peek; None when absent or mid-computation.
    pub async fn peek(&self, signature: Uuid) -> Option<PreviewArtifact> {
        let cell = self.cell(signature).await;
        let guard = cell.try_lock().ok()?;
        guard.clone()
    }

    /// Acquire the signature's gate. The guard holds the slot exclusively:
    /// a filled slot is a hit, an empty one obligates the caller to compute
    /// and fill it before dropping the guard.
    pub async fn acquire(&self, signature: Uuid) -> OwnedMutexGuard<Option<PreviewArtifact>> {
        let cell = self.cell(signature).await;
        cell.lock_owned().await
    }

    pub async fn insert(&self, signature: Uuid, artifact: PreviewArtifact) {
        let cell = self.cell(signature).await;
        *cell.lock().await = Some(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(content: &[u8]) -> PreviewArtifact {
        PreviewArtifact {
            content: content.to_vec(),
            metadata: ArtifactResultMetadata::default(),
        }
    }

    #[tokio::test]
    async fn fill_and_hit() {
        let cache = PreviewCache::new();
        let sig = Uuid::new_v4();
        assert!(cache.peek(sig).await.is_none());

        cache.insert(sig, artifact(b"payload")).await;
        assert_eq!(cache.peek(sig).await.unwrap().content, b"payload");
    }

    #[tokio::test]
    async fn gate_serializes_computation() {
        let cache = Arc::new(PreviewCache::new());
        let sig = Uuid::new_v4();

        let mut guard = cache.acquire(sig).await;
        assert!(guard.is_none());

        // A second computation for the same signature blocks until the first
        // fills the slot, then sees the value.
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let guard = cache.acquire(sig).await;
                guard.clone()
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        *guard = Some(artifact(b"once"));
        drop(guard);

        let observed = waiter.await.unwrap().unwrap();
        assert_eq!(observed.content, b"once");
    }
}
