//! Checkpointing for paused graph executions
//!
//! A checkpoint captures the state of a graph execution at a human pause
//! point, keyed by thread id. The in-memory store is authoritative; the
//! trait keeps persistence pluggable without making it a core dependency.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::graph::state::GraphState;

/// Snapshot of a paused graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Key for resume; doubles as the job-visible checkpoint id
    pub thread_id: String,

    /// Graph the execution belongs to
    pub graph_name: String,

    /// The node that paused (a human node)
    pub node_id: String,

    /// State at the pause point
    pub state: GraphState,

    /// Node visits consumed before the pause; resume continues the count
    pub iterations: usize,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: impl Into<String>,
        graph_name: impl Into<String>,
        node_id: impl Into<String>,
        state: GraphState,
        iterations: usize,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            graph_name: graph_name.into(),
            node_id: node_id.into(),
            state,
            iterations,
            created_at: Utc::now(),
        }
    }
}

/// Storage for graph checkpoints, keyed by thread id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save a checkpoint, overwriting any existing one for the thread.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError>;

    /// Load a checkpoint by thread id.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError>;

    /// Delete a checkpoint; deleting a missing thread id is a no-op.
    async fn delete(&self, thread_id: &str) -> Result<(), EngineError>;

    /// List stored thread ids.
    async fn list(&self) -> Result<Vec<String>, EngineError>;
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(thread_id).cloned())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), EngineError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.remove(thread_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, EngineError> {
        let checkpoints = self.checkpoints.read().await;
        let mut ids: Vec<String> = checkpoints.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(thread_id: &str) -> Checkpoint {
        let mut state = GraphState::new();
        state.insert("messages".into(), json!([]));
        Checkpoint::new(thread_id, "review-loop", "approval", state, 3)
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = MemoryCheckpointStore::new();
        store.save(sample("thread-1")).await.unwrap();

        let loaded = store.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.graph_name, "review-loop");
        assert_eq!(loaded.node_id, "approval");
        assert_eq!(loaded.iterations, 3);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryCheckpointStore::new();
        store.save(sample("t")).await.unwrap();

        let mut updated = sample("t");
        updated.iterations = 7;
        store.save(updated).await.unwrap();

        let loaded = store.load("t").await.unwrap().unwrap();
        assert_eq!(loaded.iterations, 7);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryCheckpointStore::new();
        store.save(sample("b")).await.unwrap();
        store.save(sample("a")).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b"]);

        // Deleting a missing id is fine
        store.delete("a").await.unwrap();
    }

    #[test]
    fn test_checkpoint_serializes() {
        let checkpoint = sample("t");
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["thread_id"], "t");
        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back.thread_id, "t");
    }
}
