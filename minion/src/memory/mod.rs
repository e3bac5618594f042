//! Agent memory: working (ephemeral, per-task), episodic (append-only step
//! records), and semantic (long-term key → value with injectable retrieval).
//!
//! Semantic retrieval goes through the [`SemanticIndex`] trait so a vector
//! store can be plugged in; the in-process [`KeywordIndex`] fallback scores
//! by token overlap. Reads are side-effect free.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::MinionError;

/// One episodic record: what happened at a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpisodicRecord {
    pub timestamp: DateTime<Utc>,
    pub step: usize,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
}

impl EpisodicRecord {
    pub fn new(step: usize, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            step,
            content: content.into(),
            metadata: Value::Null,
        }
    }
}

/// A semantic retrieval hit: key, value, relevance.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievalHit {
    pub key: String,
    pub value: String,
    pub score: f32,
}

/// Injectable semantic retrieval backend. `search` must be side-effect free.
#[async_trait]
pub trait SemanticIndex: Send + Sync {
    async fn index(&self, key: &str, value: &str) -> Result<(), MinionError>;
    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, MinionError>;
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// In-process fallback index: token-overlap scoring, ties by key ascending.
#[derive(Default)]
pub struct KeywordIndex {
    entries: RwLock<Vec<(String, String)>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SemanticIndex for KeywordIndex {
    async fn index(&self, key: &str, value: &str) -> Result<(), MinionError> {
        let mut entries = self.entries.write().await;
        if let Some(slot) = entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            entries.push((key.to_string(), value.to_string()));
        }
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>, MinionError> {
        let query_tokens = tokens(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().await;
        let mut hits: Vec<RetrievalHit> = entries
            .iter()
            .filter_map(|(key, value)| {
                let doc = tokens(&format!("{key} {value}"));
                let overlap = query_tokens.iter().filter(|t| doc.contains(t)).count();
                (overlap > 0).then(|| RetrievalHit {
                    key: key.clone(),
                    value: value.clone(),
                    score: overlap as f32 / query_tokens.len() as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Three keyed stores behind one handle. Episodic entries are append-only
/// during an agent's life; working memory is cleared per task.
pub struct Memory {
    working: RwLock<HashMap<String, Value>>,
    episodic: RwLock<Vec<EpisodicRecord>>,
    semantic: RwLock<HashMap<String, String>>,
    index: Arc<dyn SemanticIndex>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::with_index(Arc::new(KeywordIndex::new()))
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory with an injected retrieval backend (e.g. a vector store).
    pub fn with_index(index: Arc<dyn SemanticIndex>) -> Self {
        Self {
            working: RwLock::new(HashMap::new()),
            episodic: RwLock::new(Vec::new()),
            semantic: RwLock::new(HashMap::new()),
            index,
        }
    }

    pub async fn update_working(&self, key: &str, value: Value) {
        self.working.write().await.insert(key.to_string(), value);
    }

    pub async fn get_working(&self, key: &str) -> Option<Value> {
        self.working.read().await.get(key).cloned()
    }

    pub async fn clear_working(&self) {
        self.working.write().await.clear();
    }

    pub async fn update_semantic(&self, key: &str, value: &str) -> Result<(), MinionError> {
        self.semantic
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        self.index.index(key, value).await
    }

    pub async fn get_semantic(&self, key: &str) -> Option<String> {
        self.semantic.read().await.get(key).cloned()
    }

    pub async fn append_episodic(&self, record: EpisodicRecord) {
        self.episodic.write().await.push(record);
    }

    /// Snapshot of the episodic log, in order.
    pub async fn episodic(&self) -> Vec<EpisodicRecord> {
        self.episodic.read().await.clone()
    }

    /// Semantic retrieval through the injected index; read-only.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalHit>, MinionError> {
        self.index.search(query, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn working_memory_is_keyed_and_clearable() {
        let memory = Memory::new();
        memory
            .update_working("draft", serde_json::json!("v1"))
            .await;
        assert_eq!(
            memory.get_working("draft").await,
            Some(serde_json::json!("v1"))
        );
        memory.clear_working().await;
        assert!(memory.get_working("draft").await.is_none());
    }

    #[tokio::test]
    async fn episodic_is_append_only_ordered() {
        let memory = Memory::new();
        memory.append_episodic(EpisodicRecord::new(1, "first")).await;
        memory.append_episodic(EpisodicRecord::new(2, "second")).await;
        let log = memory.episodic().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "first");
        assert!(log[0].timestamp <= log[1].timestamp);
    }

    #[tokio::test]
    async fn semantic_retrieval_ranks_by_overlap() {
        let memory = Memory::new();
        memory
            .update_semantic("rust", "a systems programming language")
            .await
            .unwrap();
        memory
            .update_semantic("python", "a dynamic programming language")
            .await
            .unwrap();
        memory
            .update_semantic("coffee", "a brewed drink")
            .await
            .unwrap();

        let hits = memory
            .retrieve_relevant("systems programming", 2)
            .await
            .unwrap();
        assert_eq!(hits[0].key, "rust");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn retrieval_is_side_effect_free() {
        let memory = Memory::new();
        memory.update_semantic("k", "value text").await.unwrap();
        let before = memory.retrieve_relevant("value", 10).await.unwrap();
        let after = memory.retrieve_relevant("value", 10).await.unwrap();
        assert_eq!(before, after);
    }
}
