//! Session context store: the memory collaborator
//!
//! Read once before task creation, appended to after the aggregator produces
//! the final response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextStoreError {
    #[error("context store unavailable: {0}")]
    Unavailable(String),

    #[error("context store rejected entry: {0}")]
    Rejected(String),
}

/// One remembered item for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub recorded_at: DateTime<Utc>,
    pub kind: String,
    pub data: Value,
}

impl ContextEntry {
    pub fn new(kind: &str, data: Value) -> Self {
        Self {
            recorded_at: Utc::now(),
            kind: kind.to_string(),
            data,
        }
    }
}

/// Opaque session context handed to the classifier and agents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub entries: Vec<ContextEntry>,
}

impl SessionContext {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entries first, at most `n`
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter().rev().take(n)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<SessionContext, ContextStoreError>;

    async fn append(&self, session_id: &str, entry: ContextEntry)
        -> Result<(), ContextStoreError>;
}

/// Process-local store, bounded per session
pub struct InMemoryContextStore {
    sessions: RwLock<HashMap<String, Vec<ContextEntry>>>,
    max_entries: usize,
}

impl InMemoryContextStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, session_id: &str) -> Result<SessionContext, ContextStoreError> {
        let sessions = self.sessions.read().await;
        Ok(SessionContext {
            session_id: session_id.to_string(),
            entries: sessions.get(session_id).cloned().unwrap_or_default(),
        })
    }

    async fn append(
        &self,
        session_id: &str,
        entry: ContextEntry,
    ) -> Result<(), ContextStoreError> {
        let mut sessions = self.sessions.write().await;
        let entries = sessions.entry(session_id.to_string()).or_default();
        entries.push(entry);
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(..overflow);
        }
        Ok(())
    }
}
