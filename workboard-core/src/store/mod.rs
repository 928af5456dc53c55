//! Document store contract.
//!
//! The board's four collections live in a remote document store; everything
//! in-process is a cache rebuilt from it. Both backends here implement the
//! same contract the hosted store provides: request/response writes, an
//! atomic multi-document batch, and a subscribe primitive that pushes the
//! full post-commit snapshot of a collection to every subscriber, in commit
//! order.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    WorkItems,
    Users,
    Proposals,
    Directives,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::WorkItems,
        Collection::Users,
        Collection::Proposals,
        Collection::Directives,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkItems => "work_items",
            Self::Users => "users",
            Self::Proposals => "proposals",
            Self::Directives => "directives",
        }
    }
}

/// One stored document: the id lives beside the body, not inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// The full state of a collection as delivered by one push.
pub type Snapshot = Vec<Document>;

/// Receiver half of a collection subscription. Lagging receivers skip
/// intermediate snapshots but never observe them out of order.
pub type SnapshotStream = broadcast::Receiver<Arc<Snapshot>>;

/// Precondition for a conditional update: the named top-level field must
/// currently equal the given value or the write is refused.
#[derive(Debug, Clone)]
pub struct FieldIs {
    pub field: String,
    pub equals: Value,
}

impl FieldIs {
    pub fn eq(field: impl Into<String>, equals: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            equals: equals.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert {
        collection: Collection,
        data: Value,
    },
    Set {
        collection: Collection,
        id: String,
        data: Value,
    },
    Update {
        collection: Collection,
        id: String,
        patch: Value,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl WriteOp {
    pub(crate) fn collection(&self) -> Collection {
        match self {
            Self::Insert { collection, .. }
            | Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => *collection,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid document data: {0}")]
    InvalidData(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document under a generated id; returns the id.
    async fn insert(&self, collection: Collection, data: Value) -> Result<String, StoreError>;

    /// Upsert a document at a caller-chosen id.
    async fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError>;

    /// Shallow-merge `patch` into an existing document. Returns false when
    /// the document is missing or the `when` precondition does not hold;
    /// in either case nothing is written.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        when: Option<FieldIs>,
    ) -> Result<bool, StoreError>;

    /// Delete by id. Deleting an absent document is not an error.
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    /// One-shot read of the whole collection.
    async fn fetch(&self, collection: Collection) -> Result<Snapshot, StoreError>;

    /// Apply every write or none of them. Each affected collection's
    /// subscribers receive exactly one post-commit snapshot.
    async fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Open a standing subscription. Pushes begin with the next commit;
    /// callers wanting current state pair this with `fetch`.
    fn subscribe(&self, collection: Collection) -> SnapshotStream;
}

/// Shallow merge of a patch object into a document body.
pub(crate) fn merge_patch(doc: &mut Value, patch: &Value) {
    if let (Some(obj), Some(patch_obj)) = (doc.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            obj.insert(key.clone(), value.clone());
        }
    }
}

pub(crate) fn precondition_holds(doc: &Value, when: &Option<FieldIs>) -> bool {
    match when {
        Some(cond) => doc.get(&cond.field).unwrap_or(&Value::Null) == &cond.equals,
        None => true,
    }
}
