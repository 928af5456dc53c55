use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    merge_patch, precondition_holds, Collection, Document, DocumentStore, FieldIs, Snapshot,
    SnapshotStream, StoreError, WriteOp,
};

const CHANNEL_CAPACITY: usize = 64;

type Docs = HashMap<Collection, BTreeMap<String, Value>>;

/// In-memory backend with the same push semantics as the durable one.
/// Snapshots are published while the document lock is held, so subscribers
/// observe commits in order.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    docs: Mutex<Docs>,
    channels: HashMap<Collection, broadcast::Sender<Arc<Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        let mut docs = HashMap::new();
        for collection in Collection::ALL {
            channels.insert(collection, broadcast::channel(CHANNEL_CAPACITY).0);
            docs.insert(collection, BTreeMap::new());
        }
        Self {
            inner: Arc::new(Inner {
                docs: Mutex::new(docs),
                channels,
            }),
        }
    }

    fn lock_docs(&self) -> MutexGuard<'_, Docs> {
        self.inner
            .docs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, docs: &Docs, collection: Collection) {
        let snapshot: Snapshot = docs[&collection]
            .iter()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();
        // No subscribers is fine; send only fails when nobody listens.
        let _ = self.inner.channels[&collection].send(Arc::new(snapshot));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: Collection, data: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut docs = self.lock_docs();
        docs.get_mut(&collection)
            .expect("all collections initialized")
            .insert(id.clone(), data);
        self.publish(&docs, collection);
        Ok(id)
    }

    async fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError> {
        let mut docs = self.lock_docs();
        docs.get_mut(&collection)
            .expect("all collections initialized")
            .insert(id.to_string(), data);
        self.publish(&docs, collection);
        Ok(())
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        when: Option<FieldIs>,
    ) -> Result<bool, StoreError> {
        let mut docs = self.lock_docs();
        let table = docs
            .get_mut(&collection)
            .expect("all collections initialized");
        let Some(doc) = table.get_mut(id) else {
            return Ok(false);
        };
        if !precondition_holds(doc, &when) {
            return Ok(false);
        }
        merge_patch(doc, &patch);
        self.publish(&docs, collection);
        Ok(true)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut docs = self.lock_docs();
        let removed = docs
            .get_mut(&collection)
            .expect("all collections initialized")
            .remove(id)
            .is_some();
        if removed {
            self.publish(&docs, collection);
        }
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.lock_docs();
        Ok(docs[&collection].get(id).cloned())
    }

    async fn fetch(&self, collection: Collection) -> Result<Snapshot, StoreError> {
        let docs = self.lock_docs();
        Ok(docs[&collection]
            .iter()
            .map(|(id, data)| Document {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut docs = self.lock_docs();

        // Stage against a copy so a failing write commits nothing.
        let mut staged = docs.clone();
        let mut touched = Vec::new();
        for write in writes {
            let collection = write.collection();
            if !touched.contains(&collection) {
                touched.push(collection);
            }
            let table = staged
                .get_mut(&collection)
                .expect("all collections initialized");
            match write {
                WriteOp::Insert { data, .. } => {
                    table.insert(Uuid::new_v4().to_string(), data);
                }
                WriteOp::Set { id, data, .. } => {
                    table.insert(id, data);
                }
                WriteOp::Update { id, patch, .. } => {
                    let doc = table.get_mut(&id).ok_or_else(|| StoreError::NotFound {
                        collection: collection.as_str(),
                        id: id.clone(),
                    })?;
                    merge_patch(doc, &patch);
                }
                WriteOp::Delete { id, .. } => {
                    table.remove(&id);
                }
            }
        }

        *docs = staged;
        for collection in touched {
            self.publish(&docs, collection);
        }
        Ok(())
    }

    fn subscribe(&self, collection: Collection) -> SnapshotStream {
        self.inner.channels[&collection].subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn push_carries_full_post_commit_snapshot() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(Collection::Users);

        store
            .set(Collection::Users, "u1", json!({ "name": "Ada" }))
            .await
            .expect("set");
        let snap = rx.recv().await.expect("push");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, "u1");

        store
            .set(Collection::Users, "u2", json!({ "name": "Grace" }))
            .await
            .expect("set");
        let snap = rx.recv().await.expect("push");
        assert_eq!(snap.len(), 2);
    }

    #[tokio::test]
    async fn conditional_update_refuses_on_mismatch() {
        let store = MemoryStore::new();
        store
            .set(
                Collection::Proposals,
                "p1",
                json!({ "approval_status": "approved" }),
            )
            .await
            .expect("set");

        let updated = store
            .update(
                Collection::Proposals,
                "p1",
                json!({ "approval_status": "rejected" }),
                Some(FieldIs::eq("approval_status", "pending")),
            )
            .await
            .expect("update");
        assert!(!updated);

        let doc = store
            .get(Collection::Proposals, "p1")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(doc["approval_status"], "approved");
    }

    #[tokio::test]
    async fn failing_batch_commits_nothing() {
        let store = MemoryStore::new();
        let result = store
            .apply_batch(vec![
                WriteOp::Set {
                    collection: Collection::Users,
                    id: "u1".into(),
                    data: json!({ "name": "Ada" }),
                },
                WriteOp::Update {
                    collection: Collection::WorkItems,
                    id: "missing".into(),
                    patch: json!({ "status": "done" }),
                },
            ])
            .await;
        assert!(result.is_err());
        assert!(store
            .fetch(Collection::Users)
            .await
            .expect("fetch")
            .is_empty());
    }

    #[tokio::test]
    async fn batch_publishes_one_snapshot_per_collection() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(Collection::WorkItems);
        store
            .apply_batch(vec![
                WriteOp::Insert {
                    collection: Collection::WorkItems,
                    data: json!({ "title": "a" }),
                },
                WriteOp::Insert {
                    collection: Collection::WorkItems,
                    data: json!({ "title": "b" }),
                },
            ])
            .await
            .expect("batch");
        let snap = rx.recv().await.expect("push");
        assert_eq!(snap.len(), 2);
        // Only one push for the whole batch.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
