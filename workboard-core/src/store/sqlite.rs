use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    merge_patch, precondition_holds, Collection, Document, DocumentStore, FieldIs, Snapshot,
    SnapshotStream, StoreError, WriteOp,
};

const CHANNEL_CAPACITY: usize = 64;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);
";

/// Durable document-store backend. One `documents` table holds every
/// collection; writes run on the blocking pool behind a connection mutex,
/// and the post-commit snapshot is published before the mutex is released
/// so subscribers observe commits in order.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    channels: Arc<HashMap<Collection, broadcast::Sender<Arc<Snapshot>>>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// Platform data directory, e.g. `~/.local/share/workboard/workboard.sqlite3`.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("WORKBOARD_DB") {
            return PathBuf::from(path);
        }
        directories::ProjectDirs::from("com", "rocket-tycoon", "workboard")
            .map(|dirs| dirs.data_dir().join("workboard.sqlite3"))
            .unwrap_or_else(|| PathBuf::from("workboard.sqlite3"))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        let mut channels = HashMap::new();
        for collection in Collection::ALL {
            channels.insert(collection, broadcast::channel(CHANNEL_CAPACITY).0);
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            channels: Arc::new(channels),
        })
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn publish(&self, conn: &Connection, collection: Collection) -> Result<(), StoreError> {
        let snapshot = read_snapshot(conn, collection)?;
        let _ = self.channels[&collection].send(Arc::new(snapshot));
        Ok(())
    }
}

fn read_snapshot(conn: &Connection, collection: Collection) -> Result<Snapshot, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id")?;
    let mut rows = stmt.query(params![collection.as_str()])?;
    let mut snapshot = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let data = serde_json::from_str(&raw)
            .map_err(|e| StoreError::InvalidData(format!("{}/{id}: {e}", collection.as_str())))?;
        snapshot.push(Document { id, data });
    }
    Ok(snapshot)
}

fn read_doc(
    conn: &Connection,
    collection: Collection,
    id: &str,
) -> Result<Option<Value>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection.as_str(), id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| {
            StoreError::InvalidData(format!("{}/{id}: {e}", collection.as_str()))
        })?)),
        None => Ok(None),
    }
}

fn write_doc(
    conn: &Connection,
    collection: Collection,
    id: &str,
    data: &Value,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
        params![collection.as_str(), id, data.to_string()],
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: Collection, data: Value) -> Result<String, StoreError> {
        let store = self.clone();
        let id = Uuid::new_v4().to_string();
        let out = id.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                write_doc(conn, collection, &id, &data)?;
                store.publish(conn, collection)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(out)
    }

    async fn set(&self, collection: Collection, id: &str, data: Value) -> Result<(), StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                write_doc(conn, collection, &id, &data)?;
                store.publish(conn, collection)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
        when: Option<FieldIs>,
    ) -> Result<bool, StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let tx = conn.transaction()?;
                let Some(mut doc) = read_doc(&tx, collection, &id)? else {
                    return Ok(false);
                };
                if !precondition_holds(&doc, &when) {
                    return Ok(false);
                }
                merge_patch(&mut doc, &patch);
                tx.execute(
                    "UPDATE documents SET data = ?1 WHERE collection = ?2 AND id = ?3",
                    params![doc.to_string(), collection.as_str(), id],
                )?;
                tx.commit()?;
                store.publish(conn, collection)?;
                Ok(true)
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let removed = conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection.as_str(), id],
                )?;
                if removed > 0 {
                    store.publish(conn, collection)?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.with_conn(|conn| read_doc(conn, collection, &id)))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn fetch(&self, collection: Collection) -> Result<Snapshot, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| read_snapshot(conn, collection))
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    async fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_conn(|conn| {
                let mut touched = Vec::new();
                let tx = conn.transaction()?;
                for write in writes {
                    let collection = write.collection();
                    if !touched.contains(&collection) {
                        touched.push(collection);
                    }
                    match write {
                        WriteOp::Insert { data, .. } => {
                            write_doc(&tx, collection, &Uuid::new_v4().to_string(), &data)?;
                        }
                        WriteOp::Set { id, data, .. } => {
                            write_doc(&tx, collection, &id, &data)?;
                        }
                        WriteOp::Update { id, patch, .. } => {
                            let Some(mut doc) = read_doc(&tx, collection, &id)? else {
                                return Err(StoreError::NotFound {
                                    collection: collection.as_str(),
                                    id,
                                });
                            };
                            merge_patch(&mut doc, &patch);
                            tx.execute(
                                "UPDATE documents SET data = ?1 WHERE collection = ?2 AND id = ?3",
                                params![doc.to_string(), collection.as_str(), id],
                            )?;
                        }
                        WriteOp::Delete { id, .. } => {
                            tx.execute(
                                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                                params![collection.as_str(), id],
                            )?;
                        }
                    }
                }
                tx.commit()?;
                for collection in touched {
                    store.publish(conn, collection)?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }

    fn subscribe(&self, collection: Collection) -> SnapshotStream {
        self.channels[&collection].subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> SqliteStore {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workboard.sqlite3");
        // Leak the TempDir so it persists for the test.
        std::mem::forget(dir);
        SqliteStore::open(path).expect("open store")
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let store = temp_store();
        let id = store
            .insert(Collection::WorkItems, json!({ "title": "Write schema" }))
            .await
            .expect("insert");
        let doc = store
            .get(Collection::WorkItems, &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(doc["title"], "Write schema");
    }

    #[tokio::test]
    async fn pushes_follow_commit_order() {
        let store = temp_store();
        let mut rx = store.subscribe(Collection::Directives);
        for n in 0..3 {
            store
                .set(Collection::Directives, &format!("d{n}"), json!({ "n": n }))
                .await
                .expect("set");
        }
        let mut sizes = Vec::new();
        for _ in 0..3 {
            sizes.push(rx.recv().await.expect("push").len());
        }
        assert_eq!(sizes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = temp_store();
        let result = store
            .apply_batch(vec![
                WriteOp::Set {
                    collection: Collection::Users,
                    id: "u1".into(),
                    data: json!({ "name": "Ada" }),
                },
                WriteOp::Update {
                    collection: Collection::Users,
                    id: "ghost".into(),
                    patch: json!({ "name": "nope" }),
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
    async fn conditional_update_matches_memory_semantics() {
        let store = temp_store();
        store
            .set(
                Collection::Proposals,
                "p1",
                json!({ "approval_status": "pending" }),
            )
            .await
            .expect("set");
        let first = store
            .update(
                Collection::Proposals,
                "p1",
                json!({ "approval_status": "approved" }),
                Some(FieldIs::eq("approval_status", "pending")),
            )
            .await
            .expect("update");
        assert!(first);
        let second = store
            .update(
                Collection::Proposals,
                "p1",
                json!({ "approval_status": "rejected" }),
                Some(FieldIs::eq("approval_status", "pending")),
            )
            .await
            .expect("update");
        assert!(!second);
    }
}
