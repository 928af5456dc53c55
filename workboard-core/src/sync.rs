//! Live collection mirrors.
//!
//! One `SyncSession` owns a standing subscription per collection and keeps
//! an in-process mirror of each, replaced wholesale on every push. Mirrors
//! are the only locally held state and only the sync tasks write them; the
//! rest of the system reads snapshots and expresses every mutation as a
//! store write, so authoritative state always arrives via the next push.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::models::{Directive, Proposal, User, WorkItem};
use crate::score::{priority_score, ScoreWeights};
use crate::store::{Collection, DocumentStore, Snapshot};

/// Deadline pressure drifts as the clock moves, so scores are refreshed
/// even when no push arrives.
const RESCORE_INTERVAL: Duration = Duration::from_secs(60);

/// Read-only snapshots of the four collections.
#[derive(Clone)]
pub struct Mirrors {
    work_items: watch::Receiver<Arc<Vec<WorkItem>>>,
    users: watch::Receiver<Arc<Vec<User>>>,
    proposals: watch::Receiver<Arc<Vec<Proposal>>>,
    directives: watch::Receiver<Arc<Vec<Directive>>>,
}

impl Mirrors {
    pub fn work_items(&self) -> Arc<Vec<WorkItem>> {
        self.work_items.borrow().clone()
    }

    /// Work items sorted by priority score, highest first.
    pub fn ranked_work_items(&self) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self.work_items.borrow().iter().cloned().collect();
        items.sort_by(|a, b| {
            b.priority_score
                .partial_cmp(&a.priority_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items
    }

    pub fn users(&self) -> Arc<Vec<User>> {
        self.users.borrow().clone()
    }

    pub fn user_by_id(&self, id: &str) -> Option<User> {
        self.users.borrow().iter().find(|u| u.id == id).cloned()
    }

    pub fn proposals(&self) -> Arc<Vec<Proposal>> {
        self.proposals.borrow().clone()
    }

    pub fn directives(&self) -> Arc<Vec<Directive>> {
        self.directives.borrow().clone()
    }

    pub fn work_items_watch(&self) -> watch::Receiver<Arc<Vec<WorkItem>>> {
        self.work_items.clone()
    }

    pub fn users_watch(&self) -> watch::Receiver<Arc<Vec<User>>> {
        self.users.clone()
    }

    pub fn proposals_watch(&self) -> watch::Receiver<Arc<Vec<Proposal>>> {
        self.proposals.clone()
    }

    pub fn directives_watch(&self) -> watch::Receiver<Arc<Vec<Directive>>> {
        self.directives.clone()
    }
}

/// Four subscriptions tied to one authenticated session. Dropping the
/// session (or calling `shutdown`) cancels all of them; a push or write
/// completing afterwards is discarded, never applied to a dead mirror.
pub struct SyncSession {
    mirrors: Mirrors,
    weights_tx: watch::Sender<ScoreWeights>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    pub fn start(store: Arc<dyn DocumentStore>, weights: ScoreWeights) -> Self {
        let (weights_tx, weights_rx) = watch::channel(weights);
        let (work_tx, work_rx) = watch::channel(Arc::new(Vec::new()));
        let (users_tx, users_rx) = watch::channel(Arc::new(Vec::new()));
        let (proposals_tx, proposals_rx) = watch::channel(Arc::new(Vec::new()));
        let (directives_tx, directives_rx) = watch::channel(Arc::new(Vec::new()));

        let tasks = vec![
            tokio::spawn(run_work_item_mirror(store.clone(), weights_rx, work_tx)),
            tokio::spawn(run_mirror(
                store.clone(),
                Collection::Users,
                users_tx,
                decode_users,
            )),
            tokio::spawn(run_mirror(
                store.clone(),
                Collection::Proposals,
                proposals_tx,
                decode_proposals,
            )),
            tokio::spawn(run_mirror(
                store,
                Collection::Directives,
                directives_tx,
                decode_directives,
            )),
        ];

        Self {
            mirrors: Mirrors {
                work_items: work_rx,
                users: users_rx,
                proposals: proposals_rx,
                directives: directives_rx,
            },
            weights_tx,
            tasks,
        }
    }

    pub fn mirrors(&self) -> &Mirrors {
        &self.mirrors
    }

    pub fn weights(&self) -> ScoreWeights {
        *self.weights_tx.borrow()
    }

    /// Changing weights triggers an immediate rescore of the work-item
    /// mirror without touching the store.
    pub fn set_weights(&self, weights: ScoreWeights) {
        let _ = self.weights_tx.send(weights);
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_work_item_mirror(
    store: Arc<dyn DocumentStore>,
    mut weights_rx: watch::Receiver<ScoreWeights>,
    tx: watch::Sender<Arc<Vec<WorkItem>>>,
) {
    // Subscribe before the initial fetch so no commit falls in the gap.
    let mut rx = store.subscribe(Collection::WorkItems);
    let mut items: Vec<WorkItem> = Vec::new();
    let mut weights = *weights_rx.borrow();

    match store.fetch(Collection::WorkItems).await {
        Ok(snapshot) => {
            items = decode_work_items(&snapshot);
            publish_scored(&tx, &items, weights);
        }
        Err(e) => {
            tracing::warn!(collection = "work_items", error = %e, "initial fetch failed; mirror starts empty");
        }
    }

    let mut rescore = tokio::time::interval(RESCORE_INTERVAL);
    rescore.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    rescore.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Ok(snapshot) => {
                    items = decode_work_items(&snapshot);
                    publish_scored(&tx, &items, weights);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(collection = "work_items", skipped, "subscription lagged; catching up to latest snapshot");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::warn!(collection = "work_items", "subscription closed; mirror left at last known snapshot");
                    break;
                }
            },
            changed = weights_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                weights = *weights_rx.borrow_and_update();
                publish_scored(&tx, &items, weights);
            }
            _ = rescore.tick() => {
                publish_scored(&tx, &items, weights);
            }
        }
    }
}

async fn run_mirror<T: Send + Sync + 'static>(
    store: Arc<dyn DocumentStore>,
    collection: Collection,
    tx: watch::Sender<Arc<Vec<T>>>,
    decode: fn(&Snapshot) -> Vec<T>,
) {
    let mut rx = store.subscribe(collection);

    match store.fetch(collection).await {
        Ok(snapshot) => {
            let _ = tx.send(Arc::new(decode(&snapshot)));
        }
        Err(e) => {
            tracing::warn!(collection = collection.as_str(), error = %e, "initial fetch failed; mirror starts empty");
        }
    }

    loop {
        match rx.recv().await {
            Ok(snapshot) => {
                let _ = tx.send(Arc::new(decode(&snapshot)));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(collection = collection.as_str(), skipped, "subscription lagged; catching up to latest snapshot");
            }
            Err(broadcast::error::RecvError::Closed) => {
                // Failure on one collection never tears down the others;
                // the stale-but-consistent mirror stays readable.
                tracing::warn!(collection = collection.as_str(), "subscription closed; mirror left at last known snapshot");
                break;
            }
        }
    }
}

fn publish_scored(tx: &watch::Sender<Arc<Vec<WorkItem>>>, items: &[WorkItem], weights: ScoreWeights) {
    let now = Utc::now();
    let scored: Vec<WorkItem> = items
        .iter()
        .cloned()
        .map(|mut item| {
            item.priority_score =
                priority_score(item.impact, item.urgency, &item.due_date, now, &weights);
            item
        })
        .collect();
    let _ = tx.send(Arc::new(scored));
}

fn decode_work_items(snapshot: &Snapshot) -> Vec<WorkItem> {
    snapshot
        .iter()
        .filter_map(|doc| match WorkItem::from_document(doc) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "skipping undecodable work item");
                None
            }
        })
        .collect()
}

fn decode_users(snapshot: &Snapshot) -> Vec<User> {
    snapshot
        .iter()
        .filter_map(|doc| match User::from_document(doc) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "skipping undecodable user");
                None
            }
        })
        .collect()
}

fn decode_proposals(snapshot: &Snapshot) -> Vec<Proposal> {
    snapshot
        .iter()
        .filter_map(|doc| match Proposal::from_document(doc) {
            Ok(proposal) => Some(proposal),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "skipping undecodable proposal");
                None
            }
        })
        .collect()
}

fn decode_directives(snapshot: &Snapshot) -> Vec<Directive> {
    let mut directives: Vec<Directive> = snapshot
        .iter()
        .filter_map(|doc| match Directive::from_document(doc) {
            Ok(directive) => Some(directive),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "skipping undecodable directive");
                None
            }
        })
        .collect();
    directives.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    directives
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tokio::time::timeout;

    async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, mut pred: F)
    where
        F: FnMut(&T) -> bool,
    {
        for _ in 0..50 {
            if pred(&rx.borrow()) {
                return;
            }
            timeout(Duration::from_millis(200), rx.changed())
                .await
                .expect("mirror update timed out")
                .expect("mirror sender dropped");
        }
        panic!("mirror never reached expected state");
    }

    #[tokio::test]
    async fn mirror_matches_pushed_snapshot_with_recomputed_scores() {
        let store = Arc::new(MemoryStore::new());
        let session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().work_items_watch();

        store
            .set(
                Collection::WorkItems,
                "w1",
                json!({
                    "title": "Harden the gateway",
                    "impact": "high",
                    "urgency": "high",
                    "due_date": Utc::now().date_naive().to_string(),
                }),
            )
            .await
            .expect("set");

        wait_until(&mut rx, |items| items.len() == 1).await;
        let items = session.mirrors().work_items();
        assert_eq!(items[0].id, "w1");
        assert_eq!(items[0].title, "Harden the gateway");
        // impact 3*3 + urgency 3*2 + deadline 10*5
        assert_eq!(items[0].priority_score, 65.0);
    }

    #[tokio::test]
    async fn weight_change_rescores_without_a_push() {
        let store = Arc::new(MemoryStore::new());
        let session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().work_items_watch();

        store
            .set(
                Collection::WorkItems,
                "w1",
                json!({
                    "impact": "high",
                    "urgency": "low",
                    "due_date": Utc::now().date_naive().to_string(),
                }),
            )
            .await
            .expect("set");
        wait_until(&mut rx, |items| items.len() == 1).await;

        session.set_weights(ScoreWeights {
            impact: 0.0,
            urgency: 0.0,
            deadline: 1.0,
        });
        wait_until(&mut rx, |items| {
            items.first().map(|i| i.priority_score) == Some(10.0)
        })
        .await;
        assert_eq!(session.mirrors().work_items()[0].impact, Level::High);
    }

    #[tokio::test]
    async fn undecodable_documents_are_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().users_watch();

        store
            .apply_batch(vec![
                crate::store::WriteOp::Set {
                    collection: Collection::Users,
                    id: "broken".into(),
                    data: json!(42),
                },
                crate::store::WriteOp::Set {
                    collection: Collection::Users,
                    id: "u1".into(),
                    data: json!({ "name": "Ada", "role": "manager" }),
                },
            ])
            .await
            .expect("batch");

        wait_until(&mut rx, |users| users.len() == 1).await;
        assert_eq!(session.mirrors().users()[0].id, "u1");
    }

    #[tokio::test]
    async fn directives_mirror_orders_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().directives_watch();

        store
            .set(
                Collection::Directives,
                "d1",
                json!({ "text": "older", "created_at": "2026-08-01T00:00:00Z" }),
            )
            .await
            .expect("set");
        store
            .set(
                Collection::Directives,
                "d2",
                json!({ "text": "newer", "created_at": "2026-08-05T00:00:00Z" }),
            )
            .await
            .expect("set");

        wait_until(&mut rx, |directives| directives.len() == 2).await;
        let directives = session.mirrors().directives();
        assert_eq!(directives[0].text, "newer");
        assert_eq!(directives[1].text, "older");
    }

    #[tokio::test]
    async fn shutdown_discards_later_writes() {
        let store = Arc::new(MemoryStore::new());
        let mut session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().work_items_watch();

        store
            .set(Collection::WorkItems, "w1", json!({ "title": "first" }))
            .await
            .expect("set");
        wait_until(&mut rx, |items| items.len() == 1).await;

        session.shutdown();
        store
            .set(Collection::WorkItems, "w2", json!({ "title": "second" }))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.mirrors().work_items().len(), 1);
    }

    #[tokio::test]
    async fn mirrors_rebuild_from_store_on_fresh_session() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(Collection::WorkItems, "w1", json!({ "title": "persisted" }))
            .await
            .expect("set");

        let session = SyncSession::start(store.clone(), ScoreWeights::default());
        let mut rx = session.mirrors().work_items_watch();
        wait_until(&mut rx, |items| items.len() == 1).await;
        assert_eq!(session.mirrors().work_items()[0].title, "persisted");
    }
}
