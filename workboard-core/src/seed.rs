//! Idempotent demo-data bootstrap, run once per manager session start.
//!
//! Deduplication is best-effort, not a distributed lock: two managers
//! signing in at the same instant can both observe an empty collection and
//! both seed. That duplicate-insert window is an accepted, low-harm race;
//! within one store the whole pass still commits as a single atomic batch.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::models::{ApprovalStatus, Level, Role, User, WorkItem, WorkStatus, WorkType};
use crate::store::{Collection, DocumentStore, StoreError, WriteOp};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedOutcome {
    pub work_items: usize,
    pub users: usize,
}

impl SeedOutcome {
    pub fn is_noop(&self) -> bool {
        self.work_items == 0 && self.users == 0
    }
}

/// Ensure the baseline demo records exist. Work items seed only into an
/// empty collection; users top up by stable id, so a partial prior seed
/// gets only its missing members. All inserts commit in one batch.
pub async fn ensure_seed(
    store: &dyn DocumentStore,
    now: DateTime<Utc>,
) -> Result<SeedOutcome, StoreError> {
    let mut writes = Vec::new();
    let mut outcome = SeedOutcome::default();

    let work = store.fetch(Collection::WorkItems).await?;
    if work.is_empty() {
        for item in baseline_work_items(now) {
            writes.push(WriteOp::Insert {
                collection: Collection::WorkItems,
                data: item.to_data(),
            });
            outcome.work_items += 1;
        }
    }

    let users = store.fetch(Collection::Users).await?;
    let existing: HashSet<&str> = users.iter().map(|doc| doc.id.as_str()).collect();
    for user in baseline_users(now) {
        if !existing.contains(user.id.as_str()) {
            writes.push(WriteOp::Set {
                collection: Collection::Users,
                id: user.id.clone(),
                data: user.to_data(),
            });
            outcome.users += 1;
        }
    }

    if !writes.is_empty() {
        store.apply_batch(writes).await?;
        tracing::info!(
            work_items = outcome.work_items,
            users = outcome.users,
            "seeded baseline demo data"
        );
    }
    Ok(outcome)
}

pub fn baseline_users(now: DateTime<Utc>) -> Vec<User> {
    let user = |id: &str, name: &str, email: &str, role, today: &str, planned: &str| User {
        id: id.into(),
        name: name.into(),
        email: email.into(),
        role,
        today_status: today.into(),
        scheduled_status: Some(planned.into()),
        updated_at: now,
    };
    vec![
        user(
            "u1",
            "Alice Kim",
            "manager1@demo.ai",
            Role::Manager,
            "office",
            "leading the afternoon strategy review",
        ),
        user(
            "u2",
            "Brian Lee",
            "member1@demo.ai",
            Role::Member,
            "remote",
            "half-day off from 2pm",
        ),
        user(
            "u3",
            "Chloe Park",
            "jimin@demo.ai",
            Role::Member,
            "meeting",
            "client visit downtown",
        ),
        user(
            "u4",
            "Daniel Choi",
            "dong@demo.ai",
            Role::Member,
            "field",
            "heading home from the site",
        ),
    ]
}

pub fn baseline_work_items(now: DateTime<Utc>) -> Vec<WorkItem> {
    struct Blueprint {
        title: &'static str,
        project: &'static str,
        work_type: WorkType,
        status: WorkStatus,
        impact: Level,
        urgency: Level,
    }
    let blueprints = [
        Blueprint {
            title: "Design the infrastructure security protocol",
            project: "NextGen AI Platform",
            work_type: WorkType::Development,
            status: WorkStatus::InProgress,
            impact: Level::High,
            urgency: Level::High,
        },
        Blueprint {
            title: "Draft the global design guidelines",
            project: "Global UX Renewal",
            work_type: WorkType::Design,
            status: WorkStatus::Todo,
            impact: Level::Med,
            urgency: Level::Med,
        },
        Blueprint {
            title: "Optimize the core API endpoints",
            project: "NextGen AI Platform",
            work_type: WorkType::Development,
            status: WorkStatus::InProgress,
            impact: Level::High,
            urgency: Level::Med,
        },
        Blueprint {
            title: "Migrate the ERP database",
            project: "Internal ERP System",
            work_type: WorkType::Operations,
            status: WorkStatus::Todo,
            impact: Level::High,
            urgency: Level::High,
        },
        Blueprint {
            title: "Analyze user experience feedback",
            project: "Global UX Renewal",
            work_type: WorkType::Research,
            status: WorkStatus::Done,
            impact: Level::Low,
            urgency: Level::Low,
        },
        Blueprint {
            title: "Draft the new service proposal",
            project: "NextGen AI Platform",
            work_type: WorkType::Planning,
            status: WorkStatus::Todo,
            impact: Level::Med,
            urgency: Level::Med,
        },
        Blueprint {
            title: "Profile front-end performance",
            project: "NextGen AI Platform",
            work_type: WorkType::Development,
            status: WorkStatus::InProgress,
            impact: Level::High,
            urgency: Level::High,
        },
        Blueprint {
            title: "Automate the deployment scripts",
            project: "Internal ERP System",
            work_type: WorkType::Operations,
            status: WorkStatus::Todo,
            impact: Level::Med,
            urgency: Level::Low,
        },
    ];

    let users = baseline_users(now);
    let today = now.date_naive().to_string();
    blueprints
        .into_iter()
        .enumerate()
        .map(|(i, bp)| WorkItem {
            id: String::new(),
            project_name: bp.project.into(),
            title: bp.title.into(),
            description: format!("Key task carried by its owner toward the {} goals.", bp.project),
            work_type: bp.work_type,
            assignees: vec![users[i % users.len()].id.clone()],
            requester: users[0].id.clone(),
            start_date: today.clone(),
            due_date: (now + Duration::days((i as i64) + 2)).date_naive().to_string(),
            status: bp.status,
            impact: bp.impact,
            urgency: bp.urgency,
            priority_score: 0.0,
            approval_status: ApprovalStatus::None,
            updated_at: now,
            last_update_note: "initial assignment".into(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn seeding_twice_changes_nothing() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = ensure_seed(&store, now).await.expect("seed");
        assert_eq!(first.work_items, 8);
        assert_eq!(first.users, 4);

        let second = ensure_seed(&store, now).await.expect("seed");
        assert!(second.is_noop());

        let work = store.fetch(Collection::WorkItems).await.expect("fetch");
        let users = store.fetch(Collection::Users).await.expect("fetch");
        assert_eq!(work.len(), 8);
        assert_eq!(users.len(), 4);
    }

    #[tokio::test]
    async fn users_top_up_by_absent_id_only() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let preexisting = &baseline_users(now)[1];
        store
            .set(Collection::Users, &preexisting.id, preexisting.to_data())
            .await
            .expect("set");

        let outcome = ensure_seed(&store, now).await.expect("seed");
        assert_eq!(outcome.users, 3);
        assert_eq!(
            store.fetch(Collection::Users).await.expect("fetch").len(),
            4
        );
    }

    // Two sessions seeding at the same instant is the documented race:
    // both may observe the empty collection before either commits. Work
    // items can double up (inserted under generated ids); users cannot,
    // because they upsert at stable ids.
    #[tokio::test]
    async fn concurrent_seeding_race_is_bounded() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let (a, b) = tokio::join!(ensure_seed(&store, now), ensure_seed(&store, now));
        a.expect("seed a");
        b.expect("seed b");

        let work = store
            .fetch(Collection::WorkItems)
            .await
            .expect("fetch")
            .len();
        assert!(work == 8 || work == 16, "one or two full baselines, got {work}");
        assert_eq!(
            store.fetch(Collection::Users).await.expect("fetch").len(),
            4
        );
    }

    #[tokio::test]
    async fn nonempty_work_items_are_left_alone() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .insert(
                Collection::WorkItems,
                serde_json::json!({ "title": "already here" }),
            )
            .await
            .expect("insert");

        let outcome = ensure_seed(&store, now).await.expect("seed");
        assert_eq!(outcome.work_items, 0);
        assert_eq!(
            store
                .fetch(Collection::WorkItems)
                .await
                .expect("fetch")
                .len(),
            1
        );
    }
}
