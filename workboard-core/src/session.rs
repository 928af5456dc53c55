//! Auth-driven session supervision.
//!
//! One task consumes the identity provider's auth-state stream and keeps
//! exactly one live session in step with it: sign-in opens fresh
//! subscriptions (and seeds, for managers), sign-out or an identity change
//! tears everything down before anything new starts. Stale subscriptions
//! never leak across a login/logout cycle.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::auth::Identity;
use crate::models::{Role, UpdateAttendanceInput, User};
use crate::score::ScoreWeights;
use crate::seed::ensure_seed;
use crate::store::{Collection, DocumentStore, StoreError};
use crate::sync::SyncSession;
use crate::telemetry::SessionTelemetry;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("only managers may edit another member's attendance")]
    NotPermitted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything tied to one signed-in identity. Dropping it cancels the
/// subscriptions.
pub struct ActiveSession {
    pub identity: Identity,
    pub user: User,
    pub sync: SyncSession,
    pub telemetry: Mutex<SessionTelemetry>,
}

pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    weights: ScoreWeights,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DocumentStore>, weights: ScoreWeights) -> Self {
        Self { store, weights }
    }

    /// Drive sessions from the auth-state stream until the provider goes
    /// away. The previous session is always dropped before a new one is
    /// opened, re-authentication included.
    pub async fn run(
        self,
        mut auth_rx: watch::Receiver<Option<Identity>>,
        active_tx: watch::Sender<Option<Arc<ActiveSession>>>,
    ) {
        loop {
            let identity = auth_rx.borrow_and_update().clone();
            active_tx.send_replace(None);

            if let Some(identity) = identity {
                match self.open_session(identity).await {
                    Ok(session) => {
                        tracing::info!(user = %session.user.id, role = session.user.role.as_str(), "session started");
                        active_tx.send_replace(Some(Arc::new(session)));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to open session");
                    }
                }
            }

            if auth_rx.changed().await.is_err() {
                break;
            }
        }
        active_tx.send_replace(None);
    }

    async fn open_session(&self, identity: Identity) -> Result<ActiveSession, SessionError> {
        let user = ensure_profile(self.store.as_ref(), &identity, Utc::now()).await?;
        let sync = SyncSession::start(self.store.clone(), self.weights);

        if user.is_manager() {
            match ensure_seed(self.store.as_ref(), Utc::now()).await {
                Ok(outcome) if !outcome.is_noop() => {
                    tracing::info!(
                        work_items = outcome.work_items,
                        users = outcome.users,
                        "baseline data seeded at manager sign-in"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "seeding failed; continuing without baseline data");
                }
            }
        }

        let telemetry = Mutex::new(SessionTelemetry::new(&user.id));
        Ok(ActiveSession {
            identity,
            user,
            sync,
            telemetry,
        })
    }
}

/// Fetch the signed-in user's profile document, creating a fallback Member
/// profile when sign-up raced ahead of the profile write.
pub async fn ensure_profile(
    store: &dyn DocumentStore,
    identity: &Identity,
    now: DateTime<Utc>,
) -> Result<User, StoreError> {
    if let Some(data) = store.get(Collection::Users, &identity.user_id).await? {
        let doc = crate::store::Document {
            id: identity.user_id.clone(),
            data,
        };
        if let Ok(user) = User::from_document(&doc) {
            return Ok(user);
        }
        tracing::warn!(id = %identity.user_id, "undecodable profile document; rewriting fallback");
    }

    let name = identity
        .email
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("user")
        .to_string();
    let user = User {
        id: identity.user_id.clone(),
        name,
        email: identity.email.clone(),
        role: Role::Member,
        today_status: "office".into(),
        scheduled_status: None,
        updated_at: now,
    };
    store
        .set(Collection::Users, &user.id, user.to_data())
        .await?;
    Ok(user)
}

/// A user may edit their own attendance; a manager may edit anyone's.
pub async fn update_attendance(
    store: &dyn DocumentStore,
    acting: &User,
    target_id: &str,
    input: &UpdateAttendanceInput,
    now: DateTime<Utc>,
) -> Result<(), AttendanceError> {
    if acting.id != target_id && !acting.is_manager() {
        return Err(AttendanceError::NotPermitted);
    }
    let updated = store
        .update(Collection::Users, target_id, input.to_patch(now), None)
        .await?;
    if !updated {
        return Err(AttendanceError::NotFound(target_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdentityProvider, LocalAuth};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_session(
        rx: &mut watch::Receiver<Option<Arc<ActiveSession>>>,
        want: bool,
    ) -> Option<Arc<ActiveSession>> {
        for _ in 0..50 {
            let current = rx.borrow().clone();
            if current.is_some() == want {
                return current;
            }
            timeout(Duration::from_millis(200), rx.changed())
                .await
                .expect("session state timed out")
                .expect("manager task gone");
        }
        panic!("session never reached expected state");
    }

    #[tokio::test]
    async fn sign_in_opens_session_and_sign_out_tears_down() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let auth = Arc::new(LocalAuth::new());
        let (active_tx, mut active_rx) = watch::channel(None);

        let manager = SessionManager::new(store.clone(), ScoreWeights::default());
        let auth_rx = auth.auth_state();
        tokio::spawn(manager.run(auth_rx, active_tx));

        auth.sign_up("casey@demo.ai", "demo1234")
            .await
            .expect("sign up");
        let session = wait_for_session(&mut active_rx, true)
            .await
            .expect("session");
        assert_eq!(session.user.email, "casey@demo.ai");
        assert_eq!(session.user.role, Role::Member);

        auth.sign_out().await.expect("sign out");
        wait_for_session(&mut active_rx, false).await;
    }

    #[tokio::test]
    async fn manager_sign_in_seeds_baseline_data() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let auth = Arc::new(LocalAuth::new());
        let (active_tx, mut active_rx) = watch::channel(None);

        // Pre-provision a manager profile at the identity the provider
        // will hand out.
        let identity = auth
            .sign_up("manager1@demo.ai", "demo1234")
            .await
            .expect("sign up");
        auth.sign_out().await.expect("sign out");
        let profile = User {
            id: identity.user_id.clone(),
            name: "Alice Kim".into(),
            email: identity.email.clone(),
            role: Role::Manager,
            today_status: "office".into(),
            scheduled_status: None,
            updated_at: Utc::now(),
        };
        store
            .set(Collection::Users, &profile.id, profile.to_data())
            .await
            .expect("set profile");

        let manager = SessionManager::new(store.clone(), ScoreWeights::default());
        tokio::spawn(manager.run(auth.auth_state(), active_tx));

        auth.sign_in("manager1@demo.ai", "demo1234")
            .await
            .expect("sign in");
        wait_for_session(&mut active_rx, true).await;

        let work = store.fetch(Collection::WorkItems).await.expect("fetch");
        assert_eq!(work.len(), 8);
    }

    #[tokio::test]
    async fn fallback_profile_created_when_document_missing() {
        let store = MemoryStore::new();
        let identity = Identity {
            user_id: "fresh".into(),
            email: "dana@demo.ai".into(),
        };
        let user = ensure_profile(&store, &identity, Utc::now())
            .await
            .expect("profile");
        assert_eq!(user.name, "dana");
        assert_eq!(user.role, Role::Member);
        assert!(store
            .get(Collection::Users, "fresh")
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn attendance_edits_are_role_gated() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for user in crate::seed::baseline_users(now) {
            store
                .set(Collection::Users, &user.id, user.to_data())
                .await
                .expect("set");
        }
        let users = crate::seed::baseline_users(now);
        let manager = users[0].clone();
        let member = users[1].clone();
        let other = users[2].clone();

        let input = UpdateAttendanceInput {
            today_status: "off".into(),
            scheduled_status: Some("back tomorrow".into()),
        };

        // Own record: allowed.
        update_attendance(&store, &member, &member.id, &input, now)
            .await
            .expect("own edit");
        // Someone else's record, as a member: refused, no state change.
        let err = update_attendance(&store, &member, &other.id, &input, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::NotPermitted));
        let doc = store
            .get(Collection::Users, &other.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(doc["today_status"], "meeting");
        // Manager: allowed.
        update_attendance(&store, &manager, &other.id, &input, now)
            .await
            .expect("manager edit");
    }
}
