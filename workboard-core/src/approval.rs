//! Proposal approval workflow.
//!
//! `None -> Pending -> {Approved, Rejected}`; the terminal states admit no
//! further transitions. The terminal check rides on the store's conditional
//! update, so a concurrent approve+reject resolves at the store: whichever
//! write commits first wins and the loser surfaces as `NotPending`.

use chrono::Utc;
use serde_json::{json, Value};

use crate::models::{ApprovalStatus, CreateProposalInput, User};
use crate::store::{Collection, DocumentStore, FieldIs, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("only managers can resolve proposals")]
    NotManager,
    #[error("proposal not found: {0}")]
    NotFound(String),
    #[error("proposal is {}, not pending", .0.as_str())]
    NotPending(ApprovalStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Create a proposal in the Pending state; returns its id.
pub async fn create_proposal(
    store: &dyn DocumentStore,
    acting: &User,
    input: CreateProposalInput,
) -> Result<String, ApprovalError> {
    let proposal = input.into_proposal(&acting.id, Utc::now());
    Ok(store
        .insert(Collection::Proposals, proposal.to_data())
        .await?)
}

pub async fn approve(
    store: &dyn DocumentStore,
    acting: &User,
    proposal_id: &str,
) -> Result<(), ApprovalError> {
    resolve(store, acting, proposal_id, ApprovalStatus::Approved).await
}

pub async fn reject(
    store: &dyn DocumentStore,
    acting: &User,
    proposal_id: &str,
) -> Result<(), ApprovalError> {
    resolve(store, acting, proposal_id, ApprovalStatus::Rejected).await
}

async fn resolve(
    store: &dyn DocumentStore,
    acting: &User,
    proposal_id: &str,
    target: ApprovalStatus,
) -> Result<(), ApprovalError> {
    if !acting.is_manager() {
        return Err(ApprovalError::NotManager);
    }

    let current = current_status(store, proposal_id).await?;
    if current != ApprovalStatus::Pending {
        return Err(ApprovalError::NotPending(current));
    }

    let patch = json!({
        "approval_status": target.as_str(),
        "resolved_by": acting.id,
        "resolved_at": Utc::now().to_rfc3339(),
    });
    let updated = store
        .update(
            Collection::Proposals,
            proposal_id,
            patch,
            Some(FieldIs::eq(
                "approval_status",
                ApprovalStatus::Pending.as_str(),
            )),
        )
        .await?;
    if !updated {
        // Lost a race: someone else resolved it between our read and write.
        let now_current = current_status(store, proposal_id).await?;
        return Err(ApprovalError::NotPending(now_current));
    }

    tracing::info!(proposal_id, status = target.as_str(), by = %acting.id, "proposal resolved");
    Ok(())
}

async fn current_status(
    store: &dyn DocumentStore,
    proposal_id: &str,
) -> Result<ApprovalStatus, ApprovalError> {
    let data = store
        .get(Collection::Proposals, proposal_id)
        .await?
        .ok_or_else(|| ApprovalError::NotFound(proposal_id.to_string()))?;
    Ok(data
        .get("approval_status")
        .and_then(Value::as_str)
        .map(ApprovalStatus::from_str)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::store::MemoryStore;

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            name: id.into(),
            email: format!("{id}@demo.ai"),
            role,
            today_status: "office".into(),
            scheduled_status: None,
            updated_at: Utc::now(),
        }
    }

    async fn pending_proposal(store: &MemoryStore, creator: &User) -> String {
        create_proposal(
            store,
            creator,
            CreateProposalInput {
                suggestion_text: "Pull the ERP migration forward a sprint".into(),
                explanation: "Two high-urgency items depend on it".into(),
            },
        )
        .await
        .expect("create proposal")
    }

    #[tokio::test]
    async fn approve_then_reject_leaves_approved() {
        let store = MemoryStore::new();
        let manager = user("m1", Role::Manager);
        let id = pending_proposal(&store, &manager).await;

        approve(&store, &manager, &id).await.expect("approve");
        let err = reject(&store, &manager, &id).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::NotPending(ApprovalStatus::Approved)
        ));

        let doc = store
            .get(Collection::Proposals, &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(doc["approval_status"], "approved");
        assert_eq!(doc["resolved_by"], "m1");
    }

    #[tokio::test]
    async fn re_approval_is_refused_not_resurrected() {
        let store = MemoryStore::new();
        let manager = user("m1", Role::Manager);
        let id = pending_proposal(&store, &manager).await;

        approve(&store, &manager, &id).await.expect("approve");
        let err = approve(&store, &manager, &id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotPending(_)));
    }

    #[tokio::test]
    async fn members_cannot_resolve() {
        let store = MemoryStore::new();
        let manager = user("m1", Role::Manager);
        let member = user("u2", Role::Member);
        let id = pending_proposal(&store, &manager).await;

        let err = approve(&store, &member, &id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotManager));

        // Untouched: still pending.
        let doc = store
            .get(Collection::Proposals, &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(doc["approval_status"], "pending");
    }

    #[tokio::test]
    async fn missing_proposal_reports_not_found() {
        let store = MemoryStore::new();
        let manager = user("m1", Role::Manager);
        let err = approve(&store, &manager, "ghost").await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }
}
