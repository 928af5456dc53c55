use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApprovalStatus;
use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub suggestion_text: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    /// Who resolved the proposal and when, once it reaches a terminal state.
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut proposal: Proposal = serde_json::from_value(doc.data.clone())?;
        proposal.id = doc.id.clone();
        Ok(proposal)
    }

    pub fn to_data(&self) -> Value {
        let mut data = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = data.as_object_mut() {
            obj.remove("id");
        }
        data
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProposalInput {
    pub suggestion_text: String,
    #[serde(default)]
    pub explanation: String,
}

impl CreateProposalInput {
    /// New proposals always enter the workflow as Pending.
    pub fn into_proposal(self, created_by: &str, now: DateTime<Utc>) -> Proposal {
        Proposal {
            id: String::new(),
            suggestion_text: self.suggestion_text,
            explanation: self.explanation,
            created_by: created_by.to_string(),
            created_at: now,
            approval_status: ApprovalStatus::Pending,
            resolved_by: None,
            resolved_at: None,
        }
    }
}
