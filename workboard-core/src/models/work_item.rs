use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub work_type: WorkType,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub start_date: String,
    /// ISO date string as stored; may be malformed in remote data. The
    /// scorer parses it and fails closed, so it is kept raw here.
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub status: WorkStatus,
    #[serde(default)]
    pub impact: Level,
    #[serde(default)]
    pub urgency: Level,
    /// Derived on every sync tick; never trusted as stored truth.
    #[serde(default)]
    pub priority_score: f64,
    #[serde(default)]
    pub approval_status: ApprovalStatus,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_update_note: String,
}

impl WorkItem {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut item: WorkItem = serde_json::from_value(doc.data.clone())?;
        item.id = doc.id.clone();
        Ok(item)
    }

    /// Document body for the store: the id lives on the document, and the
    /// priority score is derived, so neither is persisted.
    pub fn to_data(&self) -> Value {
        let mut data = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = data.as_object_mut() {
            obj.remove("id");
            obj.remove("priority_score");
        }
        data
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "todo" => Self::Todo,
            "in_progress" => Self::InProgress,
            "done" => Self::Done,
            _ => Self::Todo,
        }
    }
}

impl<'de> Deserialize<'de> for WorkStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_str(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Low,
    Med,
    High,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }

    /// Unknown levels decode to Low rather than failing the snapshot.
    pub fn from_str(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "med" => Self::Med,
            "high" => Self::High,
            _ => Self::Low,
        }
    }

    pub fn ordinal(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Med => 2.0,
            Self::High => 3.0,
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_str(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    Planning,
    #[default]
    Development,
    Design,
    Operations,
    Meeting,
    Research,
    Documentation,
}

impl WorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Development => "development",
            Self::Design => "design",
            Self::Operations => "operations",
            Self::Meeting => "meeting",
            Self::Research => "research",
            Self::Documentation => "documentation",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "planning" => Self::Planning,
            "development" => Self::Development,
            "design" => Self::Design,
            "operations" => Self::Operations,
            "meeting" => Self::Meeting,
            "research" => Self::Research,
            "documentation" => Self::Documentation,
            _ => Self::Development,
        }
    }
}

impl<'de> Deserialize<'de> for WorkType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_str(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    None,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::None,
        }
    }

    /// Approved and Rejected admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl<'de> Deserialize<'de> for ApprovalStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_str(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkItemInput {
    pub project_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub work_type: Option<WorkType>,
    pub assignees: Option<Vec<String>>,
    pub due_date: Option<String>,
    pub status: Option<WorkStatus>,
    pub impact: Option<Level>,
    pub urgency: Option<Level>,
}

impl CreateWorkItemInput {
    /// Fill in the same defaults the board applies when a user submits a
    /// mostly-empty form: requester is the acting user, start date is today.
    pub fn into_work_item(self, requester: &str, now: DateTime<Utc>) -> WorkItem {
        let today = now.date_naive().to_string();
        WorkItem {
            id: String::new(),
            project_name: self
                .project_name
                .unwrap_or_else(|| "Unassigned project".into()),
            title: self.title.unwrap_or_else(|| "Untitled task".into()),
            description: self.description.unwrap_or_default(),
            work_type: self.work_type.unwrap_or_default(),
            assignees: self
                .assignees
                .unwrap_or_else(|| vec![requester.to_string()]),
            requester: requester.to_string(),
            start_date: today.clone(),
            due_date: self.due_date.unwrap_or(today),
            status: self.status.unwrap_or_default(),
            impact: self.impact.unwrap_or(Level::Med),
            urgency: self.urgency.unwrap_or(Level::Med),
            priority_score: 0.0,
            approval_status: ApprovalStatus::None,
            updated_at: now,
            last_update_note: "task created".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateWorkItemInput {
    pub project_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub work_type: Option<WorkType>,
    pub assignees: Option<Vec<String>>,
    pub due_date: Option<String>,
    pub status: Option<WorkStatus>,
    pub impact: Option<Level>,
    pub urgency: Option<Level>,
    pub last_update_note: Option<String>,
}

impl UpdateWorkItemInput {
    /// Patch document for the store; only the provided fields are written,
    /// plus a fresh updated_at.
    pub fn to_patch(&self, now: DateTime<Utc>) -> Value {
        let mut patch = serde_json::Map::new();
        if let Some(v) = &self.project_name {
            patch.insert("project_name".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.title {
            patch.insert("title".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.description {
            patch.insert("description".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.work_type {
            patch.insert("type".into(), Value::from(v.as_str()));
        }
        if let Some(v) = &self.assignees {
            patch.insert("assignees".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.due_date {
            patch.insert("due_date".into(), Value::from(v.clone()));
        }
        if let Some(v) = &self.status {
            patch.insert("status".into(), Value::from(v.as_str()));
        }
        if let Some(v) = &self.impact {
            patch.insert("impact".into(), Value::from(v.as_str()));
        }
        if let Some(v) = &self.urgency {
            patch.insert("urgency".into(), Value::from(v.as_str()));
        }
        if let Some(v) = &self.last_update_note {
            patch.insert("last_update_note".into(), Value::from(v.clone()));
        }
        patch.insert("updated_at".into(), Value::from(now.to_rfc3339()));
        Value::Object(patch)
    }
}
