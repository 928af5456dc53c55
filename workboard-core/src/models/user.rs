use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::store::Document;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    /// Free-form attendance tag ("office", "remote", "meeting", ...).
    #[serde(default)]
    pub today_status: String,
    #[serde(default)]
    pub scheduled_status: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut user: User = serde_json::from_value(doc.data.clone())?;
        user.id = doc.id.clone();
        Ok(user)
    }

    pub fn to_data(&self) -> Value {
        let mut data = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = data.as_object_mut() {
            obj.remove("id");
        }
        data
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Member,
    Manager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Manager => "manager",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "member" => Self::Member,
            "manager" => Self::Manager,
            _ => Self::Member,
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from_str(&String::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAttendanceInput {
    pub today_status: String,
    pub scheduled_status: Option<String>,
}

impl UpdateAttendanceInput {
    pub fn to_patch(&self, now: DateTime<Utc>) -> Value {
        let mut patch = serde_json::Map::new();
        patch.insert("today_status".into(), Value::from(self.today_status.clone()));
        patch.insert(
            "scheduled_status".into(),
            self.scheduled_status
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        patch.insert("updated_at".into(), Value::from(now.to_rfc3339()));
        Value::Object(patch)
    }
}
