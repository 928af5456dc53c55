use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

/// A manager-authored strategic instruction fed to the assist model as
/// extra context. Displayed newest-first; deletable by any manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Directive {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_by_name: String,
}

impl Directive {
    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut directive: Directive = serde_json::from_value(doc.data.clone())?;
        directive.id = doc.id.clone();
        Ok(directive)
    }

    pub fn to_data(&self) -> Value {
        let mut data = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = data.as_object_mut() {
            obj.remove("id");
        }
        data
    }

    /// The line handed to the assist model: the summary when one was
    /// derived, the raw text otherwise.
    pub fn context_line(&self) -> &str {
        if self.summary.is_empty() {
            &self.text
        } else {
            &self.summary
        }
    }
}
