//! Strategy-assist integration.
//!
//! A single request/response seam to the external text-generation service,
//! with failures classified into credential / quota / network / service and
//! rendered as user-facing advisories. An assist failure never takes the
//! session down; the chat simply answers with the advisory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::models::{Directive, Level, User, WorkItem, WorkStatus};
use crate::score;
use crate::store::{Collection, DocumentStore, StoreError};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const GENERATION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Deadlines inside this window count as "upcoming" in the chat context.
const UPCOMING_WINDOW_DAYS: i64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error("generation service rejected the credentials")]
    Credential,
    #[error("generation quota exceeded")]
    Quota,
    #[error("network failure reaching the generation service")]
    Network,
    #[error("generation service error: {0}")]
    Service(String),
}

impl AssistError {
    /// User-facing advisory line for each failure class.
    pub fn advisory(&self) -> &'static str {
        match self {
            Self::Credential => "The AI API key is not valid. Please contact an administrator.",
            Self::Quota => "The AI request limit has been reached. Please try again shortly.",
            Self::Network => "Please check your network connection.",
            Self::Service(_) => {
                "Something went wrong during AI analysis. Please try again shortly."
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("only managers can manage directives")]
    NotManager,
    #[error(transparent)]
    Assist(#[from] AssistError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait AssistModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AssistError>;
}

/// Board snapshot handed to the model as structured context.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardContext {
    pub user_name: String,
    pub total_tasks: usize,
    pub high_impact_tasks: usize,
    pub in_progress_tasks: usize,
    pub todo_tasks: usize,
    pub done_tasks: usize,
    pub project_names: Vec<String>,
    pub upcoming_deadlines: Vec<(String, String)>,
}

impl BoardContext {
    pub fn from_mirror(user: &User, work_items: &[WorkItem], now: DateTime<Utc>) -> Self {
        let horizon = now + Duration::days(UPCOMING_WINDOW_DAYS);
        let mut project_names: Vec<String> = Vec::new();
        for item in work_items {
            if !project_names.contains(&item.project_name) {
                project_names.push(item.project_name.clone());
            }
        }
        let upcoming_deadlines = work_items
            .iter()
            .filter(|item| item.status != WorkStatus::Done)
            .filter(|item| match score::parse_due_date(&item.due_date) {
                Some(due) => due <= horizon,
                None => false,
            })
            .map(|item| (item.title.clone(), item.due_date.clone()))
            .collect();

        Self {
            user_name: user.name.clone(),
            total_tasks: work_items.len(),
            high_impact_tasks: work_items
                .iter()
                .filter(|i| i.impact == Level::High)
                .count(),
            in_progress_tasks: work_items
                .iter()
                .filter(|i| i.status == WorkStatus::InProgress)
                .count(),
            todo_tasks: work_items
                .iter()
                .filter(|i| i.status == WorkStatus::Todo)
                .count(),
            done_tasks: work_items
                .iter()
                .filter(|i| i.status == WorkStatus::Done)
                .count(),
            project_names,
            upcoming_deadlines,
        }
    }
}

/// Strategy-chat prompt: assistant role, team snapshot, and any manager
/// directives the model should weigh.
pub fn strategy_prompt(context: &BoardContext, directives: &[String], question: &str) -> String {
    let mut prompt = String::from(
        "You are the strategy assistant for the WorkBoard team visibility platform.\n\
         Analyze the team's workload and answer with concise, actionable\n\
         suggestions (3-4 sentences at most).\n",
    );
    if !directives.is_empty() {
        prompt.push_str("\nManager strategy directives (always weigh these):\n");
        for (n, directive) in directives.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", n + 1, directive));
        }
    }
    prompt.push_str(&format!(
        "\nCurrent team snapshot:\n\
         - User: {}\n\
         - Total tasks: {}\n\
         - High-impact tasks: {}\n\
         - In progress: {} | Todo: {} | Done: {}\n\
         - Active projects: {}\n\
         - Upcoming deadlines: {}\n",
        context.user_name,
        context.total_tasks,
        context.high_impact_tasks,
        context.in_progress_tasks,
        context.todo_tasks,
        context.done_tasks,
        if context.project_names.is_empty() {
            "none".to_string()
        } else {
            context.project_names.join(", ")
        },
        if context.upcoming_deadlines.is_empty() {
            "none".to_string()
        } else {
            context
                .upcoming_deadlines
                .iter()
                .map(|(title, due)| format!("\"{title}\" ({due})"))
                .collect::<Vec<_>>()
                .join(", ")
        },
    ));
    prompt.push_str(&format!("\nUser question: {question}\n"));
    prompt
}

fn learning_prompt(input: &str, existing: &[String]) -> String {
    let mut prompt = String::from(
        "You are the learning module of the WorkBoard strategy assistant.\n\n\
         Existing directives:\n",
    );
    if existing.is_empty() {
        prompt.push_str("(none yet)\n");
    } else {
        for (n, directive) in existing.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", n + 1, directive));
        }
    }
    prompt.push_str(&format!(
        "\nNew manager input:\n\"{input}\"\n\n\
         Condense the input into one clear strategic directive of at most\n\
         50 characters. Output only the summary line.\n"
    ));
    prompt
}

/// One chat turn. Never fails: model errors come back as the advisory
/// string, and an empty completion falls back to a retry line.
pub async fn strategy_reply(
    model: &dyn AssistModel,
    question: &str,
    context: &BoardContext,
    directives: &[String],
) -> String {
    let prompt = strategy_prompt(context, directives, question);
    match model.generate(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => "The analysis finished but produced no result. Please try again.".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "strategy generation failed");
            e.advisory().to_string()
        }
    }
}

/// Manager teaches the assistant: summarize the input, persist a directive.
pub async fn learn_directive(
    model: &dyn AssistModel,
    store: &dyn DocumentStore,
    acting: &User,
    input: &str,
    existing: &[String],
) -> Result<String, DirectiveError> {
    if !acting.is_manager() {
        return Err(DirectiveError::NotManager);
    }
    let summary = model
        .generate(&learning_prompt(input, existing))
        .await?
        .trim()
        .to_string();
    let directive = Directive {
        id: String::new(),
        text: input.to_string(),
        summary,
        created_at: Utc::now(),
        created_by: acting.id.clone(),
        created_by_name: acting.name.clone(),
    };
    Ok(store
        .insert(Collection::Directives, directive.to_data())
        .await?)
}

/// Directive deletion is manager-only, immediate, and irreversible.
pub async fn delete_directive(
    store: &dyn DocumentStore,
    acting: &User,
    directive_id: &str,
) -> Result<(), DirectiveError> {
    if !acting.is_manager() {
        return Err(DirectiveError::NotManager);
    }
    store.delete(Collection::Directives, directive_id).await?;
    Ok(())
}

/// Client for a Gemini-style generateContent endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: GENERATION_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> AssistError {
        match status.as_u16() {
            401 | 403 => AssistError::Credential,
            429 => AssistError::Quota,
            _ => AssistError::Service(format!("{status}: {body}")),
        }
    }

    fn classify_transport(e: reqwest::Error) -> AssistError {
        if e.is_connect() || e.is_timeout() {
            AssistError::Network
        } else {
            AssistError::Service(e.to_string())
        }
    }
}

#[async_trait]
impl AssistModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AssistError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AssistError::Service(e.to_string()))?;
        let text = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }
}
