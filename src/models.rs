use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Chat messages ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat turn as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub error: bool,
}

/// The caller-supplied part of a message; the store fills in `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub processing: bool,
    pub error: bool,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), processing: false, error: false }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Empty assistant turn awaiting the backend's answer.
    pub fn placeholder() -> Self {
        Self { processing: true, ..Self::new(MessageRole::Assistant, String::new()) }
    }

    pub(crate) fn into_message(self, id: String) -> Message {
        Message {
            id,
            role: self.role,
            content: self.content,
            timestamp: Utc::now(),
            processing: self.processing,
            error: self.error,
        }
    }
}

/// Partial update merged into an existing message; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub processing: Option<bool>,
    pub error: Option<bool>,
}

impl MessageUpdate {
    /// Settles a placeholder with the backend's answer.
    pub fn resolved(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), processing: Some(false), error: None }
    }

    /// Settles a placeholder with a visible failure.
    pub fn failed(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), processing: Some(false), error: Some(true) }
    }

    pub(crate) fn apply(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(processing) = self.processing {
            message.processing = processing;
        }
        if let Some(error) = self.error {
            message.error = error;
        }
    }
}

// ── Wire types ────────────────────────────────────────────────────────────────

/// Request body for `POST /query` and `POST /query/async`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, session_id: Option<String>) -> Self {
        Self { query: query.into(), session_id }
    }
}

/// Response of a processed query. Only `response` drives the client; the rest is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
    pub processing_time: f64,
}

/// Response of `POST /query/async`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitted {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Response of `GET /jobs/{job_id}`. `status` is kept raw; see [`JobStatus::state`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<QueryResponse>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Completed,
    Failed,
    Unknown,
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self.status.as_str() {
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => JobState::Unknown,
        }
    }
}
