use std::time::Duration;

use thiserror::Error;

/// Shown when an error carries no usable message of its own.
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong while processing your request.";

/// Errors surfaced by the transport client and the job poller.
#[derive(Debug, Error)]
pub enum ApiError {
    // ── Setup ────────────────────────────────────────────────────────────────
    #[error("Failed to build HTTP client: {0}")]
    ClientSetup(#[source] reqwest::Error),

    // ── Connectivity ─────────────────────────────────────────────────────────
    #[error("Cannot connect to API at {base_url}. Is the CAG server running?")]
    Connection {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },

    // ── Application ──────────────────────────────────────────────────────────
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from API: {message}")]
    InvalidResponse { message: String },

    #[error("{message}")]
    JobFailed { message: String },

    // ── Deadline ─────────────────────────────────────────────────────────────
    #[error("Request timeout after {}", describe_duration(.elapsed))]
    Timeout { elapsed: Duration },
}

impl ApiError {
    pub fn connection(base_url: impl Into<String>, source: reqwest::Error) -> Self {
        ApiError::Connection { base_url: base_url.into(), source }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, ApiError::Connection { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    /// Server was reachable but the exchange or the job itself failed.
    pub fn is_application(&self) -> bool {
        matches!(
            self,
            ApiError::Status { .. } | ApiError::InvalidResponse { .. } | ApiError::JobFailed { .. }
        )
    }

    /// Text placed into a failed assistant message.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_FAILURE.to_string()
        } else {
            message
        }
    }
}

/// Errors raised by the chat store and its persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access chat storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chat storage is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message '{id}' already exists")]
    DuplicateMessage { id: String },
}

/// Renders a duration the way users read deadlines: "2 minutes", "90 seconds".
///
/// Anything that is not a whole number of seconds is given in milliseconds.
pub fn describe_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 || duration.subsec_millis() != 0 {
        return format!("{} ms", duration.as_millis());
    }
    if secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{secs} seconds")
    }
}
