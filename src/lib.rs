//! Chat client for the restaurant CAG assistant: submits questions as backend jobs,
//! polls them to completion and keeps the chat history consistent while it waits.

pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod poller;
pub mod render;
pub mod service;
pub mod state;

pub use api::{ApiClient, CagApi};
pub use config::Config;
pub use errors::{ApiError, StoreError};
pub use models::{Message, MessageRole, MessageUpdate, NewMessage};
pub use poller::{poll_job_status, PollConfig, ProgressSink};
pub use service::{ChatService, RejectReason, SubmitOutcome};
pub use state::{AppState, ChatStore};
