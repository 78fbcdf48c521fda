pub mod chat_service;

pub use chat_service::{ChatService, RejectReason, SubmitOutcome, CANCELLED_MESSAGE};
