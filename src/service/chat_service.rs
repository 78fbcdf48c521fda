use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::CagApi;
use crate::errors::ApiError;
use crate::models::{MessageUpdate, NewMessage, QueryRequest, QueryResponse};
use crate::poller::{poll_job_status, PollConfig, ProgressSink};
use crate::state::AppState;

/// Placeholder text when a submission is abandoned before the backend answered.
pub const CANCELLED_MESSAGE: &str = "Request was cancelled before the assistant replied.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Busy,
    /// The reply slot's id was already in the history; nothing was appended.
    Conflict,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Resolved { message_id: String, response: QueryResponse },
    Failed { message_id: String, error: ApiError },
    Rejected(RejectReason),
}

impl SubmitOutcome {
    /// Id of the assistant message this submission produced, if it got that far.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Resolved { message_id, .. } | SubmitOutcome::Failed { message_id, .. } => {
                Some(message_id)
            }
            SubmitOutcome::Rejected(_) => None,
        }
    }
}

enum Route<P> {
    Async(P),
    Sync,
}

/// Owns one submission's placeholder until it is settled.
///
/// Dropping it releases the busy flag on every path, including panics and a dropped
/// future; an unsettled placeholder is marked as cancelled first.
struct InFlight<'a> {
    state: &'a AppState,
    placeholder_id: String,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, update: MessageUpdate) {
        self.state.update_message(&self.placeholder_id, update);
        self.settled = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Submission for message {} abandoned before completion", self.placeholder_id);
            self.state
                .update_message(&self.placeholder_id, MessageUpdate::failed(CANCELLED_MESSAGE));
        }
        self.state.set_loading(false);
    }
}

/// Drives one question from the input box to a settled assistant message.
#[derive(Clone)]
pub struct ChatService<A> {
    api: A,
    poll: PollConfig,
}

impl<A: CagApi> ChatService<A> {
    pub fn new(api: A, poll: PollConfig) -> Self {
        Self { api, poll }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Submits `input` as an async job and polls until it settles.
    ///
    /// The user message and the assistant placeholder are appended before any network
    /// call. Every failure ends up in the placeholder with `error = true`; nothing is
    /// returned as `Err`.
    pub async fn submit(
        &self,
        state: &AppState,
        input: &str,
        progress: impl ProgressSink,
    ) -> SubmitOutcome {
        self.run(state, input, Route::Async(progress)).await
    }

    /// Same lifecycle as [`ChatService::submit`] over the blocking `POST /query` endpoint.
    pub async fn submit_sync(&self, state: &AppState, input: &str) -> SubmitOutcome {
        self.run(state, input, Route::<()>::Sync).await
    }

    async fn run<P: ProgressSink>(
        &self,
        state: &AppState,
        input: &str,
        route: Route<P>,
    ) -> SubmitOutcome {
        // ── Validation ────────────────────────────────────────────────────────
        if input.trim().is_empty() {
            return SubmitOutcome::Rejected(RejectReason::EmptyInput);
        }

        // ── Append user turn + placeholder, take the busy flag ───────────────
        let placeholder_id = Uuid::new_v4().to_string();
        let ticket = state.update(|store| {
            if store.is_loading() {
                return Err(RejectReason::Busy);
            }
            store
                .add_exchange(NewMessage::user(input), &placeholder_id, NewMessage::placeholder())
                .map_err(|e| {
                    error!("Could not append the exchange: {e}");
                    RejectReason::Conflict
                })?;
            store.set_loading(true);
            Ok(store.session_id().to_string())
        });
        let session_id = match ticket {
            Ok(session_id) => session_id,
            Err(reason) => {
                debug!("Submission rejected: {reason:?}");
                return SubmitOutcome::Rejected(reason);
            }
        };

        let mut in_flight =
            InFlight { state, placeholder_id: placeholder_id.clone(), settled: false };

        // ── Ask the backend ───────────────────────────────────────────────────
        let request = QueryRequest::new(input, Some(session_id));
        let result = match route {
            Route::Async(progress) => self.query_via_job(&request, progress).await,
            Route::Sync => self.api.query(&request).await,
        };

        // ── Reconcile the placeholder ─────────────────────────────────────────
        match result {
            Ok(response) => {
                info!(
                    "Query answered in {:.2}s (message {placeholder_id})",
                    response.processing_time
                );
                in_flight.settle(MessageUpdate::resolved(response.response.clone()));
                SubmitOutcome::Resolved { message_id: placeholder_id, response }
            }
            Err(err) => {
                if err.is_connection() {
                    error!("Query failed, backend unreachable: {err}");
                } else {
                    warn!("Query failed: {err}");
                }
                in_flight.settle(MessageUpdate::failed(err.user_message()));
                SubmitOutcome::Failed { message_id: placeholder_id, error: err }
            }
        }
    }

    async fn query_via_job(
        &self,
        request: &QueryRequest,
        progress: impl ProgressSink,
    ) -> Result<QueryResponse, ApiError> {
        let job_id = self.api.query_async(request).await?;
        info!("Submitted query as job {job_id}");
        poll_job_status(&self.api, &job_id, &self.poll, progress).await
    }
}
