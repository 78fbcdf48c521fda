use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cag_chat::api::{ApiClient, CagApi};
use cag_chat::errors::ApiError;
use cag_chat::models::{MessageRole, QueryRequest};
use cag_chat::poller::{poll_job_status, PollConfig};
use cag_chat::service::{ChatService, SubmitOutcome};
use cag_chat::state::{AppState, ChatStore};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const JOB_ID: &str = "abc";
const QUESTION: &str = "What pizzas are under £12?";
const ANSWER: &str = "We have Margherita (£10) and Marinara (£9).";

const FAST_POLL: PollConfig = PollConfig { interval: Duration::from_millis(20), max_attempts: 5 };

#[derive(Clone, Default)]
struct MockBackend {
    /// Job statuses served in order; the last one repeats.
    statuses: Arc<Mutex<VecDeque<Value>>>,
    requests: Arc<Mutex<Vec<Value>>>,
    content_types: Arc<Mutex<Vec<String>>>,
    status_fetches: Arc<Mutex<u32>>,
    submit_unavailable: Arc<Mutex<bool>>,
}

impl MockBackend {
    fn with_statuses(statuses: impl IntoIterator<Item = Value>) -> Self {
        let backend = Self::default();
        backend.statuses.lock().expect("statuses lock").extend(statuses);
        backend
    }

    fn record_content_type(&self, headers: &HeaderMap) {
        let value = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.content_types.lock().expect("content types lock").push(value);
    }

    fn fetches(&self) -> u32 {
        *self.status_fetches.lock().expect("fetches lock")
    }
}

fn processing() -> Value {
    json!({ "job_id": JOB_ID, "status": "processing", "result": null, "error": null })
}

fn query_response(query: &str, response: &str, session_id: Option<&str>) -> Value {
    json!({
        "query": query,
        "response": response,
        "session_id": session_id.unwrap_or("server-session"),
        "timestamp": "2024-05-01T12:00:03.512000",
        "processing_time": 3.51
    })
}

fn completed(response: &str) -> Value {
    json!({
        "job_id": JOB_ID,
        "status": "completed",
        "result": query_response(QUESTION, response, None),
        "error": null
    })
}

fn failed(error: &str) -> Value {
    json!({ "job_id": JOB_ID, "status": "failed", "result": null, "error": error })
}

async fn health(State(backend): State<MockBackend>, headers: HeaderMap) -> Json<Value> {
    backend.record_content_type(&headers);
    Json(json!({
        "status": "healthy",
        "checks": { "cag_system": true, "openai_key": true, "vector_store": false }
    }))
}

async fn query(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    backend.record_content_type(&headers);
    backend.requests.lock().expect("requests lock").push(body.clone());
    let question = body["query"].as_str().unwrap_or_default();
    Json(query_response(question, "Our house red is £6 a glass.", body["session_id"].as_str()))
}

async fn query_async(
    State(backend): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    backend.record_content_type(&headers);
    backend.requests.lock().expect("requests lock").push(body);
    if *backend.submit_unavailable.lock().expect("submit flag lock") {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "CAG System not initialized" })),
        )
            .into_response();
    }
    Json(json!({ "job_id": JOB_ID, "status": "processing" })).into_response()
}

async fn job_status(
    State(backend): State<MockBackend>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    backend.record_content_type(&headers);
    if job_id != JOB_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "Job not found" }))).into_response();
    }
    *backend.status_fetches.lock().expect("fetches lock") += 1;
    let mut statuses = backend.statuses.lock().expect("statuses lock");
    let status = if statuses.len() > 1 {
        statuses.pop_front()
    } else {
        statuses.front().cloned()
    };
    Json(status.unwrap_or_else(processing)).into_response()
}

async fn spawn_mock_backend(
    backend: MockBackend,
) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/query", post(query))
        .route("/query/async", post(query_async))
        .route("/jobs/{job_id}", get(job_status))
        .with_state(backend);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend listener");
    let address: SocketAddr = listener.local_addr().expect("mock listener local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        server.await.expect("run mock backend");
    });
    (format!("http://{address}"), shutdown_tx, handle)
}

/// Address nothing listens on: bind an ephemeral port, then release it.
async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind unused listener");
    let address = listener.local_addr().expect("unused local addr");
    drop(listener);
    format!("http://{address}")
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5)).expect("build api client")
}

async fn shutdown(shutdown_tx: oneshot::Sender<()>, server: tokio::task::JoinHandle<()>) {
    let _ = shutdown_tx.send(());
    server.await.expect("mock backend task");
}

#[tokio::test]
async fn pizza_question_round_trips_through_async_job() {
    let backend = MockBackend::with_statuses([processing(), processing(), completed(ANSWER)]);
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;
    let service = ChatService::new(client(&base_url), FAST_POLL);
    let state = AppState::default();
    let mut seen = Vec::new();

    let outcome = service
        .submit(&state, QUESTION, |status: &str| seen.push(status.to_string()))
        .await;

    assert!(matches!(outcome, SubmitOutcome::Resolved { .. }));
    let messages = state.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, QUESTION);
    assert_eq!(messages[1].content, ANSWER);
    assert!(!messages[1].processing);
    assert!(!messages[1].error);
    assert!(!state.is_loading());
    assert_eq!(seen, vec!["processing", "processing"]);
    assert_eq!(backend.fetches(), 3);

    let requests = backend.requests.lock().expect("requests lock").clone();
    assert_eq!(requests, vec![json!({ "query": QUESTION, "session_id": state.session_id() })]);

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn every_request_is_sent_as_json() {
    let backend = MockBackend::with_statuses([completed(ANSWER)]);
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;
    let api = client(&base_url);

    api.health().await.expect("health");
    let job_id = api
        .query_async(&QueryRequest::new(QUESTION, None))
        .await
        .expect("submit job");
    api.get_job_status(&job_id).await.expect("job status");

    let content_types = backend.content_types.lock().expect("content types lock").clone();
    assert_eq!(content_types.len(), 3);
    assert!(content_types.iter().all(|ct| ct == "application/json"));

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn failed_job_is_reported_verbatim() {
    let backend = MockBackend::with_statuses([processing(), failed("Error processing query: rate limited")]);
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;
    let service = ChatService::new(client(&base_url), FAST_POLL);
    let state = AppState::default();

    let outcome = service.submit(&state, QUESTION, ()).await;

    assert!(matches!(outcome, SubmitOutcome::Failed { ref error, .. } if error.is_application()));
    let reply = &state.messages()[1];
    assert_eq!(reply.content, "Error processing query: rate limited");
    assert!(reply.error);
    assert!(!reply.processing);
    assert_eq!(backend.fetches(), 2);

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn unavailable_backend_rejects_submission_with_detail() {
    let backend = MockBackend::default();
    *backend.submit_unavailable.lock().expect("submit flag lock") = true;
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;
    let service = ChatService::new(client(&base_url), FAST_POLL);
    let state = AppState::default();

    let outcome = service.submit(&state, QUESTION, ()).await;

    let SubmitOutcome::Failed { error, .. } = outcome else {
        panic!("expected a failed submission");
    };
    assert!(matches!(error, ApiError::Status { status: 503, .. }));
    assert_eq!(state.messages()[1].content, "API error (503): CAG System not initialized");
    assert_eq!(backend.fetches(), 0);
    assert!(!state.is_loading());

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn unknown_job_is_an_application_error() {
    let (base_url, shutdown_tx, server) = spawn_mock_backend(MockBackend::default()).await;

    let err = client(&base_url)
        .get_job_status("no such job")
        .await
        .expect_err("unknown job");

    assert!(err.is_application());
    assert!(matches!(&err, ApiError::Status { status: 404, message } if message == "Job not found"));

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn stuck_job_times_out_at_the_ceiling() {
    let backend = MockBackend::with_statuses([processing()]);
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;

    let err = poll_job_status(&client(&base_url), JOB_ID, &FAST_POLL, ())
        .await
        .expect_err("timeout");

    assert!(err.is_timeout());
    assert_eq!(backend.fetches(), FAST_POLL.max_attempts);

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let api = client(&unreachable_base_url().await);

    let health = api.health().await.expect_err("nothing is listening");
    assert!(health.is_connection());
    assert!(health.to_string().starts_with("Cannot connect to API"));

    let poll = poll_job_status(&api, JOB_ID, &PollConfig::default(), ())
        .await
        .expect_err("nothing is listening");
    assert!(poll.is_connection());
}

#[tokio::test]
async fn unreachable_server_settles_placeholder_quickly() {
    let service = ChatService::new(client(&unreachable_base_url().await), PollConfig::default());
    let state = AppState::default();

    let outcome = tokio::time::timeout(Duration::from_secs(5), service.submit(&state, QUESTION, ()))
        .await
        .expect("connection failure does not wait for the poll ceiling");

    assert!(matches!(outcome, SubmitOutcome::Failed { ref error, .. } if error.is_connection()));
    let reply = &state.messages()[1];
    assert!(reply.error);
    assert!(reply.content.starts_with("Cannot connect to API"));
    assert!(!state.is_loading());
}

#[tokio::test]
async fn sync_query_carries_session_and_resolves() {
    let backend = MockBackend::default();
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend.clone()).await;
    let service = ChatService::new(client(&base_url), FAST_POLL);
    let state = AppState::default();

    let outcome = service.submit_sync(&state, "What wine goes with the lasagne?").await;

    let SubmitOutcome::Resolved { response, .. } = outcome else {
        panic!("expected a resolved submission");
    };
    assert_eq!(response.session_id, state.session_id());
    assert_eq!(response.query, "What wine goes with the lasagne?");
    assert_eq!(state.messages()[1].content, "Our house red is £6 a glass.");
    assert_eq!(backend.fetches(), 0);

    shutdown(shutdown_tx, server).await;
}

#[tokio::test]
async fn conversation_survives_a_restart() {
    let backend = MockBackend::with_statuses([completed(ANSWER)]);
    let (base_url, shutdown_tx, server) = spawn_mock_backend(backend).await;
    let service = ChatService::new(client(&base_url), FAST_POLL);
    let state = AppState::default();
    let path = std::env::temp_dir()
        .join(format!("cag-chat-it-{}", uuid::Uuid::new_v4()))
        .join("cag-chat-storage.json");

    service.submit(&state, QUESTION, ()).await;
    state.save(&path).expect("save conversation");

    let restored = ChatStore::load(&path).expect("load conversation");
    assert_eq!(restored.messages(), state.messages().as_slice());
    assert_eq!(restored.session_id(), state.session_id());
    assert!(!restored.is_loading());

    let _ = std::fs::remove_dir_all(path.parent().expect("storage dir"));
    shutdown(shutdown_tx, server).await;
}
