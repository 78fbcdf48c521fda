use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::CagApi;
use crate::errors::ApiError;
use crate::models::{JobState, QueryResponse};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;

/// Fixed-interval polling bounds. The total wait is `interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_POLL_INTERVAL, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl PollConfig {
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Receives the raw status string of every non-terminal observation.
pub trait ProgressSink {
    fn report(&mut self, status: &str);
}

impl<F: FnMut(&str)> ProgressSink for F {
    fn report(&mut self, status: &str) {
        self(status)
    }
}

/// Channel-backed progress for a UI task that renders updates on its own schedule.
impl ProgressSink for mpsc::UnboundedSender<String> {
    fn report(&mut self, status: &str) {
        // A closed receiver just means nobody is watching any more.
        let _ = self.send(status.to_string());
    }
}

impl<S: ProgressSink> ProgressSink for Option<S> {
    fn report(&mut self, status: &str) {
        if let Some(sink) = self {
            sink.report(status);
        }
    }
}

impl ProgressSink for () {
    fn report(&mut self, _status: &str) {}
}

/// Polls `GET /jobs/{job_id}` until the job reaches a terminal state or the attempt
/// ceiling is hit.
///
/// Any failed status fetch ends polling at once; connectivity failures come back as
/// [`ApiError::Connection`]. A `completed` job without a result is treated as still
/// running.
pub async fn poll_job_status<A>(
    api: &A,
    job_id: &str,
    config: &PollConfig,
    mut progress: impl ProgressSink,
) -> Result<QueryResponse, ApiError>
where
    A: CagApi + ?Sized,
{
    let mut attempts = 0;

    while attempts < config.max_attempts {
        let job = api.get_job_status(job_id).await?;

        match job.state() {
            JobState::Completed => match job.result {
                Some(result) => {
                    debug!("Job {job_id} completed after {} fetches", attempts + 1);
                    return Ok(result);
                }
                None => warn!("Job {job_id} reported completed without a result; polling again"),
            },
            JobState::Failed => {
                let message = job
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Job failed".to_string());
                warn!("Job {job_id} failed: {message}");
                return Err(ApiError::JobFailed { message });
            }
            JobState::Processing | JobState::Unknown => {}
        }

        progress.report(&job.status);

        attempts += 1;
        if attempts < config.max_attempts {
            tokio::time::sleep(config.interval).await;
        }
    }

    warn!("Job {job_id} still not finished after {attempts} fetches");
    Err(ApiError::Timeout { elapsed: config.deadline() })
}
