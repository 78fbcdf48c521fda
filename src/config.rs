use std::path::PathBuf;
use std::time::Duration;

use crate::api::DEFAULT_API_BASE;
use crate::poller::{PollConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Runtime settings, read from the environment (and `.env`) with CLI overrides on top.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub storage_dir: PathBuf,
    pub poll: PollConfig,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE.to_string(),
            storage_dir: default_storage_dir(),
            poll: PollConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads `CAG_*` variables from the process environment.
    pub fn from_env() -> Self {
        // Development convenience; a missing .env is fine
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let api_url = lookup("CAG_API_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.api_url);

        let storage_dir = lookup("CAG_STORAGE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);

        let interval = parse("CAG_POLL_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let max_attempts = parse("CAG_POLL_MAX_ATTEMPTS")
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let request_timeout = parse("CAG_REQUEST_TIMEOUT_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        Self {
            api_url,
            storage_dir,
            poll: PollConfig { interval, max_attempts },
            request_timeout,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cag-chat")
}
