//! Release polling
//!
//! Periodically asks a JSON release endpoint (`{"tag_name": "v1.2.3"}`) for the
//! latest published version and logs when this binary is behind.

use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::retry::{send_with_retry, HttpCallError, HttpRetryPolicy};

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
}

pub struct VersionChecker {
    client: reqwest::Client,
    url: String,
    current: String,
    policy: HttpRetryPolicy,
}

impl VersionChecker {
    /// Creates a checker for `url` comparing against the crate version.
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config::version_check::request_timeout())
            .user_agent(concat!("tgcast/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            current: env!("CARGO_PKG_VERSION").to_string(),
            policy: HttpRetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_current(mut self, current: impl Into<String>) -> Self {
        self.current = current.into();
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HttpRetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetches the latest published version, without a leading `v`.
    pub async fn fetch_latest(&self) -> AppResult<String> {
        let outcome = send_with_retry(&self.policy, || self.client.get(&self.url)).await;
        let response = match outcome.result {
            Ok(response) => response,
            Err(err) => {
                return Err(match err.into_last_error() {
                    HttpCallError::Transport(e) => AppError::Http(e),
                    HttpCallError::Status { status, .. } => AppError::HttpStatus(status),
                });
            }
        };

        let release: ReleaseInfo = response.json().await?;
        Ok(release.tag_name.trim_start_matches('v').to_string())
    }

    /// Returns the newer version if the endpoint advertises one.
    pub async fn check(&self) -> AppResult<Option<String>> {
        let latest = self.fetch_latest().await?;
        if is_newer(&latest, &self.current) {
            Ok(Some(latest))
        } else {
            Ok(None)
        }
    }
}

/// Compares dotted numeric versions; non-numeric parts compare as 0.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    fn parts(v: &str) -> Vec<u64> {
        v.trim_start_matches('v')
            .split(['.', '-', '+'])
            .take(3)
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    }
    let (a, b) = (parts(candidate), parts(current));
    for i in 0..3 {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    false
}

/// Starts the background poller. It stops when `shutdown` is cancelled.
pub fn start_version_poller(checker: Arc<VersionChecker>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config::version_check::poll_interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match checker.check().await {
                Ok(Some(latest)) => log::info!(
                    "🆕 New version available: {} (running {})",
                    latest,
                    checker.current
                ),
                Ok(None) => log::debug!("Version check: up to date"),
                Err(e) => log::warn!("Version check failed: {}", e),
            }
        }
    })
}
