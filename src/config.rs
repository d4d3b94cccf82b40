//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Locations of the on-disk OAuth state.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// OAuth client credentials file (as downloaded from the provider console).
    pub credentials_path: PathBuf,
    /// Stored access/refresh token pair, produced by the authorize flow.
    pub token_path: PathBuf,
}

impl GmailConfig {
    /// Build config from environment variables, falling back to the
    /// conventional file names in the working directory.
    pub fn from_env() -> Self {
        let credentials_path = std::env::var("GMAIL_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("credentials.json"));

        let token_path = std::env::var("GMAIL_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("token.json"));

        Self {
            credentials_path,
            token_path,
        }
    }
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("credentials.json"),
            token_path: PathBuf::from("token.json"),
        }
    }
}

/// Per-call polling parameters.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Maximum polling attempts before declaring exhaustion.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl RetrievalOptions {
    /// Override defaults with optional caller-supplied values (the task
    /// interface passes raw optional numbers through from the test glue).
    pub fn overridden(max_retries: Option<u32>, retry_delay_ms: Option<u64>) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: max_retries.unwrap_or(defaults.max_retries),
            retry_delay: retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_delay: Duration::from_millis(3000), // 3 seconds
        }
    }
}
