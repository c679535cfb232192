use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry policy for a single page fetch.
///
/// `max_retries` counts retries after the first attempt, so a policy with
/// `max_retries = 3` makes at most four requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
    #[serde(default = "default_retry_methods")]
    pub retry_methods: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_retry_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_retry_methods() -> Vec<String> {
    vec!["GET".to_string(), "POST".to_string()]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            retry_statuses: default_retry_statuses(),
            retry_methods: default_retry_methods(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.retry_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// A response status is retried only for allowed methods and listed server errors
    pub fn should_retry_status(&self, method: &str, status: u16) -> bool {
        self.allows_method(method) && self.retry_statuses.contains(&status)
    }

    /// Network failures and timeouts are retried for allowed methods
    pub fn should_retry_failure(&self, method: &str) -> bool {
        self.allows_method(method)
    }

    /// Delay to wait before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);

        Duration::from_millis(delay)
    }
}
