//! Unit-of-work configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of a [`DbContext`](crate::context::DbContext).
///
/// Deserializable, so it can be loaded from whatever configuration source the
/// application already uses:
///
/// ```ignore
/// let config: ContextConfig = serde_json::from_str(r#"{ "add_pagination": true }"#)?;
/// assert_eq!(config.commit_timeout_ms, 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Assign a document position to every staged entity.
    pub add_pagination: bool,
    /// Longest wait for outstanding operations before a save gives up.
    pub commit_timeout_ms: u64,
    /// Interval at which the commit barrier is polled.
    pub poll_interval_ms: u64,
    /// Lower batch ceiling than the backend's own.
    pub max_batch_size: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            add_pagination: false,
            commit_timeout_ms: 3000,
            poll_interval_ms: 50,
            max_batch_size: None,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pagination(mut self, enabled: bool) -> Self {
        self.add_pagination = enabled;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: ContextConfig = serde_json::from_str(r#"{ "add_pagination": true }"#).unwrap();

        assert!(config.add_pagination);
        assert_eq!(config.commit_timeout(), Duration::from_secs(3));
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.max_batch_size, None);
    }
}
