//! Environment-driven queue configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::job::BackoffStrategy;

/// Queue-layer configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backing-store connection string. Unused by the in-memory store;
    /// consumed by real store implementations at wiring time.
    pub store_url: Option<String>,
    /// Worker concurrency per queue unless overridden.
    pub default_concurrency: usize,
    /// Attempts before a job is terminal.
    pub max_attempts: u32,
    /// Base delay of the default exponential backoff.
    pub backoff_base_secs: u64,
    /// Per-queue concurrency overrides, `queue name -> limit`.
    pub concurrency_overrides: HashMap<String, usize>,
    /// Worker sleep between empty claims.
    pub poll_interval: Duration,
    /// How often the drain controller re-reads active counts.
    pub drain_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            default_concurrency: 5,
            max_attempts: 3,
            backoff_base_secs: 5,
            concurrency_overrides: HashMap::new(),
            poll_interval: Duration::from_millis(100),
            drain_poll_interval: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Build configuration from the environment.
    ///
    /// Reads:
    /// - `TALLY_STORE_URL`: backing-store connection string
    /// - `TALLY_DEFAULT_CONCURRENCY`: per-queue worker limit (default: 5)
    /// - `TALLY_MAX_ATTEMPTS`: retry budget (default: 3)
    /// - `TALLY_BACKOFF_BASE_SECS`: backoff base delay (default: 5)
    /// - `TALLY_QUEUE_CONCURRENCY`: comma list of `queue=limit` overrides
    ///
    /// Malformed values fall back to defaults; boot never fails on
    /// configuration parsing.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            store_url: std::env::var("TALLY_STORE_URL").ok(),
            default_concurrency: env_parse("TALLY_DEFAULT_CONCURRENCY")
                .unwrap_or(defaults.default_concurrency),
            max_attempts: env_parse("TALLY_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            backoff_base_secs: env_parse("TALLY_BACKOFF_BASE_SECS")
                .unwrap_or(defaults.backoff_base_secs),
            concurrency_overrides: std::env::var("TALLY_QUEUE_CONCURRENCY")
                .map(|raw| parse_overrides(&raw))
                .unwrap_or_default(),
            ..defaults
        }
    }

    /// Effective worker concurrency for a queue.
    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.concurrency_overrides
            .get(queue)
            .copied()
            .unwrap_or(self.default_concurrency)
    }

    /// The default backoff built from this configuration.
    pub fn default_backoff(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential {
            initial_secs: self.backoff_base_secs,
            multiplier: 2.0,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Parse `queue=limit` pairs, skipping malformed entries.
fn parse_overrides(raw: &str) -> HashMap<String, usize> {
    raw.split(',')
        .filter_map(|pair| {
            let (queue, limit) = pair.split_once('=')?;
            let limit: usize = limit.trim().parse().ok()?;
            Some((queue.trim().to_string(), limit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = QueueConfig::default();
        assert_eq!(config.default_concurrency, 5);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base_secs, 5);
        assert_eq!(config.drain_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn overrides_parse_and_fall_back() {
        let overrides = parse_overrides("sync-transactions=3, send-email=10,broken,also=bad");
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["sync-transactions"], 3);
        assert_eq!(overrides["send-email"], 10);

        let config = QueueConfig {
            concurrency_overrides: overrides,
            ..Default::default()
        };
        assert_eq!(config.concurrency_for("sync-transactions"), 3);
        assert_eq!(config.concurrency_for("esg-update"), 5);
    }

    #[test]
    fn configured_backoff_uses_base() {
        let config = QueueConfig {
            backoff_base_secs: 2,
            ..Default::default()
        };
        assert_eq!(config.default_backoff().delay(1).as_secs(), 2);
        assert_eq!(config.default_backoff().delay(2).as_secs(), 4);
    }
}
