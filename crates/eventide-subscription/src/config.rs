//! Subscription worker configuration.

use std::time::Duration;

use eventide_core::error::ConfigError;
use eventide_core::subscription::SubscriptionFilter;

/// Default delay before re-subscribing after a drop.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Shortest delay the worker waits before re-subscribing.
pub const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Settings for one [`crate::worker::SubscriptionWorker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Checkpoint key; one active worker per id.
    pub subscription_id: String,
    /// Only streams starting with one of these prefixes; empty means all.
    pub stream_prefixes: Vec<String>,
    /// Fixed delay before re-subscribing after a drop. The worker waits at
    /// least [`MIN_BACKOFF`].
    pub backoff: Duration,
    /// Skip records whose event type starts with `$`.
    pub exclude_system_events: bool,
}

impl SubscriptionConfig {
    /// Creates a configuration with default settings for `subscription_id`.
    #[must_use]
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            stream_prefixes: Vec::new(),
            backoff: DEFAULT_BACKOFF,
            exclude_system_events: true,
        }
    }

    /// Restricts the subscription to streams with these prefixes.
    #[must_use]
    pub fn with_stream_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.stream_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the re-subscribe delay, raised to at least [`MIN_BACKOFF`].
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff.max(MIN_BACKOFF);
        self
    }

    /// Includes `$`-prefixed system events.
    #[must_use]
    pub fn including_system_events(mut self) -> Self {
        self.exclude_system_events = false;
        self
    }

    /// Reads `EVENTIDE_SUBSCRIPTION_ID`, `EVENTIDE_SUBSCRIPTION_STREAM_PREFIXES`
    /// and `EVENTIDE_SUBSCRIPTION_BACKOFF_MS` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` without a subscription id and
    /// `ConfigError::Invalid` for an unparsable backoff.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`SubscriptionConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` without a subscription id and
    /// `ConfigError::Invalid` for an unparsable or zero backoff.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let subscription_id = lookup("EVENTIDE_SUBSCRIPTION_ID")
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing("EVENTIDE_SUBSCRIPTION_ID"))?;

        let mut config = Self::new(subscription_id);
        if let Some(raw) = lookup("EVENTIDE_SUBSCRIPTION_STREAM_PREFIXES") {
            config.stream_prefixes = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(raw) = lookup("EVENTIDE_SUBSCRIPTION_BACKOFF_MS") {
            let millis = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::Invalid {
                    key: "EVENTIDE_SUBSCRIPTION_BACKOFF_MS",
                    message: e.to_string(),
                })?;
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    key: "EVENTIDE_SUBSCRIPTION_BACKOFF_MS",
                    message: "must be greater than zero".into(),
                });
            }
            config.backoff = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// The log filter this configuration subscribes with.
    #[must_use]
    pub fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            stream_prefixes: self.stream_prefixes.clone(),
            exclude_system_events: self.exclude_system_events,
        }
    }
}
