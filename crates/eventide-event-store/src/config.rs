//! Configuration for the aggregate store and the PostgreSQL backend.

use std::num::NonZeroU64;
use std::time::Duration;

use eventide_core::error::ConfigError;

/// Default number of events read per page when loading an aggregate.
pub const DEFAULT_PAGE_SIZE: NonZeroU64 = NonZeroU64::MIN.saturating_add(499);

/// Default number of rows fetched per poll by the PostgreSQL subscription.
pub const DEFAULT_SUBSCRIPTION_BATCH_SIZE: NonZeroU64 = NonZeroU64::MIN.saturating_add(255);

/// Settings for [`crate::aggregate_store::AggregateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStoreConfig {
    /// Events per page when replaying a stream.
    pub page_size: NonZeroU64,
}

impl Default for AggregateStoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AggregateStoreConfig {
    /// Creates a configuration reading `page_size` events per page.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `page_size` is zero.
    pub fn new(page_size: u64) -> Result<Self, ConfigError> {
        let page_size = NonZeroU64::new(page_size).ok_or(ConfigError::Invalid {
            key: "page_size",
            message: "must be greater than zero".into(),
        })?;
        Ok(Self { page_size })
    }

    /// Reads `EVENTIDE_LOAD_PAGE_SIZE` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the value is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AggregateStoreConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the value is not a positive integer.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let page_size = match lookup("EVENTIDE_LOAD_PAGE_SIZE") {
            Some(raw) => parse_positive("EVENTIDE_LOAD_PAGE_SIZE", &raw)?,
            None => DEFAULT_PAGE_SIZE,
        };
        Ok(Self { page_size })
    }
}

/// Settings for [`crate::pg_event_store::PgEventStore`]'s polling subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgEventStoreConfig {
    /// Delay between polls once a subscription has caught up.
    pub poll_interval: Duration,
    /// Rows fetched per poll.
    pub subscription_batch_size: NonZeroU64,
}

impl Default for PgEventStoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            subscription_batch_size: DEFAULT_SUBSCRIPTION_BATCH_SIZE,
        }
    }
}

impl PgEventStoreConfig {
    /// Reads `EVENTIDE_PG_POLL_INTERVAL_MS` and
    /// `EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PgEventStoreConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a value is not a positive integer.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let poll_interval = match lookup("EVENTIDE_PG_POLL_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(
                parse_positive("EVENTIDE_PG_POLL_INTERVAL_MS", &raw)?.get(),
            ),
            None => defaults.poll_interval,
        };
        let subscription_batch_size = match lookup("EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE") {
            Some(raw) => parse_positive("EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE", &raw)?,
            None => defaults.subscription_batch_size,
        };
        Ok(Self {
            poll_interval,
            subscription_batch_size,
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<NonZeroU64, ConfigError> {
    let value = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })?;
    NonZeroU64::new(value).ok_or(ConfigError::Invalid {
        key,
        message: "must be greater than zero".into(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let aggregate = AggregateStoreConfig::from_lookup(lookup(&[])).unwrap();
        let pg = PgEventStoreConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(aggregate.page_size.get(), 500);
        assert_eq!(pg, PgEventStoreConfig::default());
    }

    #[test]
    fn test_values_are_parsed() {
        let aggregate =
            AggregateStoreConfig::from_lookup(lookup(&[("EVENTIDE_LOAD_PAGE_SIZE", "25")])).unwrap();
        let pg = PgEventStoreConfig::from_lookup(lookup(&[
            ("EVENTIDE_PG_POLL_INTERVAL_MS", "40"),
            ("EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE", "8"),
        ]))
        .unwrap();

        assert_eq!(aggregate.page_size.get(), 25);
        assert_eq!(pg.poll_interval, Duration::from_millis(40));
        assert_eq!(pg.subscription_batch_size.get(), 8);
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let result = AggregateStoreConfig::from_lookup(lookup(&[("EVENTIDE_LOAD_PAGE_SIZE", "0")]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "EVENTIDE_LOAD_PAGE_SIZE",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = PgEventStoreConfig::from_lookup(lookup(&[(
            "EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE",
            "0",
        )]));

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "EVENTIDE_PG_SUBSCRIPTION_BATCH_SIZE",
                ..
            })
        ));
    }

    #[test]
    fn test_new_rejects_zero_page_size() {
        assert!(matches!(
            AggregateStoreConfig::new(0),
            Err(ConfigError::Invalid { key: "page_size", .. })
        ));
        assert_eq!(AggregateStoreConfig::new(7).unwrap().page_size.get(), 7);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result =
            PgEventStoreConfig::from_lookup(lookup(&[("EVENTIDE_PG_POLL_INTERVAL_MS", "soon")]));

        assert!(result.is_err());
    }
}
