//! Relay configuration.

use crate::error::{OutboxError, OutboxResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Schemas (one per module) to relay
    pub schemas: Vec<String>,

    /// Records claimed per pass
    pub batch_size: usize,

    /// Delay between the end of one pass and the start of the next
    #[serde(with = "duration_millis")]
    pub delay: Duration,

    /// Reset records stuck in `PROCESSING` for longer than this
    #[serde(default, with = "option_duration_secs")]
    pub stale_after: Option<Duration>,

    /// Create missing outbox tables at startup
    pub migrate: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            schemas: Vec::new(),
            batch_size: 1,
            delay: Duration::from_millis(5000),
            stale_after: None,
            migrate: false,
        }
    }
}

impl RelayConfig {
    /// Relay `schemas` with default settings.
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            schemas: schemas.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Load from the environment.
    ///
    /// - `WAYBILL_OUTBOX_SCHEMAS`: comma-separated, required
    /// - `WAYBILL_OUTBOX_BATCH_SIZE`: default 1
    /// - `WAYBILL_OUTBOX_DELAY_MS`: default 5000
    /// - `WAYBILL_OUTBOX_STALE_AFTER_SECS`: unset disables the sweep
    /// - `WAYBILL_OUTBOX_MIGRATE`: default false
    pub fn from_env() -> OutboxResult<Self> {
        let schemas: Vec<String> = env::var("WAYBILL_OUTBOX_SCHEMAS")
            .map_err(|_| OutboxError::Config("WAYBILL_OUTBOX_SCHEMAS not set".into()))?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let defaults = Self::default();
        let config = Self {
            schemas,
            batch_size: parse_var("WAYBILL_OUTBOX_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            delay: parse_var("WAYBILL_OUTBOX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
            stale_after: parse_var("WAYBILL_OUTBOX_STALE_AFTER_SECS")?.map(Duration::from_secs),
            migrate: parse_var("WAYBILL_OUTBOX_MIGRATE")?.unwrap_or(defaults.migrate),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_stale_after(mut self, after: Duration) -> Self {
        self.stale_after = Some(after);
        self
    }

    pub fn with_migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.schemas.is_empty() {
            return Err(OutboxError::Config("no outbox schemas configured".into()));
        }
        if let Some(schema) = self.schemas.iter().find(|s| !schema_is_valid(s)) {
            return Err(OutboxError::Config(format!("invalid schema name '{}'", schema)));
        }
        Ok(())
    }
}

#[cfg(feature = "postgres")]
fn schema_is_valid(name: &str) -> bool {
    waybill_diesel::schema::is_valid_schema(name)
}

#[cfg(not(feature = "postgres"))]
fn schema_is_valid(name: &str) -> bool {
    !name.is_empty()
}

fn parse_var<T: FromStr>(key: &str) -> OutboxResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| OutboxError::Config(format!("{} has an invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
