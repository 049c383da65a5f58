//! Ingester configuration.
//!
//! Settings come from environment variables, with builder-style overrides
//! for tests and embedding.

use std::time::Duration;

/// Default Kafka consumer group.
const DEFAULT_GROUP: &str = "darwin-ingest";

/// Default topic carrying the Push Port feed.
const DEFAULT_TOPIC: &str = "prod-1010-Darwin-Train-Information-Push-Port-IIII2_0-JSON";

/// Default number of worker tasks.
const DEFAULT_WORKERS: usize = 4;

/// Default broker connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error building configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A variable is set but unusable.
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// SASL credentials for the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to reach the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    pub group: String,
    pub topic: String,
    /// Without credentials the connection is plaintext.
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
}

impl FeedSettings {
    /// Settings for the given brokers with default group and topic.
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group: DEFAULT_GROUP.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the consumer group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Authenticate with SASL PLAIN.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Configuration for the whole ingester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub feed: FeedSettings,
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Base URL (or directory) timetable files are fetched from.
    pub files_url: Option<String>,
    /// Number of worker tasks.
    pub workers: usize,
    /// Queue capacity; `None` means four slots per worker.
    queue_capacity: Option<usize>,
}

impl IngestConfig {
    /// Create a config with defaults for everything but the endpoints.
    pub fn new(feed: FeedSettings, database_url: impl Into<String>) -> Self {
        Self {
            feed,
            database_url: database_url.into(),
            files_url: None,
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// | Variable | Meaning | Default |
    /// |---|---|---|
    /// | `DARWIN_BROKERS` | bootstrap servers | required |
    /// | `DARWIN_GROUP` | consumer group | `darwin-ingest` |
    /// | `DARWIN_TOPIC` | topic | the Push Port JSON topic |
    /// | `DARWIN_USERNAME`, `DARWIN_PASSWORD` | SASL credentials | none |
    /// | `DARWIN_WORKERS` | worker tasks | 4 |
    /// | `DARWIN_QUEUE_CAPACITY` | queue slots | 4 per worker |
    /// | `DARWIN_CONNECT_TIMEOUT_SECS` | broker timeout | 30 |
    /// | `DATABASE_URL` | PostgreSQL URL | required |
    /// | `DARWIN_FILES_URL` | timetable file location | none |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let mut feed = FeedSettings::new(require("DARWIN_BROKERS")?);
        if let Some(group) = get("DARWIN_GROUP") {
            feed = feed.with_group(group);
        }
        if let Some(topic) = get("DARWIN_TOPIC") {
            feed = feed.with_topic(topic);
        }
        match (get("DARWIN_USERNAME"), get("DARWIN_PASSWORD")) {
            (Some(username), Some(password)) => feed = feed.with_credentials(username, password),
            (None, None) => {}
            (Some(_), None) => return Err(ConfigError::Missing("DARWIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("DARWIN_USERNAME")),
        }
        if let Some(secs) = get("DARWIN_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = parse_positive("DARWIN_CONNECT_TIMEOUT_SECS", &secs)?;
            feed = feed.with_connect_timeout(Duration::from_secs(secs));
        }

        let mut config = IngestConfig::new(feed, require("DATABASE_URL")?);
        config.files_url = get("DARWIN_FILES_URL");
        if let Some(workers) = get("DARWIN_WORKERS") {
            config = config.with_workers(parse_positive("DARWIN_WORKERS", &workers)?);
        }
        if let Some(capacity) = get("DARWIN_QUEUE_CAPACITY") {
            config = config.with_queue_capacity(parse_positive("DARWIN_QUEUE_CAPACITY", &capacity)?);
        }
        Ok(config)
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = Some(n);
        self
    }

    /// Set where timetable files are fetched from.
    pub fn with_files_url(mut self, url: impl Into<String>) -> Self {
        self.files_url = Some(url.into());
        self
    }

    /// The effective queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or(self.workers.saturating_mul(4))
            .max(1)
    }
}

fn parse_positive<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    };
    let parsed: T = value.trim().parse().map_err(|e: T::Err| invalid(e.to_string()))?;
    if parsed <= T::default() {
        return Err(invalid("must be greater than zero".into()));
    }
    Ok(parsed)
}
