//! Client configuration.

use std::{collections::HashMap, time::Duration};

use config::{Config, ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use mcp_resilience_executor::{
    RetryExecutor, RetryPolicy, TimeoutPolicy,
    policy::{
        APPEND_OPERATION, APPEND_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
        DEFAULT_TIMEOUT,
    },
};
use mcp_resilience_session::FallbackConfig;
use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`ClientSettings::load`].
pub const ENV_PREFIX: &str = "MCP_RESILIENCE";

/// Category whose notes make up the insights memo.
pub const INSIGHT_CATEGORY: &str = "insight";

const DEFAULT_CACHE_MAX_SIZE: usize = 100;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_NOTE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(100);
const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote home of one note category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    /// Operation that appends a note of the category.
    pub append_operation: String,
    /// Resource URI listing the notes of the category.
    pub resource: String,
}

/// How notes map onto the remote memo.
///
/// Only categories with a target are mirrored; notes of any other category
/// stay local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Argument carrying the note text.
    pub text_argument: String,
    /// Category served by the insights memo.
    pub insight_category: String,
    /// Mirror targets by category.
    pub targets: HashMap<String, MirrorTarget>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            text_argument: "insight".to_string(),
            insight_category: INSIGHT_CATEGORY.to_string(),
            targets: HashMap::from([(
                INSIGHT_CATEGORY.to_string(),
                MirrorTarget {
                    append_operation: APPEND_OPERATION.to_string(),
                    resource: "memo://insights".to_string(),
                },
            )]),
        }
    }
}

impl MirrorConfig {
    /// Mirror `category` through `append_operation`, reading it back from
    /// `resource`.
    #[must_use]
    pub fn with_target(
        mut self,
        category: impl Into<String>,
        append_operation: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        self.targets.insert(
            category.into(),
            MirrorTarget {
                append_operation: append_operation.into(),
                resource: resource.into(),
            },
        );
        self
    }

    /// Whether notes of `category` have a remote copy.
    #[must_use]
    pub fn mirrors(&self, category: &str) -> bool {
        self.targets.contains_key(category)
    }

    /// Operation appending notes of `category`.
    #[must_use]
    pub fn append_operation_for(&self, category: &str) -> Option<&str> {
        self.targets
            .get(category)
            .map(|target| target.append_operation.as_str())
    }

    /// Resource URI holding the notes of `category`.
    #[must_use]
    pub fn resource_for(&self, category: &str) -> Option<&str> {
        self.targets.get(category).map(|target| target.resource.as_str())
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_timeout: Duration,
    pub operation_timeouts: HashMap<String, Duration>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub note_write_timeout: Duration,
    pub note_read_timeout: Duration,
    pub cancel_grace: Duration,
    /// Limit for each teardown step.
    pub release_timeout: Duration,
    pub mirror: MirrorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            operation_timeouts: HashMap::from([(APPEND_OPERATION.to_string(), APPEND_TIMEOUT)]),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            cache_ttl: DEFAULT_CACHE_TTL,
            note_write_timeout: DEFAULT_NOTE_TIMEOUT,
            note_read_timeout: DEFAULT_NOTE_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            mirror: MirrorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from config files and the environment. See [`ClientSettings::load`].
    ///
    /// # Errors
    /// Returns an error if a source exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        ClientSettings::load().map(Self::from)
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.operation_timeouts.insert(name.into(), timeout);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.cache_max_size = max_size;
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_note_timeouts(mut self, write: Duration, read: Duration) -> Self {
        self.note_write_timeout = write;
        self.note_read_timeout = read;
        self
    }

    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    #[must_use]
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorConfig) -> Self {
        self.mirror = mirror;
        self
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    #[must_use]
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.operation_timeouts
            .iter()
            .fold(TimeoutPolicy::new(self.default_timeout), |policy, (name, timeout)| {
                policy.with_operation(name.clone(), *timeout)
            })
    }

    /// Executor for caller-issued operations.
    #[must_use]
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.retry_policy(), self.timeout_policy()).with_grace(self.cancel_grace)
    }

    /// Single-attempt executor for note mirroring and memo reads.
    #[must_use]
    pub fn mirror_executor(&self) -> RetryExecutor {
        let timeouts = self
            .mirror
            .targets
            .values()
            .fold(TimeoutPolicy::new(self.note_read_timeout), |policy, target| {
                policy.with_operation(target.append_operation.clone(), self.note_write_timeout)
            });
        RetryExecutor::new(RetryPolicy::no_retries(), timeouts).with_grace(self.cancel_grace)
    }

    #[must_use]
    pub const fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            write_timeout: self.note_write_timeout,
            read_timeout: self.note_read_timeout,
        }
    }
}

/// File and environment form of [`ClientConfig`].
///
/// Durations are whole seconds. Each `*_secs` setting has a `*_ms`
/// counterpart that wins when set, e.g. `retry_delay_ms = 500`. Entries of
/// `per_operation_timeout_secs` and `per_operation_timeout_ms` are added to
/// the built-in per-operation deadlines, milliseconds winning for a name
/// present in both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub default_timeout_secs: u64,
    pub default_timeout_ms: Option<u64>,
    pub per_operation_timeout_secs: HashMap<String, u64>,
    pub per_operation_timeout_ms: HashMap<String, u64>,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retry_delay_ms: Option<u64>,
    pub cache_max_size: usize,
    pub cache_ttl_secs: u64,
    pub cache_ttl_ms: Option<u64>,
    pub note_write_timeout_secs: u64,
    pub note_write_timeout_ms: Option<u64>,
    pub note_read_timeout_secs: u64,
    pub note_read_timeout_ms: Option<u64>,
    pub cancel_grace_ms: u64,
    pub release_timeout_secs: u64,
    pub release_timeout_ms: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            default_timeout_ms: None,
            per_operation_timeout_secs: HashMap::new(),
            per_operation_timeout_ms: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            retry_delay_ms: None,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            cache_ttl_ms: None,
            note_write_timeout_secs: DEFAULT_NOTE_TIMEOUT.as_secs(),
            note_write_timeout_ms: None,
            note_read_timeout_secs: DEFAULT_NOTE_TIMEOUT.as_secs(),
            note_read_timeout_ms: None,
            cancel_grace_ms: 100,
            release_timeout_secs: DEFAULT_RELEASE_TIMEOUT.as_secs(),
            release_timeout_ms: None,
        }
    }
}

fn duration(secs: u64, ms: Option<u64>) -> Duration {
    ms.map_or_else(|| Duration::from_secs(secs), Duration::from_millis)
}

impl ClientSettings {
    /// Load from `config/default`, `config/local` (both optional) and
    /// `MCP_RESILIENCE_*` environment variables, later sources winning.
    ///
    /// Nested keys use `__`, e.g.
    /// `MCP_RESILIENCE_PER_OPERATION_TIMEOUT_SECS__READ_QUERY=60`.
    ///
    /// # Errors
    /// Returns an error if a source exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    /// Build and deserialize custom sources.
    ///
    /// # Errors
    /// Returns an error if a source cannot be read or has the wrong shape.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}

impl From<ClientSettings> for ClientConfig {
    fn from(settings: ClientSettings) -> Self {
        let mut config = Self {
            default_timeout: duration(settings.default_timeout_secs, settings.default_timeout_ms),
            max_retries: settings.max_retries,
            retry_delay: duration(settings.retry_delay_secs, settings.retry_delay_ms),
            cache_max_size: settings.cache_max_size,
            cache_ttl: duration(settings.cache_ttl_secs, settings.cache_ttl_ms),
            note_write_timeout: duration(
                settings.note_write_timeout_secs,
                settings.note_write_timeout_ms,
            ),
            note_read_timeout: duration(
                settings.note_read_timeout_secs,
                settings.note_read_timeout_ms,
            ),
            cancel_grace: Duration::from_millis(settings.cancel_grace_ms),
            release_timeout: duration(settings.release_timeout_secs, settings.release_timeout_ms),
            ..Self::default()
        };
        config.operation_timeouts.extend(
            settings
                .per_operation_timeout_secs
                .into_iter()
                .map(|(name, secs)| (name, Duration::from_secs(secs))),
        );
        config.operation_timeouts.extend(
            settings
                .per_operation_timeout_ms
                .into_iter()
                .map(|(name, ms)| (name, Duration::from_millis(ms))),
        );
        config
    }
}
