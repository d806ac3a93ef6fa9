//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::MigrationEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the sled database.
    pub data_path: PathBuf,

    /// How long a single migration body may execute before it is failed.
    pub execution_timeout: Duration,

    /// How many times a lost compare-and-swap is retried before
    /// `StateConflict` reaches the caller.
    pub max_state_retries: u32,

    /// Identity recorded as `executedBy` on attempts.
    pub actor: String,

    /// Record attempts without executing bodies.
    pub dry_run: bool,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./berqenas_data"),
            execution_timeout: Duration::from_secs(300),
            max_state_retries: 3,
            actor: "system".to_string(),
            dry_run: false,
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every_ms: Some(500),
            temporary: false,
        }
    }
}

impl EngineConfig {
    /// Create a config with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    /// Create a config for a temporary store.
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the compare-and-swap retry bound.
    pub fn with_max_state_retries(mut self, retries: u32) -> Self {
        self.max_state_retries = retries;
        self
    }

    /// Set the recorded actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms)
            .use_compression(true);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.data_path);
        }

        config
    }
}
