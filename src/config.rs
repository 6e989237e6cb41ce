//! Configuration types for kaizoku-core

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Dispatcher concurrency and scheduling limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Global maximum concurrently running downloads (default: 5)
    #[serde(default = "default_max_total")]
    pub max_total_concurrency: usize,

    /// Maximum concurrently running downloads per provider group (default: 2)
    #[serde(default = "default_max_group")]
    pub max_group_concurrency: usize,

    /// How often the dispatcher polls the waiting queue (default: 500ms)
    #[serde(default = "default_tick_interval", with = "duration_millis_serde")]
    pub tick_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_total_concurrency: default_max_total(),
            max_group_concurrency: default_max_group(),
            tick_interval: default_tick_interval(),
        }
    }
}

/// Cascade and full-retry behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before a fully-exhausted cascade is retried from its first candidate again
    /// (default: 30 minutes)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Maximum number of full-cascade-retry cycles before giving up permanently (default: 3)
    #[serde(default = "default_max_cascade_retries")]
    pub max_cascade_retries: u32,

    /// Add random jitter to the full-retry delay (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay: default_retry_delay(),
            max_cascade_retries: default_max_cascade_retries(),
            jitter: true,
        }
    }
}

/// Extension-host call behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Maximum concurrent in-flight extension calls (default: 10)
    #[serde(default = "default_extension_concurrency")]
    pub max_concurrent_calls: usize,

    /// Timeout for a single extension call (default: 30 seconds)
    #[serde(default = "default_extension_timeout", with = "duration_serde")]
    pub call_timeout: Duration,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: default_extension_concurrency(),
            call_timeout: default_extension_timeout(),
        }
    }
}

/// Storage layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory all series' `storage_path` values are relative to
    /// (default: "./library")
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Directory for in-progress downloads before atomic move into the library
    /// (default: "./library/.tmp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// Data storage and state management configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./kaizoku.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`crate::dispatcher::DownloadDispatcher`]
///
/// Fields are organized into logical sub-configs for maintainability. All
/// sub-config fields are flattened so the serialized JSON form stays flat.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dispatcher concurrency and polling settings
    #[serde(flatten)]
    pub dispatch: DispatchConfig,

    /// Cascade/full-retry settings
    #[serde(flatten)]
    pub retry: RetryConfig,

    /// Extension-host call settings
    #[serde(flatten)]
    pub extension: ExtensionConfig,

    /// Library storage layout
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// Database location
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Root of the on-disk library, convenience accessor
    pub fn storage_root(&self) -> &PathBuf {
        &self.storage.root
    }

    /// Database path, convenience accessor
    pub fn database_path(&self) -> &PathBuf {
        &self.persistence.database_path
    }
}

fn default_max_total() -> usize {
    5
}

fn default_max_group() -> usize {
    2
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_cascade_retries() -> u32 {
    3
}

fn default_extension_concurrency() -> usize {
    10
}

fn default_extension_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("library")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("library/.tmp")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("kaizoku.db")
}

fn default_true() -> bool {
    true
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
