use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use deferred_core::{DeferredError, DeferredResult, StagingKeys};

const DEFAULT_CONFIG_NAME: &str = "deferred.json";
const DEFAULT_STAGING_URL: &str = "redis://127.0.0.1:6379/";

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;
pub const DEFAULT_UPDATE_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_MAX_RUNNING_TIME_MS: u64 = 570_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    pub default_insert_batch_size: Option<usize>,
    pub default_update_batch_size: Option<usize>,
    pub max_running_time_ms: Option<u64>,
}

impl QueueConfig {
    pub fn with_defaults() -> Self {
        Self {
            default_insert_batch_size: Some(DEFAULT_INSERT_BATCH_SIZE),
            default_update_batch_size: Some(DEFAULT_UPDATE_BATCH_SIZE),
            max_running_time_ms: Some(DEFAULT_MAX_RUNNING_TIME_MS),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeferredConfig {
    pub namespace: Option<String>,
    pub staging: Option<StagingConfig>,
    pub database: Option<DatabaseConfig>,
    pub pool: Option<PoolConfig>,
    pub queues: Option<QueueConfig>,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            staging: Some(StagingConfig {
                url: Some(DEFAULT_STAGING_URL.to_string()),
            }),
            database: None,
            pool: None,
            queues: Some(QueueConfig::with_defaults()),
        }
    }
}

impl DeferredConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: Some(DatabaseConfig::Sqlite {
                path: Some(path.into()),
            }),
            ..Self::default()
        }
    }

    pub fn load_or_init(base_dir: &Path) -> DeferredResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| DeferredError::configuration(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| DeferredError::configuration(format!("read config: {err}")))?;
            let config: DeferredConfig = serde_json::from_str(&raw)
                .map_err(|err| DeferredError::configuration(err.to_string()))?;
            return Ok(config);
        }
        let default = DeferredConfig::default();
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| DeferredError::configuration(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| DeferredError::configuration(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> DeferredResult<PathBuf> {
        match &self.database {
            Some(DatabaseConfig::Sqlite { path }) => {
                let path = path.clone().unwrap_or_else(|| "deferred.sqlite".to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(DeferredError::configuration("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.database.as_ref().map(|database| match database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        })
    }

    pub fn staging_url(&self) -> Option<&str> {
        self.staging
            .as_ref()
            .and_then(|staging| staging.url.as_deref())
    }

    pub fn staging_keys(&self) -> StagingKeys {
        StagingKeys::new(self.namespace.clone().unwrap_or_default())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings::from_config(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub insert_batch_size: usize,
    pub update_batch_size: usize,
    pub max_running_time: Duration,
}

impl QueueSettings {
    pub fn from_config(config: &DeferredConfig) -> Self {
        let queues = config
            .queues
            .clone()
            .unwrap_or_else(QueueConfig::with_defaults);
        Self {
            insert_batch_size: queues
                .default_insert_batch_size
                .unwrap_or(DEFAULT_INSERT_BATCH_SIZE),
            update_batch_size: queues
                .default_update_batch_size
                .unwrap_or(DEFAULT_UPDATE_BATCH_SIZE),
            max_running_time: Duration::from_millis(
                queues
                    .max_running_time_ms
                    .unwrap_or(DEFAULT_MAX_RUNNING_TIME_MS),
            ),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&DeferredConfig::default())
    }
}
