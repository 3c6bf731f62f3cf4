use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub scheduler: SchedulerConfig,
    pub delay_queue: DelayQueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace prefix applied to every lock and queue key
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often each replica evaluates cron due-ness
    pub tick_interval_seconds: u64,
    /// Lock re-extension cadence while a job runs
    pub lock_extend_interval_seconds: u64,
    /// Execution history retention for the cleanup job
    pub execution_retention_days: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayQueueConfig {
    pub enabled: bool,
    /// Sweep interval for the due-time poll loop
    pub poll_interval_seconds: u64,
    /// Entries fetched per sweep
    pub batch_size: usize,
    pub default_max_retries: i32,
    /// Base unit of the quadratic retry back-off
    pub retry_base_seconds: i64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/openpenpal".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: "penpal:".to_string(),
            },
            scheduler: SchedulerConfig {
                enabled: true,
                tick_interval_seconds: 10,
                lock_extend_interval_seconds: 10,
                execution_retention_days: 30,
            },
            delay_queue: DelayQueueConfig {
                enabled: true,
                poll_interval_seconds: 30,
                batch_size: 100,
                default_max_retries: 3,
                retry_base_seconds: 300,
                breaker_failure_threshold: 5,
                breaker_open_timeout_seconds: 600,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration with the usual layering:
    ///
    /// 1. Built-in defaults
    /// 2. TOML config file (explicit path, or the first default path found)
    /// 3. Environment variable overrides (prefix `PENPAL_`, `__` separator)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).context("serialize default config")?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("config file not found: {path}"));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            for path in ["config/coordinator.toml", "coordinator.toml"] {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        let config: AppConfig = builder
            .add_source(Environment::with_prefix("PENPAL").separator("__"))
            .build()
            .context("build configuration")?
            .try_deserialize()
            .context("deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.redis.validate()?;
        self.scheduler.validate()?;
        self.delay_queue.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("database url must not be empty"));
        }
        if !self.url.starts_with("postgresql://") && !self.url.starts_with("postgres://") {
            return Err(anyhow::anyhow!("database url must be a PostgreSQL url"));
        }
        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("database max_connections must be positive"));
        }
        if self.min_connections > self.max_connections {
            return Err(anyhow::anyhow!(
                "database min_connections must not exceed max_connections"
            ));
        }
        Ok(())
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("redis url must start with redis://"));
        }
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "scheduler tick_interval_seconds must be positive"
            ));
        }
        if self.lock_extend_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "scheduler lock_extend_interval_seconds must be positive"
            ));
        }
        Ok(())
    }
}

impl DelayQueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!(
                "delay_queue poll_interval_seconds must be positive"
            ));
        }
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("delay_queue batch_size must be positive"));
        }
        if self.retry_base_seconds <= 0 {
            return Err(anyhow::anyhow!(
                "delay_queue retry_base_seconds must be positive"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.delay_queue.retry_base_seconds, 300);
        assert_eq!(config.delay_queue.breaker_failure_threshold, 5);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[scheduler]
tick_interval_seconds = 1

[delay_queue]
default_max_retries = 5
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.scheduler.tick_interval_seconds, 1);
        assert_eq!(config.delay_queue.default_max_retries, 5);
        // untouched sections keep their defaults
        assert_eq!(config.delay_queue.poll_interval_seconds, 30);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AppConfig::load(Some("/nonexistent/coordinator.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.database.min_connections = 50;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.redis.url = "http://wrong".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.delay_queue.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
