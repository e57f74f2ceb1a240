// Configuration management module
// TOML-backed settings covering every tunable subsystem, validated on load
// and before save.


use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunking::ChunkingConfig;
use crate::executor::{BackoffPolicy, CircuitBreakerConfig, RateLimitConfig};
use crate::pipeline::PipelineConfig;
use crate::recovery::RecoveryStrategy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
    pub jobs: JobsConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pipeline: PipelineConfig::default(),
            jobs: JobsConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

/// Retry tuning shared by the step executor and the recovery manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff: BackoffPolicy,
    pub strategy: RecoveryStrategy,
}

impl Default for RetryConfig {
    #[inline]
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            strategy: RecoveryStrategy::default(),
        }
    }
}

/// Housekeeping settings for the job registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    /// Finished jobs older than this are eligible for cleanup.
    pub cleanup_age_hours: i64,
}

impl Default for JobsConfig {
    #[inline]
    fn default() -> Self {
        Self {
            cleanup_age_hours: 24,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid chunk size: {0} (must be between 100 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Invalid min chunk size: {0} (must be between 1 and 1024)")]
    InvalidMinChunkSize(usize),
    #[error("Invalid max chunk size: {0} (must be between 200 and 16384)")]
    InvalidMaxChunkSize(usize),
    #[error("Max chunk size ({0}) must be greater than chunk size ({1})")]
    MaxChunkSizeTooSmall(usize, usize),
    #[error("Chunk size ({0}) must be greater than min chunk size ({1})")]
    ChunkSizeTooSmall(usize, usize),
    #[error("Invalid backoff multiplier: {0} (must be at least 1.0)")]
    InvalidBackoffMultiplier(f64),
    #[error("Invalid initial delay: {0}ms (must be between 1 and 600000)")]
    InvalidInitialDelay(u64),
    #[error("Max delay ({0}ms) must be at least the initial delay ({1}ms)")]
    MaxDelayTooSmall(u64, u64),
    #[error("Invalid max retries: {0} (must be between 1 and 100)")]
    InvalidMaxRetries(u32),
    #[error("Invalid failure threshold: {0} (must be between 1 and 1000)")]
    InvalidFailureThreshold(u32),
    #[error("Invalid reset timeout: {0}ms (must be between 100 and 3600000)")]
    InvalidResetTimeout(u64),
    #[error("Invalid concurrency limit: {0} (must be between 1 and 1024)")]
    InvalidConcurrencyLimit(usize),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid cleanup age: {0} hours (must be between 1 and 8760)")]
    InvalidCleanupAge(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from the directory, falling back to defaults when
    /// the file does not exist.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_chunking()?;
        self.validate_retry()?;
        self.validate_circuit_breaker()?;
        self.validate_rate_limit()?;
        self.validate_pipeline()?;
        self.validate_jobs()?;
        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(100..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if !(1..=1024).contains(&config.min_chunk_size) {
            return Err(ConfigError::InvalidMinChunkSize(config.min_chunk_size));
        }

        if !(200..=16384).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if config.max_chunk_size <= config.chunk_size {
            return Err(ConfigError::MaxChunkSizeTooSmall(
                config.max_chunk_size,
                config.chunk_size,
            ));
        }

        if config.chunk_size <= config.min_chunk_size {
            return Err(ConfigError::ChunkSizeTooSmall(
                config.chunk_size,
                config.min_chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_retry(&self) -> Result<(), ConfigError> {
        let backoff = &self.retry.backoff;

        if backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier(backoff.multiplier));
        }

        if !(1..=600_000).contains(&backoff.initial_delay_ms) {
            return Err(ConfigError::InvalidInitialDelay(backoff.initial_delay_ms));
        }

        if backoff.max_delay_ms < backoff.initial_delay_ms {
            return Err(ConfigError::MaxDelayTooSmall(
                backoff.max_delay_ms,
                backoff.initial_delay_ms,
            ));
        }

        let strategy = &self.retry.strategy;
        if strategy.max_retries == 0 || strategy.max_retries > 100 {
            return Err(ConfigError::InvalidMaxRetries(strategy.max_retries));
        }

        Ok(())
    }

    fn validate_circuit_breaker(&self) -> Result<(), ConfigError> {
        let config = &self.circuit_breaker;

        if config.failure_threshold == 0 || config.failure_threshold > 1000 {
            return Err(ConfigError::InvalidFailureThreshold(
                config.failure_threshold,
            ));
        }

        if !(100..=3_600_000).contains(&config.reset_timeout_ms) {
            return Err(ConfigError::InvalidResetTimeout(config.reset_timeout_ms));
        }

        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        if !(1..=1024).contains(&self.rate_limit.max_concurrent) {
            return Err(ConfigError::InvalidConcurrencyLimit(
                self.rate_limit.max_concurrent,
            ));
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), ConfigError> {
        let config = &self.pipeline;

        if config.batch_size == 0 || config.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(config.batch_size));
        }

        if config.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(config.embedding_model.clone()));
        }

        Ok(())
    }

    fn validate_jobs(&self) -> Result<(), ConfigError> {
        if !(1..=8760).contains(&self.jobs.cleanup_age_hours) {
            return Err(ConfigError::InvalidCleanupAge(self.jobs.cleanup_age_hours));
        }

        Ok(())
    }
}
