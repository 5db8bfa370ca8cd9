use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::env::{self, EnvKey};
use crate::modules::sweep::grid::{DEFAULT_MAX_GRID_SIZE, GridError, GridSpec, ParameterRange};
use crate::workers::transcoder::WorkerSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {source}")]
    InvalidGrid {
        key: &'static str,
        #[source]
        source: GridError,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub amqp_url: String,
    pub queue_name: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub presigned_url_ttl: Duration,
    pub worker_count: usize,
    pub max_attempts: u32,
    pub encode_timeout: Duration,
    pub score_timeout: Duration,
    pub visibility_timeout: Duration,
    pub default_grid: GridSpec,
    pub max_grid_size: usize,
    pub ffmpeg_bin: String,
    pub encoder_preset: String,
    pub admin_token: Option<String>,
}

fn required(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::get(key).map_err(|_| ConfigError::Missing(name))
}

fn secs(key: EnvKey, default: u64) -> Duration {
    Duration::from_secs(env::get_parsed(key, default))
}

fn range(key: EnvKey, default: &str) -> Result<ParameterRange, ConfigError> {
    let name = key.as_str();
    env::get_or(key, default)
        .parse()
        .map_err(|source| ConfigError::InvalidGrid { key: name, source })
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: required(EnvKey::DatabaseUrl)?,
            amqp_url: required(EnvKey::AmqpUrl)?,
            queue_name: env::get_or(EnvKey::QueueName, "encode_jobs"),
            minio_url: required(EnvKey::MinioUrl)?,
            minio_bucket: required(EnvKey::MinioBucket)?,
            minio_access_key: required(EnvKey::MinioAccessKey)?,
            minio_secret_key: required(EnvKey::MinioSecretKey)?,
            presigned_url_ttl: secs(EnvKey::PresignedUrlTtl, 3600),
            worker_count: env::get_parsed(EnvKey::WorkerCount, 1),
            max_attempts: env::get_parsed(EnvKey::MaxAttempts, 3u32).max(1),
            encode_timeout: secs(EnvKey::EncodeTimeout, 3600),
            score_timeout: secs(EnvKey::ScoreTimeout, 1800),
            visibility_timeout: secs(EnvKey::VisibilityTimeout, 7200),
            default_grid: GridSpec {
                quantization: range(EnvKey::DefaultQuantization, "25:49")?,
                rate_control: range(EnvKey::DefaultRateControl, "16:29")?,
            },
            max_grid_size: env::get_parsed(EnvKey::MaxGridSize, DEFAULT_MAX_GRID_SIZE).max(1),
            ffmpeg_bin: env::get_or(EnvKey::FfmpegBin, "ffmpeg"),
            encoder_preset: env::get_or(EnvKey::EncoderPreset, "veryslow"),
            admin_token: env::get(EnvKey::AdminToken).ok().filter(|t| !t.is_empty()),
        })
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            max_attempts: self.max_attempts,
            encode_timeout: self.encode_timeout,
            score_timeout: self.score_timeout,
        }
    }
}
