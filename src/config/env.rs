use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    AmqpUrl,
    QueueName,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    PresignedUrlTtl,
    WorkerCount,
    MaxAttempts,
    EncodeTimeout,
    ScoreTimeout,
    VisibilityTimeout,
    DefaultQuantization,
    DefaultRateControl,
    MaxGridSize,
    FfmpegBin,
    EncoderPreset,
    AdminToken,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::PresignedUrlTtl => "PRESIGNED_URL_TTL_SECS",
            EnvKey::WorkerCount => "WORKER_COUNT",
            EnvKey::MaxAttempts => "MAX_ATTEMPTS",
            EnvKey::EncodeTimeout => "ENCODE_TIMEOUT_SECS",
            EnvKey::ScoreTimeout => "SCORE_TIMEOUT_SECS",
            EnvKey::VisibilityTimeout => "VISIBILITY_TIMEOUT_SECS",
            EnvKey::DefaultQuantization => "DEFAULT_QUANTIZATION",
            EnvKey::DefaultRateControl => "DEFAULT_RATE_CONTROL",
            EnvKey::MaxGridSize => "MAX_GRID_SIZE",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::EncoderPreset => "ENCODER_PRESET",
            EnvKey::AdminToken => "ADMIN_TOKEN",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
