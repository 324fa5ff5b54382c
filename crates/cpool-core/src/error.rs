//! Error types for the codec and configuration layers.

use thiserror::Error;

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while encoding or decoding a wire value.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors raised while loading a `cpool.toml` file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
