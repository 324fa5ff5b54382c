//! cpool-core — shared building blocks for the compiler worker pool.
//!
//! - [`codec`]: MessagePack encoding of every value that crosses the
//!   coordinator/worker process boundary.
//! - [`protocol`]: method names, request/response envelopes, and the
//!   per-method argument and reply shapes.
//! - [`config`]: `cpool.toml` parsing.

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;

pub use config::PoolConfig;
pub use error::{CodecError, CodecResult, ConfigError, ConfigResult};
pub use protocol::*;
