//! cpool-worker — the compiler worker process.
//!
//! A worker holds a replica of the per-database state the coordinator
//! last shipped to it and compiles requests against that replica. The
//! coordinator ships only what changed; the worker caches the rest.
//!
//! - [`compiler`]: the [`Compiler`] seam implemented by the host binary
//! - [`context`]: state sync and the compile entry points
//! - [`dispatch`]: method-name resolution and the worker lifecycle
//! - [`process`]: the framed request loop over a pair of byte streams

pub mod compiler;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod state;
pub mod tx_cache;

#[cfg(test)]
mod test_support;

pub use compiler::{CompilationRequest, Compiler, ConnectionState, SyncedState};
pub use context::WorkerContext;
pub use dispatch::{Handler, Worker};
pub use error::{ContractViolation, WorkerError, WorkerResult};
