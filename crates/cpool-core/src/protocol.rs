//! Request protocol between the coordinator and a compiler worker.
//!
//! Every request is a [`RequestEnvelope`] naming a method and carrying its
//! MessagePack-encoded arguments; every reply is a [`ResponseEnvelope`] with
//! the same `request_id`. The argument and reply shapes for the built-in
//! methods are defined here so both sides agree on them. Compiler-specific
//! payloads (`R`, `U`, `O`) stay generic.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// Worker method names.
pub mod methods {
    pub const INIT_WORKER: &str = "init_worker";
    pub const COMPILE: &str = "compile";
    pub const COMPILE_IN_TX: &str = "compile_in_tx";
    pub const COMPILE_NOTEBOOK: &str = "compile_notebook";
    pub const COMPILE_GRAPHQL: &str = "compile_graphql";
    pub const COMPILE_SQL: &str = "compile_sql";
}

// ── Envelopes ──────────────────────────────────────────────────────

/// Request envelope sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlates the reply with this request.
    pub request_id: u64,
    /// Method name, see [`methods`].
    pub method: String,
    /// Encoded method arguments.
    pub args: ByteBuf,
}

/// Response envelope returned by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: u64,
    pub outcome: Outcome,
}

/// Result of one request: encoded reply on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(ByteBuf),
    Err(ErrorInfo),
}

/// Error information in a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind, e.g. `FailedStateSync` or `ContractViolation`.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    /// The worker stopped serving after this error.
    pub fatal: bool,
}

// ── State sync arguments ───────────────────────────────────────────

/// The state-sync prefix shared by every non-transactional compile call.
///
/// `None` means "unchanged since the last call to this worker"; for a
/// database the worker has never seen, the three per-database fields are
/// required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncArgs {
    pub dbname: String,
    pub evicted_dbs: Vec<String>,
    pub user_schema: Option<ByteBuf>,
    pub reflection_cache: Option<ByteBuf>,
    pub global_schema: Option<ByteBuf>,
    pub database_config: Option<ByteBuf>,
    pub system_config: Option<ByteBuf>,
}

impl SyncArgs {
    /// Sync arguments that ship nothing but the database name.
    pub fn cached(dbname: impl Into<String>) -> Self {
        Self {
            dbname: dbname.into(),
            ..Self::default()
        }
    }
}

/// Arguments of `compile`, `compile_notebook`, `compile_graphql` and
/// `compile_sql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileArgs<R> {
    pub sync: SyncArgs,
    pub request: R,
}

// ── Transaction state ──────────────────────────────────────────────

/// Transaction state argument of `compile_in_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStateArg {
    /// Continue the transaction state the worker cached on its last call.
    ReuseLast,
    /// A state previously returned by some worker.
    Serialized(ByteBuf),
}

/// Arguments of `compile_in_tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileInTxArgs<R> {
    /// Database whose cached user schema becomes the state's root schema.
    pub dbname: Option<String>,
    /// Explicit root schema, used when the transaction's database is not
    /// cached under a name (ephemeral schema).
    pub user_schema: Option<ByteBuf>,
    pub state: TxStateArg,
    pub request: R,
}

/// Transaction state returned by `compile_in_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStateReply {
    /// Same bytes as the previous reply from this worker; nothing was
    /// re-serialized.
    Unchanged,
    Fresh(ByteBuf),
}

impl TxStateReply {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, TxStateReply::Unchanged)
    }

    pub fn fresh_bytes(&self) -> Option<&[u8]> {
        match self {
            TxStateReply::Fresh(bytes) => Some(bytes.as_ref()),
            TxStateReply::Unchanged => None,
        }
    }
}

// ── Replies ────────────────────────────────────────────────────────

/// Reply of `compile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileReply<U> {
    pub units: U,
    /// Serialized open-transaction state, if the request left one.
    pub state: Option<ByteBuf>,
}

/// Reply of `compile_in_tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxCompileReply<U> {
    pub units: U,
    pub state: TxStateReply,
}

/// Reply of `compile_graphql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlReply<U, O> {
    pub units: U,
    /// Transpilation metadata for the GraphQL operation.
    pub operation: O,
}
