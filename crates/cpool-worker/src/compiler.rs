//! The compiler seam.
//!
//! Parsing, type checking and code generation live behind [`Compiler`]; the
//! worker only moves state in and out of it. Every value type the compiler
//! works with is a [`WireValue`] so it can be shipped between processes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// A value that can cross the coordinator/worker process boundary.
pub trait WireValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> WireValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// An open transaction's compiler state: session aliases, config,
/// globals, savepoints and any DDL applied so far.
pub trait ConnectionState: WireValue + Clone {
    type Schema;
    /// Fingerprint of everything that must survive serialization.
    type Key: PartialEq + fmt::Debug;

    fn state_key(&self) -> Self::Key;

    /// Rebase the transaction on the user schema it started from.
    fn set_root_user_schema(&mut self, schema: Arc<Self::Schema>);
}

/// Metadata produced by the GraphQL front end.
pub trait TranspiledOperation {
    /// Query-language source equivalent to the GraphQL operation.
    fn source_text(&self) -> String;
}

/// Query protocol version spoken by compiled units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

pub const CURRENT_PROTOCOL: ProtocolVersion = ProtocolVersion { major: 3, minor: 0 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Binary,
    Json,
    JsonElements,
    None,
}

/// A compilation request built inside the worker rather than shipped by
/// the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationRequest {
    pub source: String,
    pub protocol_version: ProtocolVersion,
    pub schema_version: Uuid,
    pub output_format: DataFormat,
    pub input_format: DataFormat,
    pub expect_one: bool,
    /// `0` disables the implicit limit.
    pub implicit_limit: u64,
    pub inline_typeids: bool,
    pub inline_typenames: bool,
    pub inline_objectids: bool,
    pub modaliases: Option<BTreeMap<String, String>>,
    pub session_config: Option<BTreeMap<String, String>>,
}

impl CompilationRequest {
    /// Request compiling the query-language form of a GraphQL operation:
    /// JSON in and out, a single result, no implicit limit, no session
    /// context, under a fresh schema-version tag.
    pub fn graphql(source: String) -> Self {
        Self {
            source,
            protocol_version: CURRENT_PROTOCOL,
            schema_version: Uuid::new_v4(),
            output_format: DataFormat::Json,
            input_format: DataFormat::Json,
            expect_one: true,
            implicit_limit: 0,
            inline_typeids: false,
            inline_typenames: false,
            inline_objectids: false,
            modaliases: None,
            session_config: None,
        }
    }
}

/// Arguments for constructing a compiler at worker bootstrap.
pub struct CompilerInit<C: Compiler> {
    pub backend_params: C::BackendParams,
    pub std_schema: Arc<C::Schema>,
    pub reflection_schema: C::Schema,
    pub schema_class_layout: C::ClassLayout,
}

/// The synced state a request compiles against.
pub struct SyncedState<'a, C: Compiler> {
    pub user_schema: &'a C::Schema,
    pub reflection_cache: &'a C::ReflectionCache,
    pub database_config: &'a C::DatabaseConfig,
    pub global_schema: &'a C::Schema,
    pub instance_config: &'a C::InstanceConfig,
}

/// The query compiler driven by a worker.
///
/// All entry points are synchronous: a worker process runs one request at
/// a time. Failures are reported as [`anyhow::Error`] and returned to the
/// coordinator without affecting the worker's cached state.
pub trait Compiler: Sized + Send + 'static {
    type BackendParams: WireValue;
    type ClassLayout: WireValue;
    type Schema: WireValue;
    type ReflectionCache: WireValue;
    type DatabaseConfig: WireValue;
    type InstanceConfig: WireValue;
    type State: ConnectionState<Schema = Self::Schema>;

    type Request: WireValue;
    type Units: WireValue;
    type NotebookRequest: WireValue;
    type NotebookResult: WireValue;
    type SqlRequest: WireValue;
    type SqlResult: WireValue;
    type GraphqlRequest: WireValue;
    type GraphqlOperation: WireValue + TranspiledOperation;

    fn new(init: CompilerInit<Self>) -> anyhow::Result<Self>;

    /// Compile a request shipped by the coordinator. Returns the open
    /// transaction state, if the request left one.
    fn compile_serialized_request(
        &self,
        state: &SyncedState<'_, Self>,
        request: Self::Request,
    ) -> anyhow::Result<(Self::Units, Option<Self::State>)>;

    /// Compile a request built by the worker itself.
    fn compile(
        &self,
        state: &SyncedState<'_, Self>,
        request: CompilationRequest,
    ) -> anyhow::Result<(Self::Units, Option<Self::State>)>;

    /// Compile a request inside an open transaction.
    fn compile_serialized_request_in_tx(
        &self,
        tx: Self::State,
        request: Self::Request,
    ) -> anyhow::Result<(Self::Units, Self::State)>;

    fn compile_notebook(
        &self,
        state: &SyncedState<'_, Self>,
        request: Self::NotebookRequest,
    ) -> anyhow::Result<Self::NotebookResult>;

    fn compile_sql(
        &self,
        state: &SyncedState<'_, Self>,
        request: Self::SqlRequest,
    ) -> anyhow::Result<Self::SqlResult>;

    /// Translate a GraphQL operation into the query language.
    fn transpile_graphql(
        &self,
        std_schema: &Self::Schema,
        state: &SyncedState<'_, Self>,
        request: Self::GraphqlRequest,
    ) -> anyhow::Result<Self::GraphqlOperation>;

    /// Any other compiler capability, addressed by method name with encoded
    /// arguments and reply.
    fn call(&self, method: &str, _args: &[u8]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("compiler has no method `{method}`")
    }
}
