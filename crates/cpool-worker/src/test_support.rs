//! A small in-process compiler for exercising the worker.
//!
//! Requests are plain strings:
//! - `start transaction` leaves an open transaction state
//! - `set alias <name> <module>` and `declare savepoint` change the
//!   transaction's state key; any other query only bumps a counter
//! - `fail` makes the compiler return an error

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use cpool_core::SyncArgs;
use cpool_core::codec;

use crate::compiler::*;
use crate::context::InitPayload;

pub type Config = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FakeTxState {
    pub root_schema: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub savepoints: u32,
    /// Not part of the state key.
    pub queries: u32,
}

impl ConnectionState for FakeTxState {
    type Schema = Vec<String>;
    type Key = (Vec<String>, BTreeMap<String, String>, u32);

    fn state_key(&self) -> Self::Key {
        (self.root_schema.clone(), self.aliases.clone(), self.savepoints)
    }

    fn set_root_user_schema(&mut self, schema: Arc<Vec<String>>) {
        self.root_schema = schema.as_ref().clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FakeUnits {
    pub query: String,
    pub user_schema: Vec<String>,
    pub reflection_cache: Vec<String>,
    pub global_schema: Vec<String>,
    pub database_config: Config,
    pub instance_config: Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeGraphqlOp {
    pub source: String,
    pub std_types: usize,
}

impl TranspiledOperation for FakeGraphqlOp {
    fn source_text(&self) -> String {
        self.source.clone()
    }
}

pub struct FakeCompiler {
    pub backend_params: u32,
    pub std_schema: Arc<Vec<String>>,
    pub last_request: Mutex<Option<CompilationRequest>>,
}

fn units_for(state: &SyncedState<'_, FakeCompiler>, query: &str) -> FakeUnits {
    FakeUnits {
        query: query.to_string(),
        user_schema: state.user_schema.clone(),
        reflection_cache: state.reflection_cache.clone(),
        global_schema: state.global_schema.clone(),
        database_config: state.database_config.clone(),
        instance_config: state.instance_config.clone(),
    }
}

impl Compiler for FakeCompiler {
    type BackendParams = u32;
    type ClassLayout = Vec<String>;
    type Schema = Vec<String>;
    type ReflectionCache = Vec<String>;
    type DatabaseConfig = Config;
    type InstanceConfig = Config;
    type State = FakeTxState;

    type Request = String;
    type Units = FakeUnits;
    type NotebookRequest = Vec<String>;
    type NotebookResult = Vec<FakeUnits>;
    type SqlRequest = String;
    type SqlResult = String;
    type GraphqlRequest = String;
    type GraphqlOperation = FakeGraphqlOp;

    fn new(init: CompilerInit<Self>) -> anyhow::Result<Self> {
        Ok(Self {
            backend_params: init.backend_params,
            std_schema: init.std_schema,
            last_request: Mutex::new(None),
        })
    }

    fn compile_serialized_request(
        &self,
        state: &SyncedState<'_, Self>,
        request: String,
    ) -> anyhow::Result<(FakeUnits, Option<FakeTxState>)> {
        if request == "fail" {
            anyhow::bail!("cannot compile `{request}`");
        }
        let tx = request.starts_with("start transaction").then(|| FakeTxState {
            root_schema: state.user_schema.clone(),
            ..FakeTxState::default()
        });
        Ok((units_for(state, &request), tx))
    }

    fn compile(
        &self,
        state: &SyncedState<'_, Self>,
        request: CompilationRequest,
    ) -> anyhow::Result<(FakeUnits, Option<FakeTxState>)> {
        let units = units_for(state, &request.source);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request);
        }
        Ok((units, None))
    }

    fn compile_serialized_request_in_tx(
        &self,
        mut tx: FakeTxState,
        request: String,
    ) -> anyhow::Result<(FakeUnits, FakeTxState)> {
        if request == "fail" {
            anyhow::bail!("cannot compile `{request}`");
        }
        tx.queries += 1;
        if let Some(rest) = request.strip_prefix("set alias ") {
            let (name, module) = rest.split_once(' ').unwrap_or((rest, "default"));
            tx.aliases.insert(name.to_string(), module.to_string());
        } else if request == "declare savepoint" {
            tx.savepoints += 1;
        }
        let units = FakeUnits {
            query: request,
            user_schema: tx.root_schema.clone(),
            ..FakeUnits::default()
        };
        Ok((units, tx))
    }

    fn compile_notebook(
        &self,
        state: &SyncedState<'_, Self>,
        request: Vec<String>,
    ) -> anyhow::Result<Vec<FakeUnits>> {
        Ok(request.iter().map(|q| units_for(state, q)).collect())
    }

    fn compile_sql(&self, state: &SyncedState<'_, Self>, request: String) -> anyhow::Result<String> {
        Ok(format!("{request} /* {} */", state.user_schema.join(",")))
    }

    fn transpile_graphql(
        &self,
        std_schema: &Vec<String>,
        _state: &SyncedState<'_, Self>,
        request: String,
    ) -> anyhow::Result<FakeGraphqlOp> {
        if request.is_empty() {
            anyhow::bail!("empty GraphQL document");
        }
        Ok(FakeGraphqlOp {
            source: format!("select {request}"),
            std_types: std_schema.len(),
        })
    }

    fn call(&self, method: &str, args: &[u8]) -> anyhow::Result<Vec<u8>> {
        match method {
            "echo" => Ok(args.to_vec()),
            "std_type_count" => Ok(codec::encode(&self.std_schema.len())?),
            _ => anyhow::bail!("compiler has no method `{method}`"),
        }
    }
}

pub fn blob<T: Serialize>(value: &T) -> ByteBuf {
    codec::encode_blob(value).unwrap()
}

pub fn config(pairs: &[(&str, &str)]) -> Config {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn init_payload() -> Vec<u8> {
    codec::encode(&InitPayload::<FakeCompiler> {
        backend_params: 100,
        std_schema: vec!["std::str".to_string(), "std::int64".to_string()],
        reflection_schema: vec!["schema::Type".to_string()],
        schema_class_layout: Vec::new(),
        global_schema: blob(&vec!["sys::Role".to_string()]),
        system_config: config(&[("max_connections", "100")]),
    })
    .unwrap()
}

/// Sync arguments shipping every per-database field of `dbname` at
/// `version`.
pub fn full_sync(dbname: &str, version: &str) -> SyncArgs {
    SyncArgs {
        dbname: dbname.to_string(),
        user_schema: Some(blob(&vec![format!("{dbname}::schema@{version}")])),
        reflection_cache: Some(blob(&vec![format!("{dbname}::refl@{version}")])),
        database_config: Some(blob(&config(&[("version", version)]))),
        ..SyncArgs::default()
    }
}
