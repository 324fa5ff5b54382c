//! Per-process worker state and the compile entry points.
//!
//! A [`WorkerContext`] exists only after a successful `init_worker`. Every
//! compile call first reconciles the database cache with what the
//! coordinator shipped (see [`WorkerContext::sync`]), then hands the
//! resulting view to the compiler.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::{debug, info};

use cpool_core::codec;
use cpool_core::{
    CompileArgs, CompileInTxArgs, CompileReply, GraphqlReply, SyncArgs, TxCompileReply,
    TxStateArg,
};

use crate::compiler::{
    CompilationRequest, Compiler, CompilerInit, ConnectionState, TranspiledOperation,
};
use crate::error::{ContractViolation, WorkerError, WorkerResult};
use crate::state::{DatabaseCache, DatabaseState, DatabaseUpdate, GlobalState};
use crate::tx_cache::SerializedStateCache;

/// Arguments of `init_worker`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct InitPayload<C: Compiler> {
    pub backend_params: C::BackendParams,
    pub std_schema: C::Schema,
    pub reflection_schema: C::Schema,
    pub schema_class_layout: C::ClassLayout,
    /// Encoded separately from the rest of the payload.
    pub global_schema: ByteBuf,
    pub system_config: C::InstanceConfig,
}

pub struct WorkerContext<C: Compiler> {
    compiler: C,
    std_schema: Arc<C::Schema>,
    databases: DatabaseCache<C>,
    globals: GlobalState<C>,
    tx_cache: SerializedStateCache<C::State>,
}

impl<C: Compiler> WorkerContext<C> {
    /// Decode the bootstrap payload and construct the compiler.
    pub fn init(payload: &[u8]) -> WorkerResult<Self> {
        let payload: InitPayload<C> = codec::decode(payload)?;
        let global_schema: C::Schema = codec::decode(&payload.global_schema)?;
        let std_schema = Arc::new(payload.std_schema);

        let compiler = C::new(CompilerInit {
            backend_params: payload.backend_params,
            std_schema: std_schema.clone(),
            reflection_schema: payload.reflection_schema,
            schema_class_layout: payload.schema_class_layout,
        })?;

        info!("compiler worker initialized");
        Ok(Self {
            compiler,
            std_schema,
            databases: DatabaseCache::new(),
            globals: GlobalState::new(global_schema, payload.system_config),
            tx_cache: SerializedStateCache::new(),
        })
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn databases(&self) -> &DatabaseCache<C> {
        &self.databases
    }

    pub fn globals(&self) -> &GlobalState<C> {
        &self.globals
    }

    pub fn tx_cache(&self) -> &SerializedStateCache<C::State> {
        &self.tx_cache
    }

    // ── State sync ─────────────────────────────────────────────────

    /// Bring the cache in line with `args` and return the state of
    /// `args.dbname`.
    ///
    /// Evictions run first, so a database that is both evicted and
    /// targeted is rebuilt from the shipped fields. Any failure is
    /// reported as [`WorkerError::FailedStateSync`]; evictions already
    /// applied stay applied.
    pub fn sync(&mut self, args: SyncArgs) -> WorkerResult<Arc<DatabaseState<C>>> {
        self.apply_sync(args).map_err(WorkerError::failed_sync)
    }

    fn apply_sync(&mut self, args: SyncArgs) -> WorkerResult<Arc<DatabaseState<C>>> {
        let SyncArgs {
            dbname,
            evicted_dbs,
            user_schema,
            reflection_cache,
            global_schema,
            database_config,
            system_config,
        } = args;

        if !evicted_dbs.is_empty() {
            let evicted = self.databases.evict(&evicted_dbs);
            debug!(evicted, requested = evicted_dbs.len(), "evicted databases");
        }

        let db = match self.databases.get(&dbname) {
            None => {
                let user_schema = require(&dbname, "user_schema", user_schema)?;
                let reflection_cache = require(&dbname, "reflection_cache", reflection_cache)?;
                let database_config = require(&dbname, "database_config", database_config)?;

                let db = Arc::new(DatabaseState::new(
                    dbname.as_str(),
                    codec::decode(&user_schema)?,
                    codec::decode(&reflection_cache)?,
                    codec::decode(&database_config)?,
                ));
                self.databases.insert(db.clone());
                debug!(dbname = %dbname, cached = self.databases.len(), "database cached");
                db
            }
            Some(current) => {
                let update = DatabaseUpdate {
                    user_schema: decode_opt(user_schema.as_ref())?,
                    reflection_cache: decode_opt(reflection_cache.as_ref())?,
                    database_config: decode_opt(database_config.as_ref())?,
                };
                if update.is_empty() {
                    current
                } else {
                    let db = Arc::new(current.updated(update));
                    self.databases.insert(db.clone());
                    debug!(dbname = %dbname, "database state updated");
                    db
                }
            }
        };

        if let Some(bytes) = global_schema {
            self.globals.global_schema = Arc::new(codec::decode(&bytes)?);
            debug!("global schema replaced");
        }
        if let Some(bytes) = system_config {
            self.globals.instance_config = Arc::new(codec::decode(&bytes)?);
            debug!("instance config replaced");
        }

        Ok(db)
    }

    // ── Compile entry points ───────────────────────────────────────

    pub fn compile(
        &mut self,
        args: CompileArgs<C::Request>,
    ) -> WorkerResult<CompileReply<C::Units>> {
        let db = self.sync(args.sync)?;
        let (units, state) = self
            .compiler
            .compile_serialized_request(&self.globals.synced(&db), args.request)?;
        let state = self.tx_cache.store(state)?;
        Ok(CompileReply { units, state })
    }

    /// Compile inside an open transaction.
    ///
    /// With [`TxStateArg::ReuseLast`] the compile continues from the
    /// cached state and the reply is [`Unchanged`] when the state key did
    /// not move. A shipped state is rebased on the root user schema (the
    /// cached database's when `dbname` is given, else `user_schema`) and
    /// always re-serialized.
    ///
    /// [`Unchanged`]: cpool_core::TxStateReply::Unchanged
    pub fn compile_in_tx(
        &mut self,
        args: CompileInTxArgs<C::Request>,
    ) -> WorkerResult<TxCompileReply<C::Units>> {
        let CompileInTxArgs {
            dbname,
            user_schema,
            state,
            request,
        } = args;

        let (tx, prev_key) = match state {
            TxStateArg::ReuseLast => {
                let tx = self
                    .tx_cache
                    .state()
                    .cloned()
                    .ok_or(ContractViolation::NoCachedTxState)?;
                let key = tx.state_key();
                (tx, Some(key))
            }
            TxStateArg::Serialized(bytes) => {
                let mut tx: C::State = codec::decode(&bytes)?;
                self.tx_cache.invalidate_serialized();
                let root = match (dbname, user_schema) {
                    (Some(dbname), _) => {
                        self.databases
                            .get(&dbname)
                            .ok_or_else(|| ContractViolation::UnknownDatabase(dbname.clone()))?
                            .user_schema
                            .clone()
                    }
                    (None, Some(bytes)) => Arc::new(codec::decode(&bytes)?),
                    (None, None) => return Err(ContractViolation::MissingRootSchema.into()),
                };
                tx.set_root_user_schema(root);
                (tx, None)
            }
        };

        let (units, tx) = self.compiler.compile_serialized_request_in_tx(tx, request)?;
        let state = self.tx_cache.store_tx(tx, prev_key)?;
        Ok(TxCompileReply { units, state })
    }

    pub fn compile_notebook(
        &mut self,
        args: CompileArgs<C::NotebookRequest>,
    ) -> WorkerResult<C::NotebookResult> {
        let db = self.sync(args.sync)?;
        Ok(self
            .compiler
            .compile_notebook(&self.globals.synced(&db), args.request)?)
    }

    pub fn compile_sql(&mut self, args: CompileArgs<C::SqlRequest>) -> WorkerResult<C::SqlResult> {
        let db = self.sync(args.sync)?;
        Ok(self
            .compiler
            .compile_sql(&self.globals.synced(&db), args.request)?)
    }

    /// Transpile a GraphQL operation and compile the resulting query as a
    /// JSON, single-result request.
    pub fn compile_graphql(
        &mut self,
        args: CompileArgs<C::GraphqlRequest>,
    ) -> WorkerResult<GraphqlReply<C::Units, C::GraphqlOperation>> {
        let db = self.sync(args.sync)?;
        let synced = self.globals.synced(&db);

        let operation = self
            .compiler
            .transpile_graphql(&self.std_schema, &synced, args.request)?;
        let request = CompilationRequest::graphql(operation.source_text());
        let (units, _) = self.compiler.compile(&synced, request)?;

        Ok(GraphqlReply { units, operation })
    }
}

fn require(dbname: &str, field: &'static str, value: Option<ByteBuf>) -> WorkerResult<ByteBuf> {
    value.ok_or_else(|| {
        ContractViolation::IncompleteDatabaseState {
            dbname: dbname.to_string(),
            field,
        }
        .into()
    })
}

fn decode_opt<T: DeserializeOwned>(bytes: Option<&ByteBuf>) -> WorkerResult<Option<T>> {
    Ok(bytes.map(|b| codec::decode(b)).transpose()?)
}
