//! Method-name dispatch and the worker lifecycle.

use tracing::debug;

use cpool_core::codec;
use cpool_core::methods;

use crate::compiler::Compiler;
use crate::context::WorkerContext;
use crate::error::{ContractViolation, WorkerResult};

/// The handler a method name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    InitWorker,
    Compile,
    CompileInTx,
    CompileNotebook,
    CompileGraphql,
    CompileSql,
    /// Any other name, passed through to [`Compiler::call`].
    Forward(String),
}

impl Handler {
    fn for_method(method: &str) -> Self {
        match method {
            methods::INIT_WORKER => Handler::InitWorker,
            methods::COMPILE => Handler::Compile,
            methods::COMPILE_IN_TX => Handler::CompileInTx,
            methods::COMPILE_NOTEBOOK => Handler::CompileNotebook,
            methods::COMPILE_GRAPHQL => Handler::CompileGraphql,
            methods::COMPILE_SQL => Handler::CompileSql,
            other => Handler::Forward(other.to_string()),
        }
    }
}

/// A worker process: uninitialized until `init_worker` succeeds.
pub enum Worker<C: Compiler> {
    Uninitialized,
    Ready(Box<WorkerContext<C>>),
}

impl<C: Compiler> Worker<C> {
    pub fn new() -> Self {
        Worker::Uninitialized
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Worker::Ready(_))
    }

    pub fn context(&self) -> Option<&WorkerContext<C>> {
        match self {
            Worker::Ready(ctx) => Some(&**ctx),
            Worker::Uninitialized => None,
        }
    }

    /// Resolve a method name. Before initialization only `init_worker`
    /// resolves.
    pub fn get_handler(&self, method: &str) -> WorkerResult<Handler> {
        match self {
            Worker::Uninitialized if method == methods::INIT_WORKER => Ok(Handler::InitWorker),
            Worker::Uninitialized => {
                Err(ContractViolation::NotInitialized(method.to_string()).into())
            }
            Worker::Ready(_) => Ok(Handler::for_method(method)),
        }
    }

    /// Run one request and return its encoded reply.
    pub fn handle(&mut self, method: &str, args: &[u8]) -> WorkerResult<Vec<u8>> {
        let handler = self.get_handler(method)?;
        debug!(method, "dispatching request");

        match self {
            Worker::Uninitialized => {
                let ctx = WorkerContext::init(args)?;
                *self = Worker::Ready(Box::new(ctx));
                Ok(codec::encode(&())?)
            }
            Worker::Ready(ctx) => ctx.dispatch(&handler, args),
        }
    }
}

impl<C: Compiler> Default for Worker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Compiler> WorkerContext<C> {
    /// Decode `args` for `handler`, run it, and encode the reply.
    pub fn dispatch(&mut self, handler: &Handler, args: &[u8]) -> WorkerResult<Vec<u8>> {
        let reply = match handler {
            Handler::InitWorker => return Err(ContractViolation::AlreadyInitialized.into()),
            Handler::Compile => codec::encode(&self.compile(codec::decode(args)?)?)?,
            Handler::CompileInTx => codec::encode(&self.compile_in_tx(codec::decode(args)?)?)?,
            Handler::CompileNotebook => {
                codec::encode(&self.compile_notebook(codec::decode(args)?)?)?
            }
            Handler::CompileGraphql => {
                codec::encode(&self.compile_graphql(codec::decode(args)?)?)?
            }
            Handler::CompileSql => codec::encode(&self.compile_sql(codec::decode(args)?)?)?,
            Handler::Forward(method) => self.compiler().call(method, args)?,
        };
        Ok(reply)
    }
}
