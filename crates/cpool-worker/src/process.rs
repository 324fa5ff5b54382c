//! The worker process request loop.
//!
//! Frames are a little-endian `u32` length followed by that many bytes of
//! an encoded envelope. The coordinator writes one [`RequestEnvelope`] per
//! frame and reads back one [`ResponseEnvelope`] per request, in order.

use serde_bytes::ByteBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cpool_core::codec;
use cpool_core::config::{LogFormat, WorkerConfig};
use cpool_core::{Outcome, PoolConfig, RequestEnvelope, ResponseEnvelope};

use crate::compiler::Compiler;
use crate::dispatch::Worker;
use crate::error::{WorkerError, WorkerResult};

/// Read one frame. Returns `None` on a clean end of input.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> WorkerResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(err.into());
    }
    let size = u32::from_le_bytes(header) as usize;
    if size > max_frame_bytes {
        return Err(WorkerError::FrameTooLarge {
            size,
            limit: max_frame_bytes,
        });
    }
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> WorkerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let size = u32::try_from(payload.len()).map_err(|_| WorkerError::FrameTooLarge {
        size: payload.len(),
        limit: u32::MAX as usize,
    })?;
    writer.write_all(&size.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serve requests until the input is closed.
///
/// Every request is answered. After answering a fatal error the loop
/// stops and returns that error. Returns the number of requests served.
pub async fn serve<C, R, W>(
    reader: &mut R,
    writer: &mut W,
    worker: &mut Worker<C>,
    config: &WorkerConfig,
) -> WorkerResult<u64>
where
    C: Compiler,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(max_frame_bytes = config.max_frame_bytes, "compiler worker serving");
    let mut served = 0u64;

    while let Some(frame) = read_frame(reader, config.max_frame_bytes).await? {
        let envelope: RequestEnvelope = codec::decode(&frame).inspect_err(|err| {
            warn!(error = %err, "malformed request envelope");
        })?;
        let request_id = envelope.request_id;

        let (outcome, fatal) = match worker.handle(&envelope.method, &envelope.args) {
            Ok(reply) => (Outcome::Ok(ByteBuf::from(reply)), None),
            Err(err) if err.is_fatal() => {
                warn!(request_id, method = %envelope.method, error = %err, "fatal worker error");
                (Outcome::Err(err.to_error_info()), Some(err))
            }
            Err(err) => {
                debug!(request_id, method = %envelope.method, error = %err, "request failed");
                (Outcome::Err(err.to_error_info()), None)
            }
        };

        let response = ResponseEnvelope {
            request_id,
            outcome,
        };
        write_frame(writer, &codec::encode(&response)?).await?;
        served += 1;

        if let Some(err) = fatal {
            return Err(err);
        }
    }

    info!(served, "compiler worker input closed");
    Ok(served)
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins over the
/// configured filter. Does nothing if a subscriber is already set.
pub fn init_tracing(config: &WorkerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Run a worker over stdin/stdout with compiler `C`.
pub async fn run_stdio<C: Compiler>(config: &PoolConfig) -> anyhow::Result<()> {
    init_tracing(&config.worker);

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut worker = Worker::<C>::new();
    serve(&mut stdin, &mut stdout, &mut worker, &config.worker).await?;
    Ok(())
}
