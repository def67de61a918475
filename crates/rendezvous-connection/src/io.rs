//! Socket halves: ordered writer task and chunked reader

use crate::{ConnectionError, ConnectionId, Outbound};
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Writer task handle; resolves to the number of bytes written
pub type WriterTask = JoinHandle<Result<u64, ConnectionError>>;

/// Spawn the task that owns a connection's write half
///
/// Chunks are written in the order they were queued. The task stops (and
/// shuts the write half down) on [`Outbound::Close`], when every handle has
/// been dropped, or on the first write error. Once it stops, further sends on
/// any handle fail with [`ConnectionError::Closed`].
pub fn spawn_writer<W>(id: ConnectionId, writer: W, rx: mpsc::Receiver<Outbound>) -> WriterTask
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(run_writer(id, writer, rx))
}

async fn run_writer<W>(
    id: ConnectionId,
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<u64, ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;

    while let Some(command) = rx.recv().await {
        match command {
            Outbound::Data(data) => {
                trace!("Writing {} bytes to {}", data.len(), id);
                writer.write_all(&data).await?;
                writer.flush().await?;
                written += data.len() as u64;
            }
            Outbound::Close => {
                debug!("Close requested for {}", id);
                break;
            }
        }
    }

    rx.close();
    let _ = writer.shutdown().await;

    debug!("Writer for {} finished ({} bytes written)", id, written);
    Ok(written)
}

/// Reads a byte stream as a sequence of owned chunks
pub struct ChunkReader<R> {
    reader: R,
    buf: BytesMut,
    chunk_size: usize,
}

impl<R> ChunkReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Next chunk as received, or `None` at end of stream
    ///
    /// Cancel safe: dropping the future before it completes loses no data.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        self.buf.reserve(self.chunk_size);

        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        Ok(Some(self.buf.split().freeze()))
    }

    /// Read and discard until end of stream, an error, or `linger` elapses
    ///
    /// Used after a terminal response so the peer can read it before the
    /// socket is dropped. Returns the number of bytes discarded.
    pub async fn discard_until_eof(&mut self, linger: Duration) -> u64 {
        let mut discarded = 0u64;
        let drain = async {
            while let Ok(Some(chunk)) = self.next_chunk().await {
                discarded += chunk.len() as u64;
            }
        };
        let _ = tokio::time::timeout(linger, drain).await;
        discarded
    }
}
