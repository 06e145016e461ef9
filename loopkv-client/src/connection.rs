//! # Connection
//!
//! Non-blocking RESP2 transport owned by the event loop. The stream is split so
//! the loop can wait for readability and drain pending writes in the same
//! `select!`.

use std::io;

use bytes::{Buf, BytesMut};
use loopkv_common::{parse_reply, ProtocolError, ProtocolResult, RespValue};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::command::Payload;
use crate::config::{ClientConfig, Endpoint};
use crate::error::{ClientError, ClientResult};

type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;
type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// Buffers incoming bytes and yields complete replies.
pub(crate) struct ReplyReader {
    stream: ReadHalf,
    buffer: BytesMut,
}

impl ReplyReader {
    /// Reads whatever is available. `Ok(0)` means the peer closed.
    pub(crate) async fn fill(&mut self) -> io::Result<usize> {
        self.stream.read_buf(&mut self.buffer).await
    }

    pub(crate) fn next_reply(&mut self) -> ProtocolResult<Option<RespValue>> {
        parse_reply(&mut self.buffer)
    }
}

/// Encodes requests into a pending buffer flushed as the socket allows.
pub(crate) struct RequestWriter {
    stream: WriteHalf,
    buffer: BytesMut,
    closing: bool,
}

impl RequestWriter {
    pub(crate) fn enqueue(&mut self, payload: &Payload) -> ClientResult<()> {
        if self.closing {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection is closing",
            )));
        }
        if payload.is_empty() {
            return Err(ProtocolError::EmptyCommand.into());
        }
        payload.encode_into(&mut self.buffer);
        Ok(())
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    /// Writes part of the pending buffer.
    pub(crate) async fn write_some(&mut self) -> io::Result<usize> {
        let written = self.stream.write(&self.buffer).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        self.buffer.advance(written);
        Ok(written)
    }

    /// Flushes what is pending and shuts the write side down.
    pub(crate) async fn close(&mut self) -> io::Result<()> {
        self.closing = true;
        while self.has_pending() {
            self.write_some().await?;
        }
        self.stream.shutdown().await
    }
}

/// Connects to `endpoint` and splits the stream.
pub(crate) async fn open(
    endpoint: &Endpoint,
    config: &ClientConfig,
) -> ClientResult<(ReplyReader, RequestWriter)> {
    let connect = async {
        let (read, write): (ReadHalf, WriteHalf) = match endpoint {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(config.nodelay)?;
                let (read, write) = stream.into_split();
                (Box::new(read) as ReadHalf, Box::new(write) as WriteHalf)
            }
            Endpoint::Unix { path } => connect_unix(path).await?,
        };
        Ok::<_, ClientError>((read, write))
    };

    let (read, write) = match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| ClientError::ConnectTimeout)??,
        None => connect.await?,
    };
    debug!(%endpoint, "connection established");

    Ok((
        ReplyReader {
            stream: read,
            buffer: BytesMut::with_capacity(config.read_buffer_capacity),
        },
        RequestWriter {
            stream: write,
            buffer: BytesMut::with_capacity(config.write_buffer_capacity),
            closing: false,
        },
    ))
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> ClientResult<(ReadHalf, WriteHalf)> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (read, write) = stream.into_split();
    Ok((Box::new(read) as ReadHalf, Box::new(write) as WriteHalf))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> ClientResult<(ReadHalf, WriteHalf)> {
    Err(ClientError::Unsupported("unix sockets"))
}
