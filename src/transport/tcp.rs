use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::{CloseCallback, Connector, ReadCallback, Transport, WriteCallback};

/// Opens plain TCP transports with Nagle's algorithm disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> io::Result<Box<dyn Transport>> {
        let stream = with_timeout(
            timeout,
            "Timeout connecting to server",
            TcpStream::connect((host, port)),
        )
        .await?;
        stream.set_nodelay(true)?;

        debug!(peer = ?stream.peer_addr().ok(), "tcp transport opened");

        Ok(Box::new(TcpTransport::new(stream, timeout)))
    }
}

enum Op {
    Write(Bytes, WriteCallback),
    ReadUntil(&'static [u8], ReadCallback),
    Close,
}

struct Shared {
    closed: AtomicBool,
    close_callback: Mutex<Option<CloseCallback>>,
}

impl Shared {
    /// Flags the stream as closed and runs the close callback, only the first time it is called.
    fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = match self.close_callback.lock() {
            Ok(mut callback) => callback.take(),
            Err(_) => None,
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// A [`Transport`] over a tokio `TcpStream`.
///
/// The stream is owned by a reactor task that runs the requested operations one after another
/// and reports each result through its callback. Closing the transport shuts the stream down,
/// dropping it only releases the socket.
pub struct TcpTransport {
    ops: UnboundedSender<Op>,
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Must be called from within a tokio runtime.
    pub fn new(stream: TcpStream, timeout: Option<Duration>) -> TcpTransport {
        let (ops, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            close_callback: Mutex::new(None),
        });

        tokio::spawn(run(stream, rx, shared.clone(), timeout));

        TcpTransport { ops, shared }
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, data: Bytes, on_complete: WriteCallback) {
        // If the reactor is gone the callback is dropped along with the op, which callers take
        // as the stream being closed.
        let _ = self.ops.send(Op::Write(data, on_complete));
    }

    fn read_until(&mut self, delimiter: &'static [u8], on_data: ReadCallback) {
        let _ = self.ops.send(Op::ReadUntil(delimiter, on_data));
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        let _ = self.ops.send(Op::Close);
        self.shared.mark_closed();
    }

    fn set_close_callback(&mut self, callback: CloseCallback) {
        if self.is_closed() {
            callback();
            return;
        }
        if let Ok(mut slot) = self.shared.close_callback.lock() {
            *slot = Some(callback);
        }
    }
}

async fn run(
    mut stream: TcpStream,
    mut ops: UnboundedReceiver<Op>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
) {
    // Data is read from the socket into the read buffer. When a delimited chunk is handed out,
    // the corresponding data is removed from the buffer.
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        let Some(op) = ops.recv().await else {
            // Dropped without being closed. Dropping the stream releases the socket without
            // shutting down the connection for other processes holding it.
            shared.mark_closed();
            return;
        };
        match op {
            Op::Write(data, on_complete) => {
                let result =
                    with_timeout(timeout, "Timeout writing to socket", stream.write_all(&data))
                        .await;
                match result {
                    Ok(()) => on_complete(Ok(())),
                    Err(err) => {
                        debug!(%err, "write failed, closing transport");
                        shared.mark_closed();
                        on_complete(Err(err));
                        break;
                    }
                }
            }
            Op::ReadUntil(delimiter, on_data) => {
                let result = with_timeout(
                    timeout,
                    "Timeout reading from socket",
                    read_until(&mut stream, &mut buffer, delimiter),
                )
                .await;
                match result {
                    Ok(chunk) if chunk.is_empty() => {
                        debug!("remote end closed the transport");
                        shared.mark_closed();
                        on_data(Ok(chunk));
                        break;
                    }
                    Ok(chunk) => on_data(Ok(chunk)),
                    Err(err) => {
                        debug!(%err, "read failed, closing transport");
                        shared.mark_closed();
                        on_data(Err(err));
                        break;
                    }
                }
            }
            Op::Close => break,
        }
    }

    shared.mark_closed();
    let _ = stream.shutdown().await;
}

/// Reads until `delimiter` shows up in the buffer and splits off everything up to and including
/// it. Returns an empty chunk once the remote end closes the stream.
async fn read_until(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    delimiter: &[u8],
) -> io::Result<Bytes> {
    if delimiter.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty read delimiter",
        ));
    }

    let mut searched = 0;
    loop {
        if let Some(position) = buffer[searched..]
            .windows(delimiter.len())
            .position(|window| window == delimiter)
        {
            let end = searched + position + delimiter.len();
            return Ok(buffer.split_to(end).freeze());
        }
        // A delimiter may straddle the end of what has been read so far.
        searched = buffer.len().saturating_sub(delimiter.len() - 1);

        if stream.read_buf(buffer).await? == 0 {
            return Ok(Bytes::new());
        }
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    message: &'static str,
    operation: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, operation)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, message))?,
        None => operation.await,
    }
}
