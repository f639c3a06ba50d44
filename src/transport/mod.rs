//! The reactor side of a connection.
//!
//! A [`Transport`] never blocks and never returns results directly: writes and reads are handed
//! over together with a callback, and the transport invokes the callback once the operation
//! finishes. [`bridge`](crate::bridge) turns these callbacks back into awaitable calls.

mod tcp;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use tcp::{TcpConnector, TcpTransport};

/// Invoked once the whole buffer was written, or with the error that stopped it.
pub type WriteCallback = Box<dyn FnOnce(io::Result<()>) + Send>;
/// Invoked with the bytes read up to and including the delimiter. An empty chunk means the
/// remote end closed the stream.
pub type ReadCallback = Box<dyn FnOnce(io::Result<Bytes>) + Send>;
/// Invoked at most once, when the stream closes for any reason.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// A callback driven, non blocking byte stream.
///
/// Implementations may drop a pending callback without invoking it once the stream is closed;
/// callers treat that the same as the stream reporting closure.
pub trait Transport: Send {
    fn write(&mut self, data: Bytes, on_complete: WriteCallback);

    fn read_until(&mut self, delimiter: &'static [u8], on_data: ReadCallback);

    fn is_closed(&self) -> bool;

    /// Closes the stream. Closing an already closed stream does nothing.
    fn close(&mut self);

    fn set_close_callback(&mut self, callback: CloseCallback);
}

/// Opens transports to a server. Injected into every [`Connection`](crate::Connection), so tests
/// can hand out fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> io::Result<Box<dyn Transport>>;
}
