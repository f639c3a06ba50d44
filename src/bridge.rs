//! Suspends the calling task on a callback driven [`Transport`] operation.
//!
//! Each call hands the transport a callback that completes a oneshot channel, then awaits the
//! receiving half. The reactor keeps running other work while the task waits, and resumes it by
//! invoking the callback. Both functions borrow the transport mutably, so at most one task can be
//! waiting on a given transport at any time.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::transport::Transport;
use crate::Error;

/// Writes `data` and waits for the transport to report completion.
pub async fn write(transport: &mut dyn Transport, data: Bytes) -> Result<(), Error> {
    let (tx, rx) = oneshot::channel();

    transport.write(
        data,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    match rx.await {
        Ok(result) => Ok(result?),
        // The transport dropped the callback, it closed before the write finished.
        Err(_) => Err(Error::closed()),
    }
}

/// Waits for the bytes up to and including `delimiter`. An empty chunk means the remote end closed
/// the transport.
pub async fn read_until(
    transport: &mut dyn Transport,
    delimiter: &'static [u8],
) -> Result<Bytes, Error> {
    let (tx, rx) = oneshot::channel();

    transport.read_until(
        delimiter,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );

    match rx.await {
        Ok(result) => Ok(result?),
        Err(_) => Ok(Bytes::new()),
    }
}
