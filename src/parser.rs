use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::bridge;
use crate::codec::Reader;
use crate::encoding::{Encoding, EncodingErrors};
use crate::frame::{Frame, CRLF};
use crate::transport::{CloseCallback, Transport};
use crate::Error;

/// An incremental reply decoder. Bytes are fed in as they arrive and replies are taken out once
/// they have been completely received.
pub trait DecodeEngine: Send {
    fn feed(&mut self, data: &[u8]);

    /// `Ok(None)` when the buffered bytes don't hold a complete reply yet. Malformed input is an
    /// error.
    fn try_get_reply(&mut self) -> Result<Option<Frame>, Error>;
}

/// Options a decode engine is built with, mirrored from the connection configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderOptions {
    pub decode_responses: bool,
    pub encoding: Encoding,
    pub encoding_errors: EncodingErrors,
}

/// Builds a fresh decode engine every time a connection is established.
pub type EngineFactory = Arc<dyn Fn(ReaderOptions) -> Box<dyn DecodeEngine> + Send + Sync>;

pub fn default_engine_factory() -> EngineFactory {
    Arc::new(|options| Box::new(Reader::new(options)))
}

type EngineSlot = Arc<Mutex<Option<Box<dyn DecodeEngine>>>>;

/// Decodes the replies of one connection, pulling more bytes from its transport when the engine
/// needs them.
pub struct Parser {
    factory: EngineFactory,
    engine: EngineSlot,
}

impl Parser {
    pub fn new(factory: EngineFactory) -> Parser {
        Parser {
            factory,
            engine: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts decoding a new stream with a new engine.
    pub fn on_connect(&mut self, options: ReaderOptions) {
        self.engine = Arc::new(Mutex::new(Some((self.factory)(options))));
    }

    /// Drops the engine along with anything it buffered. Safe to call any number of times.
    pub fn on_disconnect(&self) {
        teardown(&self.engine);
    }

    pub fn is_active(&self) -> bool {
        self.engine
            .lock()
            .map(|engine| engine.is_some())
            .unwrap_or(false)
    }

    /// A callback tearing down the current engine, to be run when the transport closes. Engines
    /// created by later connects are unaffected by it.
    pub fn on_close_callback(&self) -> CloseCallback {
        let engine: Weak<_> = Arc::downgrade(&self.engine);
        Box::new(move || {
            if let Some(engine) = engine.upgrade() {
                teardown(&engine);
            }
        })
    }

    /// Reads one reply, suspending on the transport for as long as the engine reports that the
    /// reply is incomplete.
    pub async fn read_response(&self, transport: &mut dyn Transport) -> Result<Frame, Error> {
        let mut reply = self.try_get_reply()?;

        loop {
            if let Some(frame) = reply {
                return Ok(frame);
            }

            let chunk = bridge::read_until(transport, CRLF).await?;
            if chunk.is_empty() {
                return Err(Error::closed());
            }
            trace!(len = chunk.len(), "read chunk");
            self.feed(&chunk)?;

            // Reads stop at a line terminator. A chunk that doesn't end with one was cut short, so
            // more data is already on its way and asking the engine would be wasted work.
            if !chunk.ends_with(b"\n") {
                reply = None;
                continue;
            }
            reply = self.try_get_reply()?;
        }
    }

    fn try_get_reply(&self) -> Result<Option<Frame>, Error> {
        self.with_engine(|engine| engine.try_get_reply())
    }

    fn feed(&self, data: &[u8]) -> Result<(), Error> {
        self.with_engine(|engine| {
            engine.feed(data);
            Ok(())
        })
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn DecodeEngine>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut engine = self.engine.lock().map_err(|_| Error::closed())?;
        match engine.as_mut() {
            Some(engine) => f(engine),
            // Never connected, or the transport closed under us.
            None => Err(Error::closed()),
        }
    }
}

fn teardown(engine: &EngineSlot) {
    if let Ok(mut engine) = engine.lock() {
        engine.take();
    }
}
