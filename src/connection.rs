use std::io;
use std::process;
use std::sync::Arc;

use bytes::Bytes;
use strum_macros::Display;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::bridge;
use crate::command::{pack_command, Arg};
use crate::config::ConnectionConfig;
use crate::frame::Frame;
use crate::parser::{default_engine_factory, EngineFactory, Parser};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum State {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
}

/// A single session with a Redis server, speaking strict request/response: every command written
/// is followed by reading its reply before the next one goes out.
///
/// The connection is established lazily by the first command sent, and set up again by the next
/// command after any failure tore it down.
pub struct Connection {
    id: Uuid,
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    parser: Parser,
    state: State,
    // Set while a write or read is suspended on the transport. Still set on entry means the
    // future driving it was dropped and the stream is somewhere in the middle of a reply.
    in_flight: bool,
    // The process that created the connection. A forked child must not share the parent's socket.
    pid: u32,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            config,
            connector: Arc::new(TcpConnector),
            transport: None,
            parser: Parser::new(default_engine_factory()),
            state: State::Disconnected,
            in_flight: false,
            pid: process::id(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Connection {
        self.connector = connector;
        self
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Connection {
        self.parser = Parser::new(factory);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Ready && !self.in_flight && self.transport_open()
    }

    fn transport_open(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| !transport.is_closed())
    }

    /// Connects to the server unless already connected.
    #[instrument(
        name = "connect",
        skip(self),
        fields(connection_id = %self.id, host = %self.config.host, port = self.config.port)
    )]
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.check_pid();
        self.abandon_interrupted();
        if self.is_connected() {
            return Ok(());
        }

        // Whatever is left from a transport the server closed on us.
        self.disconnect();

        self.state = State::Connecting;
        let transport = match self
            .connector
            .open(
                &self.config.host,
                self.config.port,
                self.config.socket_timeout,
            )
            .await
        {
            Ok(transport) => transport,
            Err(err) => {
                self.state = State::Disconnected;
                let message = self.error_message(&err);
                warn!("{}", message);
                return Err(Error::Connection(message));
            }
        };
        self.transport = Some(transport);

        if let Err(err) = self.on_connect().await {
            warn!(%err, "handshake failed");
            self.disconnect();
            return Err(err);
        }

        self.state = State::Ready;
        debug!("Connected");
        Ok(())
    }

    fn error_message(&self, err: &io::Error) -> String {
        match err.raw_os_error() {
            Some(code) => {
                // The code is already part of the message, keep only the reason.
                let text = err.to_string();
                let suffix = format!(" (os error {})", code);
                let reason = text.strip_suffix(suffix.as_str()).unwrap_or(text.as_str());
                format!(
                    "Error {} connecting {}:{}. {}.",
                    code, self.config.host, self.config.port, reason
                )
            }
            None => format!(
                "Error connecting to {}:{}. {}.",
                self.config.host, self.config.port, err
            ),
        }
    }

    /// Sets up the parser for the fresh transport, then authenticates and selects the database.
    async fn on_connect(&mut self) -> Result<(), Error> {
        self.state = State::Handshaking;
        self.parser.on_connect(self.config.reader_options());

        let on_close = self.parser.on_close_callback();
        if let Some(transport) = self.transport.as_mut() {
            transport.set_close_callback(on_close);
        }

        let password = self.config.password.clone().filter(|p| !p.is_empty());
        if let Some(password) = password {
            let packed = self.pack_command(&["AUTH".into(), password.into()])?;
            self.write_packed(packed).await?;
            match self.read_response().await {
                Ok(Frame::Simple(status)) if status == "OK" => {}
                Ok(_) => return Err(Error::Authentication("Invalid Password".to_string())),
                Err(Error::Response(message)) => return Err(Error::Authentication(message)),
                Err(err) => return Err(err),
            }
            debug!("Authenticated");
        }

        if self.config.db != 0 {
            let packed = self.pack_command(&["SELECT".into(), self.config.db.into()])?;
            self.write_packed(packed).await?;
            match self.read_response().await {
                Ok(Frame::Simple(status)) if status == "OK" => {}
                Ok(_) | Err(Error::Response(_)) => {
                    return Err(Error::Connection("Invalid Database".to_string()))
                }
                Err(err) => return Err(err),
            }
            debug!(db = self.config.db, "Selected database");
        }

        Ok(())
    }

    /// Tears down the parser and closes the transport. Safe to call at any time, any number of
    /// times.
    pub fn disconnect(&mut self) {
        self.parser.on_disconnect();
        if let Some(mut transport) = self.transport.take() {
            if !transport.is_closed() {
                transport.close();
            }
            debug!(connection_id = %self.id, "Disconnected");
        }
        self.in_flight = false;
        self.state = State::Disconnected;
    }

    /// Drops a connection whose last write or read never completed. Whatever that operation left
    /// on the stream would otherwise be taken as the answer to the next command.
    fn abandon_interrupted(&mut self) {
        if !self.in_flight {
            return;
        }
        warn!(connection_id = %self.id, "Previous operation was interrupted, reconnecting");
        self.disconnect();
    }

    /// A connection created by another process holds that process' socket. Forget about it
    /// instead of writing into a stream somebody else is reading from.
    fn check_pid(&mut self) {
        let pid = process::id();
        if pid == self.pid {
            return;
        }
        warn!(
            connection_id = %self.id,
            parent = self.pid,
            pid,
            "Connection used from a forked process, reconnecting"
        );
        // The parent still talks over the stream, so it is dropped without being closed.
        self.parser.on_disconnect();
        self.transport = None;
        self.in_flight = false;
        self.state = State::Disconnected;
        self.pid = pid;
    }

    /// Packs the arguments with the connection's text encoding.
    pub fn pack_command(&self, args: &[Arg]) -> Result<Bytes, Error> {
        pack_command(args, self.config.encoding, self.config.encoding_errors)
    }

    pub async fn send_command<I, A>(&mut self, args: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
        let packed = self.pack_command(&args)?;
        self.send_packed_command(packed).await
    }

    /// Sends an already packed command, connecting first if needed.
    pub async fn send_packed_command(&mut self, command: Bytes) -> Result<(), Error> {
        self.check_pid();
        self.abandon_interrupted();
        if !self.is_connected() {
            self.connect().await?;
        }
        self.write_packed(command).await
    }

    async fn write_packed(&mut self, command: Bytes) -> Result<(), Error> {
        self.in_flight = true;
        let result = match self.transport.as_deref_mut() {
            Some(transport) => bridge::write(transport, command).await,
            None => Err(Error::closed()),
        };
        self.in_flight = false;

        if let Err(err) = result {
            self.disconnect();
            return Err(err);
        }
        Ok(())
    }

    /// Reads the reply to the command sent last. Error replies are returned as
    /// [`Error::Response`] and leave the connection usable. Any other failure disconnects.
    pub async fn read_response(&mut self) -> Result<Frame, Error> {
        self.abandon_interrupted();

        self.in_flight = true;
        let result = match self.transport.as_deref_mut() {
            Some(transport) => self.parser.read_response(transport).await,
            None => Err(Error::closed()),
        };
        self.in_flight = false;

        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                self.disconnect();
                return Err(err);
            }
        };
        debug!(connection_id = %self.id, "read response: {:?}", frame);

        match frame {
            Frame::Error(message) => Err(Error::Response(message)),
            frame => Ok(frame),
        }
    }

    /// Sends a command and reads its reply.
    pub async fn execute<I, A>(&mut self, args: I) -> Result<Frame, Error>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.send_command(args).await?;
        self.read_response().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
