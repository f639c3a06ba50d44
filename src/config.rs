use std::time::Duration;

use crate::encoding::{Encoding, EncodingErrors};
use crate::parser::ReaderOptions;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;

/// Everything a [`Connection`](crate::Connection) needs to reach and set up a session with the
/// server.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Logical database selected right after connecting. `0` is the server default and skips the
    /// `SELECT` round trip.
    pub db: u32,
    /// Sent with `AUTH` right after connecting.
    pub password: Option<String>,
    /// Applies to establishing the connection and to every read and write on it.
    pub socket_timeout: Option<Duration>,
    pub encoding: Encoding,
    pub encoding_errors: EncodingErrors,
    /// Decode bulk string replies to text using `encoding`, instead of returning raw bytes.
    pub decode_responses: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: host.into(),
            port,
            ..ConnectionConfig::default()
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            decode_responses: self.decode_responses,
            encoding: self.encoding,
            encoding_errors: self.encoding_errors,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: 0,
            password: None,
            socket_timeout: None,
            encoding: Encoding::default(),
            encoding_errors: EncodingErrors::default(),
            decode_responses: false,
        }
    }
}
