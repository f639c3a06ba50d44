pub mod bridge;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod parser;
pub mod transport;

pub use command::Arg;
pub use config::ConnectionConfig;
pub use connection::{Connection, State};
pub use error::Error;
pub use frame::Frame;

pub type Result<T> = std::result::Result<T, Error>;
