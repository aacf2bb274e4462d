pub mod command;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod format;
pub mod frame;
pub mod handshake;
pub mod nonce;
pub mod output;
pub mod requester;
pub mod transport;

pub use driver::GreinClient;
pub use error::{ErrorKind, GreinError};
