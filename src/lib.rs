#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod close_code;
pub mod error;
pub mod lifecycle;
pub mod stream;
pub mod transport;
pub mod types;

pub use error::Error;
pub use lifecycle::{LifecycleEvent, LifecycleEvents};
pub use stream::{Config, ConnectionState, MessageStream, SocketStream};
pub use types::Message;

pub type Result<T> = std::result::Result<T, Error>;
