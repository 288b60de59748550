//! Transport binding consumed by the stream service.
//!
//! The service never talks to a socket directly: it opens connections
//! through [`Transport`] and drives the resulting write/read halves. The
//! production binding over `tokio-tungstenite` lives in [`ws`]; tests
//! substitute scripted implementations.

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::types::Message;

pub mod ws;

pub use ws::WsTransport;

/// One event pulled from the read half of a connection.
#[non_exhaustive]
#[derive(Debug)]
pub enum Inbound {
    /// A data frame
    Message(Message),
    /// The peer closed the connection, with the close code it supplied
    Closed(Option<u16>),
}

/// Opens connections to a WebSocket endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a connection and returns its write and read halves.
    async fn open(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)>;
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Sends one data frame.
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Sends a keepalive ping control frame.
    async fn send_ping(&mut self) -> Result<()>;

    /// Requests connection close with the given code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Read half of an open connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Receives the next inbound event, suspending until a frame arrives or
    /// the peer closes. Dropping the returned future abandons the receive
    /// cleanly; callers race it against handle cancellation.
    async fn receive(&mut self) -> Result<Inbound>;
}
