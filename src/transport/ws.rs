#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types expose their wire protocol in the name for clarity"
)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WireMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{FrameSink, FrameSource, Inbound, Transport};
use crate::error::{Error, Kind};
use crate::types::Message;
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::with_source(Kind::ConnectionFailed, e))?;
        let (write, read) = stream.split();

        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, WireMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, message: Message) -> Result<()> {
        let frame = match message {
            Message::Text(text) => WireMessage::Text(text.into()),
            Message::Binary(data) => WireMessage::Binary(data),
        };
        self.write
            .send(frame)
            .await
            .map_err(|e| Error::with_source(Kind::SendFailed, e))
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.write
            .send(WireMessage::Ping(Bytes::new()))
            .await
            .map_err(|e| Error::with_source(Kind::SendFailed, e))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.write
            .send(WireMessage::Close(Some(frame)))
            .await
            .map_err(|e| Error::with_source(Kind::SendFailed, e))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn receive(&mut self) -> Result<Inbound> {
        loop {
            match self.read.next().await {
                Some(Ok(WireMessage::Text(text))) => {
                    return Ok(Inbound::Message(Message::Text(text.as_str().to_owned())));
                }
                Some(Ok(WireMessage::Binary(data))) => {
                    return Ok(Inbound::Message(Message::Binary(data)));
                }
                Some(Ok(WireMessage::Close(frame))) => {
                    return Ok(Inbound::Closed(frame.map(|f| u16::from(f.code))));
                }
                // Ping/pong control frames are answered by the protocol layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::with_source(Kind::ReceiveFailed, e)),
                None => return Ok(Inbound::Closed(None)),
            }
        }
    }
}
