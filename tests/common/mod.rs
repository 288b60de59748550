#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    dead_code,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use socket_stream::error::{Error, Kind};
use socket_stream::transport::{FrameSink, FrameSource, Inbound, Transport};
use socket_stream::types::Message;
use socket_stream::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WireMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

/// Instruction broadcast to every connected client handler.
#[derive(Debug, Clone)]
pub enum ServerCommand {
    Text(String),
    Binary(Vec<u8>),
    /// Perform a closing handshake with the given code
    Close(u16),
    /// Drop the TCP stream without a closing handshake
    Abort,
}

/// Frame observed from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
}

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    command_tx: broadcast::Sender<ServerCommand>,
    frame_rx: mpsc::UnboundedReceiver<ClientFrame>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock server on a random port.
    pub async fn start() -> Self {
        Self::start_inner(false).await
    }

    /// Start a mock server that echoes every text frame back to its sender.
    pub async fn start_echo() -> Self {
        Self::start_inner(true).await
    }

    async fn start_inner(echo: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<ServerCommand>(64);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let connections = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = command_tx.clone();
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                counter.fetch_add(1, Ordering::SeqCst);
                let (mut write, mut read) = ws_stream.split();
                let frame_tx = frame_tx.clone();
                let mut command_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            frame = read.next() => {
                                match frame {
                                    Some(Ok(WireMessage::Text(text))) => {
                                        drop(frame_tx.send(ClientFrame::Text(text.as_str().to_owned())));
                                        if echo && write.send(WireMessage::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(WireMessage::Binary(data))) => {
                                        drop(frame_tx.send(ClientFrame::Binary(data.to_vec())));
                                    }
                                    Some(Ok(WireMessage::Ping(payload))) => {
                                        drop(frame_tx.send(ClientFrame::Ping));
                                        if write.send(WireMessage::Pong(payload)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(ServerCommand::Text(text)) => {
                                        if write.send(WireMessage::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Binary(data)) => {
                                        if write.send(WireMessage::Binary(data.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Close(code)) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "test close".into(),
                                        };
                                        drop(write.send(WireMessage::Close(Some(frame))).await);
                                        break;
                                    }
                                    Ok(ServerCommand::Abort) => {
                                        // Dropping both halves closes the TCP
                                        // stream without a closing handshake.
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            frame_rx,
            connections,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("ws://{}", self.addr)).unwrap()
    }

    /// Send a text frame to all connected clients.
    pub fn send_text(&self, text: &str) {
        drop(self.command_tx.send(ServerCommand::Text(text.to_owned())));
    }

    /// Send a binary frame to all connected clients.
    pub fn send_binary(&self, data: &[u8]) {
        drop(self.command_tx.send(ServerCommand::Binary(data.to_vec())));
    }

    /// Close all connections with the given close code.
    pub fn close(&self, code: u16) {
        drop(self.command_tx.send(ServerCommand::Close(code)));
    }

    /// Drop all connections without a closing handshake.
    pub fn abort(&self) {
        drop(self.command_tx.send(ServerCommand::Abort));
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Receive the next frame observed from any client.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        timeout(Duration::from_secs(2), self.frame_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Wait until a keepalive ping arrives, proving the client's connection
    /// handler is running and subscribed to server commands.
    pub async fn expect_ping(&mut self) {
        loop {
            match self.recv_frame().await {
                Some(ClientFrame::Ping) => return,
                Some(_) => {}
                None => panic!("timed out waiting for keepalive ping"),
            }
        }
    }
}

/// Shared observable state of a [`FakeTransport`].
pub struct FakeState {
    queue_tx: mpsc::UnboundedSender<Inbound>,
    queue_rx: StdMutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    receives: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
    sent: StdMutex<Vec<Message>>,
    fail_sends: AtomicBool,
    fail_pings: AtomicBool,
}

/// Scripted in-memory transport for property tests (back-pressure, keepalive
/// cadence) that must not depend on real sockets or wall-clock time.
#[derive(Clone)]
pub struct FakeTransport {
    pub state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(FakeState {
                queue_tx,
                queue_rx: StdMutex::new(Some(queue_rx)),
                receives: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                sent: StdMutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
                fail_pings: AtomicBool::new(false),
            }),
        }
    }

    /// Queue an inbound text frame for the receive loop to pull.
    pub fn push_text(&self, text: &str) {
        drop(
            self.state
                .queue_tx
                .send(Inbound::Message(Message::Text(text.to_owned()))),
        );
    }

    /// Queue a peer close with the given code.
    pub fn push_close(&self, code: u16) {
        drop(self.state.queue_tx.send(Inbound::Closed(Some(code))));
    }

    /// Number of `receive` calls issued by the receive loop.
    pub fn receive_requests(&self) -> usize {
        self.state.receives.load(Ordering::SeqCst)
    }

    /// Number of pings delivered (successfully or not).
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Number of close requests issued through the sink.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Data frames delivered through the sink.
    pub fn sent(&self) -> Vec<Message> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _url: &Url) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let rx = self
            .state
            .queue_rx
            .lock()
            .unwrap()
            .take()
            .expect("fake transport supports a single open per test");

        let sink = FakeSink {
            state: Arc::clone(&self.state),
        };
        let source = FakeSource {
            state: Arc::clone(&self.state),
            rx,
        };
        Ok((Box::new(sink), Box::new(source)))
    }
}

struct FakeSink {
    state: Arc<FakeState>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, message: Message) -> Result<()> {
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::send_failed("scripted send failure"));
        }
        self.state.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_pings.load(Ordering::SeqCst) {
            return Err(Error::send_failed("scripted ping failure"));
        }
        Ok(())
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeSource {
    state: Arc<FakeState>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn receive(&mut self) -> Result<Inbound> {
        self.state.receives.fetch_add(1, Ordering::SeqCst);
        match self.rx.recv().await {
            Some(inbound) => Ok(inbound),
            None => Ok(Inbound::Closed(None)),
        }
    }
}

/// URL for tests that never touch a real socket.
pub fn fake_url() -> Url {
    Url::parse("wss://example.invalid/stream").unwrap()
}

/// Let spawned tasks run under a paused or contended runtime.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Kind of a terminal error, for assertions.
pub fn kind_of(result: &socket_stream::Result<Message>) -> Option<Kind> {
    result.as_ref().err().map(Error::kind)
}
