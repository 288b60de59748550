use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::keepalive::{self, SharedSink};
use crate::close_code::{self, GOING_AWAY};
use crate::error::Error;
use crate::lifecycle::{LifecycleEvent, LifecycleEvents};
use crate::transport::{FrameSource, Inbound, Transport, WsTransport};
use crate::types::Message;
use crate::Result;

/// Capacity of the pending-message slot. One slot gives structural
/// back-pressure: the receive loop pulls the next frame only after the
/// previous message has been accepted.
const PENDING_SLOT: usize = 1;

/// Connection lifecycle states.
///
/// `Closed` is reachable from any state on cancel or a fatal error.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been started
    Idle,
    /// A connection attempt is in flight
    Connecting,
    /// Connected; messages flow and keepalive runs
    Open,
    /// Close requested, transport shutting down
    Closing,
    /// Terminal for the current handle; a new `start` leaves it
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

type Hook = Box<dyn Fn() + Send + Sync + 'static>;
type FatalSlot = Arc<StdMutex<Option<Error>>>;

/// Long-lived WebSocket client exposing a single-consumer message sequence
/// with automatic keepalive and lifecycle-driven reconnection.
///
/// One connection handle is current at a time; `start` replaces it and
/// parks a brand-new message sequence for the consumer to claim with
/// [`messages`](Self::messages). The sequence terminates exactly once, either
/// with a fatal transport error (yielded last) or with no error after
/// [`cancel`], and is never restartable; reconnecting produces a fresh
/// sequence.
///
/// [`cancel`]: Self::cancel
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use socket_stream::{Message, SocketStream};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let url = url::Url::parse("wss://socketsbay.com/wss/v2/1/demo/")?;
///     let stream = SocketStream::connect(url).await?;
///     stream.on_connected(|| println!("connected"));
///
///     stream.send_text("ping-test").await?;
///
///     let mut messages = stream.messages().expect("sequence already claimed");
///     while let Some(message) = messages.next().await {
///         match message? {
///             Message::Text(text) => println!("{text}"),
///             Message::Binary(data) => println!("{} bytes", data.len()),
///             _ => {}
///         }
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SocketStream {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: Config,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Kept so the state channel stays open without external subscribers
    _state_rx: watch::Receiver<ConnectionState>,
    /// Current connection handle; exactly one at a time
    active: Mutex<Option<Active>>,
    /// Receiver of the current sequence, parked until the consumer claims it
    sequence: StdMutex<Option<mpsc::Receiver<Result<Message>>>>,
    /// Close code most recently reported by the peer
    last_close_code: StdMutex<Option<u16>>,
    on_connected: StdMutex<Option<Hook>>,
    on_disconnected: StdMutex<Option<Hook>>,
}

/// One active transport binding. Replaced, never mutated, on reconnect.
struct Active {
    url: Url,
    sink: SharedSink,
    /// Scopes the receive loop and keepalive task to this handle
    token: CancellationToken,
    /// Terminal error for the sequence, set before cancelling the token
    fatal: FatalSlot,
}

impl SocketStream {
    /// Creates an idle service using the production WebSocket transport.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_transport(Arc::new(WsTransport), config)
    }

    /// Creates an idle service over a custom transport binding.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, config: Config) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                _state_rx: state_rx,
                active: Mutex::new(None),
                sequence: StdMutex::new(None),
                last_close_code: StdMutex::new(None),
                on_connected: StdMutex::new(None),
                on_disconnected: StdMutex::new(None),
            }),
        }
    }

    /// Creates a service with default configuration and connects immediately.
    pub async fn connect(url: Url) -> Result<Self> {
        let stream = Self::new(Config::default());
        stream.start(url).await?;
        Ok(stream)
    }

    /// Opens a connection to `url`, spawning the receive loop and keepalive
    /// scheduler and parking a fresh message sequence.
    ///
    /// Calling while a connection is already open closes the prior handle
    /// first; its sequence ends without an error.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::ConnectionFailed`](crate::error::Kind::ConnectionFailed) error when the transport cannot
    /// be opened. The parked sequence for the failed attempt yields a
    /// matching error to any consumer that claims it.
    pub async fn start(&self, url: Url) -> Result<()> {
        Inner::start(&self.inner, url).await
    }

    /// Gracefully closes the current connection with a "going away" code.
    ///
    /// Stops the keepalive scheduler, interrupts an in-flight receive, and
    /// completes the message sequence without an error. Idempotent: calling
    /// again (or while never connected) is a no-op.
    pub async fn cancel(&self) {
        Inner::shutdown(&self.inner, None).await;
    }

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// [`Kind::NotConnected`](crate::error::Kind::NotConnected) when no connection is open (nothing reaches
    /// the transport). A transport-level failure returns
    /// [`Kind::SendFailed`](crate::error::Kind::SendFailed) and terminates the message sequence with the
    /// underlying error.
    pub async fn send_text<S: Into<String>>(&self, text: S) -> Result<()> {
        Inner::send(&self.inner, Message::Text(text.into())).await
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// Same contract as [`send_text`](Self::send_text).
    pub async fn send_binary<B: Into<Bytes>>(&self, data: B) -> Result<()> {
        Inner::send(&self.inner, Message::Binary(data.into())).await
    }

    /// Claims the message sequence of the current connection.
    ///
    /// Returns `None` when no sequence is available: `start` was never
    /// called, or the sequence was already claimed. Each successful `start`
    /// parks exactly one new sequence.
    #[must_use]
    pub fn messages(&self) -> Option<MessageStream> {
        self.inner
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|rx| MessageStream { rx, done: false })
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Close code most recently reported by the peer, if any. Reset on each
    /// new connection.
    #[must_use]
    pub fn last_close_code(&self) -> Option<u16> {
        *self
            .inner
            .last_close_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a hook fired once per successful connect.
    pub fn on_connected<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self
            .inner
            .on_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Registers a hook fired once per disconnect, whatever the cause.
    pub fn on_disconnected<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self
            .inner
            .on_disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    /// Reacts to background/foreground transitions from `events`.
    ///
    /// Entering the background cancels the current connection; returning to
    /// the foreground starts a new one (with a new message sequence) at the
    /// URL carried by the event. The subscription task exits when the
    /// service or the publisher is dropped.
    pub fn watch_lifecycle(&self, events: &LifecycleEvents) {
        let mut rx = events.subscribe();
        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "lifecycle events lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };

                match event {
                    LifecycleEvent::EnteredBackground => {
                        tracing::info!("entered background, releasing socket");
                        Inner::shutdown(&inner, None).await;
                    }
                    LifecycleEvent::EnteredForeground(url) => {
                        tracing::info!(url = %url, "entered foreground, reconnecting");
                        if let Err(e) = Inner::start(&inner, url).await {
                            tracing::warn!(error = %e, "reconnect on foreground failed");
                        }
                    }
                }
            }
        });
    }
}

impl Inner {
    async fn start(inner: &Arc<Self>, url: Url) -> Result<()> {
        let mut active = inner.active.lock().await;

        // A live handle is closed before the replacement opens.
        let had_prior = match active.take() {
            Some(prior) => {
                inner.teardown(prior, None).await;
                true
            }
            None => false,
        };

        // Fresh sequence for this attempt, parked for the consumer.
        let (tx, rx) = mpsc::channel(PENDING_SLOT);
        *inner
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(rx);

        _ = inner.state_tx.send(ConnectionState::Connecting);
        tracing::debug!(url = %url, "connecting");

        match inner.transport.open(&url).await {
            Ok((sink, source)) => {
                let sink: SharedSink = Arc::new(Mutex::new(sink));
                let token = CancellationToken::new();
                let fatal: FatalSlot = Arc::new(StdMutex::new(None));

                *inner
                    .last_close_code
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;

                tokio::spawn(receive_loop(
                    Arc::downgrade(inner),
                    source,
                    tx,
                    token.clone(),
                    Arc::clone(&fatal),
                    url.clone(),
                ));

                {
                    let sink = Arc::clone(&sink);
                    let token = token.clone();
                    let weak = Arc::downgrade(inner);
                    let period = inner.config.keepalive_interval;
                    tokio::spawn(async move {
                        if let Some(err) = keepalive::run(sink, period, token).await
                            && let Some(inner) = weak.upgrade()
                        {
                            Inner::shutdown(&inner, Some(err)).await;
                        }
                    });
                }

                *active = Some(Active {
                    url: url.clone(),
                    sink,
                    token,
                    fatal,
                });
                _ = inner.state_tx.send(ConnectionState::Open);
                drop(active);

                tracing::info!(url = %url, "connected");
                if had_prior {
                    inner.notify(&inner.on_disconnected);
                }
                inner.notify(&inner.on_connected);
                Ok(())
            }
            Err(e) => {
                _ = inner.state_tx.send(ConnectionState::Closed);
                drop(active);

                tracing::warn!(url = %url, error = %e, "unable to open connection");
                // Surface the failure to whichever consumer claims this
                // attempt's sequence; `tx` drops right after, ending it.
                _ = tx.try_send(Err(Error::connect_failed(url.as_str())));
                if had_prior {
                    inner.notify(&inner.on_disconnected);
                }
                Err(e)
            }
        }
    }

    /// Idempotent transition to `Closed`. The terminal `error`, if any, is
    /// forwarded into the sequence by the receive loop.
    async fn shutdown(inner: &Arc<Self>, error: Option<Error>) {
        let mut active = inner.active.lock().await;
        let Some(handle) = active.take() else {
            return;
        };
        inner.teardown(handle, error).await;
        drop(active);

        inner.notify(&inner.on_disconnected);
    }

    /// Closes the handle's transport and stops its tasks. Callers fire the
    /// disconnect notification after releasing the handle lock.
    async fn teardown(&self, handle: Active, error: Option<Error>) {
        _ = self.state_tx.send(ConnectionState::Closing);

        if let Some(err) = error {
            *handle
                .fatal
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(err);
        }
        // Stops the keepalive scheduler and interrupts an in-flight receive.
        handle.token.cancel();

        if let Err(e) = handle
            .sink
            .lock()
            .await
            .close(GOING_AWAY, "going away")
            .await
        {
            tracing::debug!(url = %handle.url, error = %e, "close frame not delivered");
        }

        _ = self.state_tx.send(ConnectionState::Closed);
        tracing::info!(url = %handle.url, "disconnected");
    }

    async fn send(inner: &Arc<Self>, message: Message) -> Result<()> {
        let (sink, url) = {
            let active = inner.active.lock().await;
            match active.as_ref() {
                Some(handle) if inner.state_tx.borrow().is_open() => {
                    (Arc::clone(&handle.sink), handle.url.clone())
                }
                _ => return Err(Error::not_connected()),
            }
        };

        let kind = message.frame_kind();
        let bytes = message.len();
        let result = { sink.lock().await.send(message).await };

        match result {
            Ok(()) => {
                tracing::trace!(url = %url, direction = "sent", kind, bytes);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "send failed");
                let summary = Error::send_failed(e.to_string());
                // A broken send channel means a broken connection: the
                // original error terminates the sequence.
                Self::shutdown(inner, Some(e)).await;
                Err(summary)
            }
        }
    }

    fn notify(&self, hook: &StdMutex<Option<Hook>>) {
        if let Some(hook) = hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            hook();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Tasks must not outlive the handle they were spawned for.
        if let Some(handle) = self.active.get_mut().take() {
            handle.token.cancel();
        }
    }
}

/// How the frame pump stopped.
enum LoopExit {
    /// The handle's token was cancelled (user cancel or fatal shutdown)
    Cancelled,
    /// The consumer dropped its sequence
    ConsumerGone,
    /// The peer closed the connection
    RemoteClosed(Option<u16>),
    /// A transport receive failed
    Failed(Error),
}

/// Receive loop: pulls frames one at a time and publishes them into the
/// pending slot. One task per connection handle.
async fn receive_loop(
    inner: Weak<Inner>,
    mut source: Box<dyn FrameSource>,
    tx: mpsc::Sender<Result<Message>>,
    token: CancellationToken,
    fatal: FatalSlot,
    url: Url,
) {
    let exit = pump(&mut source, &tx, &token, &url).await;
    // Release the read half before resolving the sequence; the consumer may
    // never pull the terminal value.
    drop(source);

    let cancelled = matches!(exit, LoopExit::Cancelled);
    let terminal = match exit {
        LoopExit::Cancelled => fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(),
        LoopExit::ConsumerGone => None,
        LoopExit::RemoteClosed(code) => {
            if let Some(inner) = inner.upgrade() {
                *inner
                    .last_close_code
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = code;
            }
            match code {
                Some(c) if !close_code::is_graceful(c) => Some(Error::closed_by_peer(Some(c))),
                _ => None,
            }
        }
        LoopExit::Failed(e) => Some(e),
    };

    // When the loop ended on its own, drive the service to Closed. A
    // cancelled loop means shutdown already ran.
    if !cancelled && let Some(inner) = inner.upgrade() {
        Inner::shutdown(&inner, None).await;
    }

    if let Some(err) = terminal {
        tracing::warn!(url = %url, error = %err, "stream terminated");
        _ = tx.send(Err(err)).await;
    }
    // `tx` drops here; the sequence completes.
}

async fn pump(
    source: &mut Box<dyn FrameSource>,
    tx: &mpsc::Sender<Result<Message>>,
    token: &CancellationToken,
    url: &Url,
) -> LoopExit {
    loop {
        let inbound = tokio::select! {
            biased;
            () = token.cancelled() => return LoopExit::Cancelled,
            inbound = source.receive() => inbound,
        };

        match inbound {
            Ok(Inbound::Message(message)) => {
                tracing::trace!(
                    url = %url,
                    direction = "received",
                    kind = message.frame_kind(),
                    bytes = message.len(),
                );
                // Publishing suspends this loop, not the consumer, until the
                // prior message has been taken.
                tokio::select! {
                    biased;
                    () = token.cancelled() => return LoopExit::Cancelled,
                    sent = tx.send(Ok(message)) => {
                        if sent.is_err() {
                            return LoopExit::ConsumerGone;
                        }
                    }
                }
            }
            Ok(Inbound::Closed(code)) => {
                match code {
                    Some(c) => tracing::info!(
                        url = %url,
                        code = c,
                        reason = close_code::describe(c),
                        "peer closed connection",
                    ),
                    None => {
                        tracing::info!(url = %url, "peer closed connection without a status code");
                    }
                }
                return LoopExit::RemoteClosed(code);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "receive failed");
                return LoopExit::Failed(e);
            }
        }
    }
}

/// Single-consumer sequence of inbound messages.
///
/// Yields messages in exact frame-arrival order and terminates permanently
/// after yielding a terminal error, or with no error after a graceful close.
/// Claim a new one via [`SocketStream::messages`] after reconnecting.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
    done: bool,
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_err() {
                    // Terminal: the sequence never yields past an error.
                    this.done = true;
                    this.rx.close();
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
