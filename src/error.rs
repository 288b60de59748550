use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use crate::close_code;

/// Coarse classification of stream-service failures.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The transport could not be opened
    ConnectionFailed,
    /// A transport-level receive failed, including remote closes with error codes
    ReceiveFailed,
    /// A send or keepalive ping failed; treated as connection loss
    SendFailed,
    /// A send was attempted while no connection was open
    NotConnected,
}

/// Error type for all fallible stream-service operations.
///
/// Carries a [`Kind`] for coarse matching and an optional boxed source with
/// the transport-level detail. Terminal errors also reach the consumer
/// through the message sequence itself; see the crate docs.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    /// Error for a connection attempt that could not be opened.
    #[must_use]
    pub fn connect_failed<S: Into<String>>(url: S) -> Self {
        ConnectFailed { url: url.into() }.into()
    }

    /// Error summarizing a transport send that failed.
    #[must_use]
    pub fn send_failed<S: Into<String>>(detail: S) -> Self {
        SendFailed {
            detail: detail.into(),
        }
        .into()
    }

    pub(crate) fn not_connected() -> Self {
        NotConnected.into()
    }

    pub(crate) fn closed_by_peer(code: Option<u16>) -> Self {
        ClosedByPeer { code }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// A connection attempt that did not produce an open transport.
#[non_exhaustive]
#[derive(Debug)]
pub struct ConnectFailed {
    pub url: String,
}

impl fmt::Display for ConnectFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to open connection to {}", self.url)
    }
}

impl StdError for ConnectFailed {}

impl From<ConnectFailed> for Error {
    fn from(err: ConnectFailed) -> Self {
        Error::with_source(Kind::ConnectionFailed, err)
    }
}

/// A transport send that failed after the connection was open.
#[non_exhaustive]
#[derive(Debug)]
pub struct SendFailed {
    pub detail: String,
}

impl fmt::Display for SendFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport send failed: {}", self.detail)
    }
}

impl StdError for SendFailed {}

impl From<SendFailed> for Error {
    fn from(err: SendFailed) -> Self {
        Error::with_source(Kind::SendFailed, err)
    }
}

/// A send was attempted while no connection was open.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotConnected;

impl fmt::Display for NotConnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket is not open; call start before sending")
    }
}

impl StdError for NotConnected {}

impl From<NotConnected> for Error {
    fn from(err: NotConnected) -> Self {
        Error::with_source(Kind::NotConnected, err)
    }
}

/// The peer closed the connection with a non-graceful close code.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ClosedByPeer {
    /// Close code reported by the transport, if any
    pub code: Option<u16>,
}

impl fmt::Display for ClosedByPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(
                f,
                "connection closed by peer: {} (code {code})",
                close_code::describe(code)
            ),
            None => write!(f, "connection closed by peer without a status code"),
        }
    }
}

impl StdError for ClosedByPeer {}

impl From<ClosedByPeer> for Error {
    fn from(err: ClosedByPeer) -> Self {
        Error::with_source(Kind::ReceiveFailed, err)
    }
}
