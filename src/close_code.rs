//! Close-code descriptions for disconnect observability.
//!
//! The table maps transport-reported close codes to log-friendly
//! descriptions. Classification never affects control flow: every close path
//! converges on the same closed state regardless of code.

use phf::phf_map;

/// Close code sent when the service closes a connection itself.
pub const GOING_AWAY: u16 = 1001;

/// Close code for an orderly shutdown initiated by the peer.
pub const NORMAL_CLOSURE: u16 = 1000;

static DESCRIPTIONS: phf::Map<u16, &'static str> = phf_map! {
    1000_u16 => "normal closure",
    1001_u16 => "going away",
    1002_u16 => "protocol error",
    1003_u16 => "unsupported data",
    1005_u16 => "no status received",
    1006_u16 => "abnormal closure",
    1007_u16 => "invalid frame payload data",
    1008_u16 => "policy violation",
    1009_u16 => "message too big",
    1010_u16 => "mandatory extension missing",
    1011_u16 => "internal server error",
    1015_u16 => "TLS handshake failure",
};

/// Log-friendly description for a close code.
#[must_use]
pub fn describe(code: u16) -> &'static str {
    DESCRIPTIONS.get(&code).copied().unwrap_or("unknown close code")
}

/// Whether a peer close with this code ends the stream without an error.
#[must_use]
pub fn is_graceful(code: u16) -> bool {
    matches!(code, NORMAL_CLOSURE | GOING_AWAY)
}
