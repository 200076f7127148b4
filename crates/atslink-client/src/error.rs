//! Error taxonomy for the client.
//!
//! Mirrors the protocol's failure classes: transport, framing/crypto,
//! protocol shape, panel-reported, authentication, and supervised
//! operations. Framing failures on single unsolicited frames never reach
//! this type — the transport logs and skips them; a framing failure on a
//! response surfaces as [`ClientError::Timeout`] because the response is
//! simply never delivered.

use atslink_crypto::CryptoError;
use atslink_proto::ProtocolError;
use thiserror::Error;

/// Errors surfaced by connection, query and control operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// TCP connect failed
    #[error("connection to {addr} failed: {source}")]
    Connect {
        /// Peer address
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Socket write failed or the connection dropped
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No response within the call timeout
    #[error("timed out waiting for the panel's response")]
    Timeout,

    /// Wire-format error on a response we did receive
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key handling failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The panel answered with an error response (header 0xF0)
    #[error("panel error, code {code:02x?} (frame {frame_hex})")]
    Panel {
        /// Error bytes from the response body, verbatim
        code: Vec<u8>,
        /// Whole decrypted frame, hex-encoded for diagnostics
        frame_hex: String,
    },

    /// Session-key exchange did not produce a usable key
    #[error("key exchange failed: {reason}")]
    KeyExchange {
        /// What went wrong
        reason: String,
    },

    /// Login was answered but not accepted
    #[error("login rejected with status {status:#04x}")]
    LoginRejected {
        /// Status byte from the login reply
        status: u8,
    },

    /// A response parsed but did not have the expected shape
    #[error("malformed {operation} response: {reason}")]
    MalformedResponse {
        /// Operation whose reply was malformed
        operation: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The panel refused a control verb (boolean response false or door
    /// error reply)
    #[error("panel refused to {verb} {kind} {id}")]
    VerbRefused {
        /// Verb that was attempted
        verb: &'static str,
        /// Entity kind label
        kind: &'static str,
        /// Entity number
        id: u16,
    },

    /// Creating a control session failed before the verb was attempted
    #[error("could not create a control session: {reason}")]
    ControlSession {
        /// What went wrong
        reason: String,
    },

    /// The operation was cancelled from outside
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the operation could plausibly succeed.
    ///
    /// Timeouts and transport hiccups are transient; protocol violations
    /// and rejections are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_))
    }
}
