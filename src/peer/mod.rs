//! Peer wire protocol.
//!
//! Everything that talks to a single peer over TCP: the 68-byte handshake,
//! the length-prefixed message framing, and the connection state machine
//! that warms a peer up (bitfield, interested, unchoke) and fetches blocks.
use thiserror::Error;

pub mod connection;
pub mod handshake;
pub mod message;

#[cfg(test)]
pub mod testing;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: invalid protocol identifier")]
    HandshakeInvalidProtocol,

    #[error("handshake failed: info hash mismatch")]
    HandshakeInfoHashMismatch,

    #[error("peer timed out")]
    Timeout,

    #[error("unknown message id: {0}")]
    UnknownMessage(u8),

    #[error("malformed {0} payload")]
    MalformedMessage(&'static str),

    #[error("unexpected message: {0}")]
    Unexpected(&'static str),

    #[error("frame of {0} bytes exceeds the protocol maximum")]
    FrameTooLarge(usize),

    #[error("connection is not ready for block requests")]
    NotReady,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
