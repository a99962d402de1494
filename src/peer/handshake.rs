//! The BitTorrent peer handshake.
//!
//! The handshake is the first exchange between two peers. It verifies both
//! sides speak the same protocol and are after the same torrent (via the
//! info hash), and surfaces the remote peer's id.
use super::PeerError;
use super::PeerResult;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::instrument;

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LENGTH: usize = 68;

/** A handshake message, fixed at 68 bytes on the wire:

- 1 byte: protocol string length (19)
- 19 bytes: "BitTorrent protocol"
- 8 bytes: reserved, all zero (no extensions)
- 20 bytes: info hash
- 20 bytes: peer id */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes the handshake into its 68-byte wire form.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; HANDSHAKE_LENGTH] {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        // bytes 20..28 stay zero: reserved
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and validates a peer's handshake from the stream.
    ///
    /// Reads exactly 68 bytes; a short read surfaces as an I/O error, a
    /// wrong protocol length or string as
    /// [`PeerError::HandshakeInvalidProtocol`]. The info hash is not checked
    /// here; callers compare it against their torrent with [`Self::validate`].
    #[instrument(level = "trace", skip(stream))]
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> PeerResult<Self> {
        let mut buf = [0u8; HANDSHAKE_LENGTH];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    /// Parses a 68-byte handshake buffer.
    pub fn parse(buf: &[u8; HANDSHAKE_LENGTH]) -> PeerResult<Self> {
        if buf[0] as usize != PROTOCOL.len() || &buf[1..20] != PROTOCOL {
            return Err(PeerError::HandshakeInvalidProtocol);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Checks that the peer is advertising the torrent we asked for.
    pub fn validate(&self, expected_info_hash: &[u8; 20]) -> PeerResult<()> {
        if &self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeInfoHashMismatch);
        }
        Ok(())
    }
}
