//! A single peer connection and its warm-up state machine.
//!
//! Construction performs the handshake and, unless the caller only wants the
//! handshake, the bitfield / interested / unchoke warm-up. After that the
//! connection can fetch batches of blocks. Dropping the connection closes
//! the socket on every exit path; any protocol surprise marks it poisoned so
//! it cannot be used for further requests.
use super::handshake::Handshake;
use super::message::{Message, MessageCodec, Piece, Request};
use super::PeerError;
use super::PeerResult;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::instrument;

/// Socket read timeout. A peer that stays silent this long is treated as
/// dead and the worker holding the connection exits.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PeerConnection {
    frames: Framed<TcpStream, MessageCodec>,
    peer_handshake: Handshake,
    ready: bool,
}

impl PeerConnection {
    /// Connects, handshakes, and stops there.
    ///
    /// Used by the `handshake` command; the connection is not ready for
    /// block requests.
    pub async fn handshake_only(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Self> {
        Self::establish(addr, info_hash, peer_id, true).await
    }

    /// Connects, handshakes and warms the peer up until it unchokes us.
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Self> {
        Self::establish(addr, info_hash, peer_id, false).await
    }

    async fn establish(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        handshake_only: bool,
    ) -> PeerResult<Self> {
        let mut stream = TcpStream::connect(addr).await?;

        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;
        let peer_handshake = match timeout(READ_TIMEOUT, Handshake::read(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => return Err(PeerError::Timeout),
        };
        peer_handshake.validate(&info_hash)?;

        let mut connection = Self {
            frames: Framed::new(stream, MessageCodec),
            peer_handshake,
            ready: false,
        };
        if handshake_only {
            return Ok(connection);
        }

        connection.warm_up().await?;
        connection.ready = true;
        Ok(connection)
    }

    /// The id the peer sent in its handshake.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_handshake.peer_id
    }

    /// Bitfield, interested, then wait for unchoke.
    ///
    /// `Have` and keep-alive are tolerated while waiting; anything else,
    /// including a second bitfield, is a protocol error.
    async fn warm_up(&mut self) -> PeerResult<()> {
        match self.recv().await? {
            Message::Bitfield(_) => {}
            other => return Err(PeerError::Unexpected(other.name())),
        }

        self.frames.send(Message::Interested).await?;

        loop {
            match self.recv().await? {
                Message::Unchoke => return Ok(()),
                Message::KeepAlive | Message::Have(_) => continue,
                other => return Err(PeerError::Unexpected(other.name())),
            }
        }
    }

    /// Sends a batch of requests back-to-back and reads the matching
    /// `Piece` messages.
    ///
    /// The peer protocol lets a peer answer pipelined requests out of
    /// order, so responses are matched against the outstanding set by
    /// `(index, begin)` rather than position. Blocks come back sorted by
    /// `begin`. Any unexpected message, or a block we never asked for,
    /// poisons the connection.
    #[instrument(level = "trace", skip(self, requests))]
    pub async fn fetch_blocks(&mut self, requests: &[Request]) -> PeerResult<Vec<Piece>> {
        if !self.ready {
            return Err(PeerError::NotReady);
        }

        for request in requests {
            self.frames.feed(Message::Request(request.clone())).await?;
        }
        self.frames.flush().await?;

        let mut outstanding: HashMap<(u32, u32), u32> = requests
            .iter()
            .map(|r| ((r.index, r.begin), r.length))
            .collect();

        let mut blocks = Vec::with_capacity(requests.len());
        while blocks.len() < requests.len() {
            match self.recv().await? {
                Message::Piece(piece) => {
                    match outstanding.remove(&(piece.index, piece.begin)) {
                        Some(length) if piece.block.len() == length as usize => {
                            blocks.push(piece);
                        }
                        _ => {
                            self.ready = false;
                            return Err(PeerError::Unexpected("piece we did not request"));
                        }
                    }
                }
                Message::KeepAlive | Message::Have(_) => continue,
                other => {
                    self.ready = false;
                    return Err(PeerError::Unexpected(other.name()));
                }
            }
        }

        blocks.sort_by_key(|piece| piece.begin);
        Ok(blocks)
    }

    async fn recv(&mut self) -> PeerResult<Message> {
        match timeout(READ_TIMEOUT, self.frames.next()).await {
            Err(_) => {
                self.ready = false;
                Err(PeerError::Timeout)
            }
            Ok(None) => {
                self.ready = false;
                Err(PeerError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )))
            }
            Ok(Some(result)) => result.map_err(|e| {
                self.ready = false;
                e
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::testing;
    use crate::BLOCK_SIZE;
    use sha1::{Digest, Sha1};

    const INFO_HASH: [u8; 20] = [0xAB; 20];
    const PEER_ID: [u8; 20] = *b"-SG0001-testtesttest";

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn handshake_only_returns_peer_id() {
        let addr = testing::spawn_seeder(test_data(64), 64, INFO_HASH, false).await;
        let connection = PeerConnection::handshake_only(addr, INFO_HASH, PEER_ID)
            .await
            .unwrap();
        assert_eq!(connection.peer_id(), testing::SEEDER_PEER_ID);
    }

    #[tokio::test]
    async fn handshake_is_idempotent() {
        let addr = testing::spawn_seeder(test_data(64), 64, INFO_HASH, false).await;
        let first = PeerConnection::handshake_only(addr, INFO_HASH, PEER_ID)
            .await
            .unwrap();
        let second = PeerConnection::handshake_only(addr, INFO_HASH, PEER_ID)
            .await
            .unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }

    #[tokio::test]
    async fn rejects_info_hash_mismatch() {
        let addr = testing::spawn_seeder(test_data(64), 64, [0xCD; 20], false).await;
        // The seeder echoes its own torrent's hash, which is not ours.
        assert!(matches!(
            PeerConnection::handshake_only(addr, INFO_HASH, PEER_ID).await,
            Err(PeerError::HandshakeInfoHashMismatch)
        ));
    }

    #[tokio::test]
    async fn fetches_blocks_across_batches() {
        let data = test_data(BLOCK_SIZE * 2 + 100);
        let addr = testing::spawn_seeder(data.clone(), data.len(), INFO_HASH, false).await;
        let mut connection = PeerConnection::connect(addr, INFO_HASH, PEER_ID)
            .await
            .unwrap();

        let requests = vec![
            Request::new(0, 0, BLOCK_SIZE as u32),
            Request::new(0, BLOCK_SIZE as u32, BLOCK_SIZE as u32),
            Request::new(0, (BLOCK_SIZE * 2) as u32, 100),
        ];
        let blocks = connection.fetch_blocks(&requests).await.unwrap();

        assert_eq!(blocks.len(), 3);
        let assembled: Vec<u8> = blocks.iter().flat_map(|p| p.block.clone()).collect();
        assert_eq!(Sha1::digest(&assembled), Sha1::digest(&data));
    }

    #[tokio::test]
    async fn connect_fails_against_a_dead_peer() {
        let addr = testing::spawn_dead_peer().await;
        assert!(PeerConnection::connect(addr, INFO_HASH, PEER_ID)
            .await
            .is_err());
    }
}
