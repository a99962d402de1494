//! Loopback fake peers for protocol and scheduler tests.
//!
//! A seeder accepts any number of connections and plays the server side of
//! the wire protocol: handshake echo (with its own torrent's info hash),
//! bitfield, unchoke on interested, and block service straight out of an
//! in-memory buffer. The corrupting variant flips a byte in every block it
//! serves, for exercising hash verification and requeue paths.
use crate::peer::handshake::{Handshake, HANDSHAKE_LENGTH};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const SEEDER_PEER_ID: [u8; 20] = *b"-SEED01-aaaaaaaaaaaa";

/// Starts a seeder for `data` and returns its address.
///
/// `piece_length` maps `(index, begin)` to offsets in `data`. When
/// `corrupt` is set every served block has its first byte flipped.
pub async fn spawn_seeder(
    data: Vec<u8>,
    piece_length: usize,
    info_hash: [u8; 20],
    corrupt: bool,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let data = data.clone();
            tokio::spawn(async move {
                let _ = serve(stream, data, piece_length, info_hash, corrupt).await;
            });
        }
    });
    addr
}

/// A peer that accepts the TCP connection and immediately hangs up.
pub async fn spawn_dead_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            drop(stream);
        }
    });
    addr
}

async fn serve(
    mut stream: TcpStream,
    data: Vec<u8>,
    piece_length: usize,
    info_hash: [u8; 20],
    corrupt: bool,
) -> std::io::Result<()> {
    // Handshake: read theirs, answer with ours.
    let mut buf = [0u8; HANDSHAKE_LENGTH];
    stream.read_exact(&mut buf).await?;
    stream
        .write_all(&Handshake::new(info_hash, SEEDER_PEER_ID).serialize())
        .await?;

    // Bitfield claiming every piece.
    stream.write_all(&[0, 0, 0, 2, 5, 0xFF]).await?;

    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(()); // client went away
        }
        let length = u32::from_be_bytes(header) as usize;
        if length == 0 {
            continue; // keep-alive
        }
        let mut frame = vec![0u8; length];
        stream.read_exact(&mut frame).await?;

        match frame[0] {
            // interested -> unchoke
            2 => stream.write_all(&[0, 0, 0, 1, 1]).await?,
            // request -> piece
            6 => {
                let index = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                let begin = u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]);
                let block_len =
                    u32::from_be_bytes([frame[9], frame[10], frame[11], frame[12]]) as usize;

                let offset = index as usize * piece_length + begin as usize;
                let mut block = data[offset..offset + block_len].to_vec();
                if corrupt {
                    block[0] ^= 0xFF;
                }

                let mut reply = Vec::with_capacity(13 + block.len());
                reply.extend_from_slice(&(9 + block.len() as u32).to_be_bytes());
                reply.push(7);
                reply.extend_from_slice(&index.to_be_bytes());
                reply.extend_from_slice(&begin.to_be_bytes());
                reply.extend_from_slice(&block);
                stream.write_all(&reply).await?;
            }
            _ => {} // anything else is ignored
        }
    }
}
