//! Tracker client logic for the BitTorrent protocol.
//!
//! Implements the HTTP announce round-trip: building the query (with the
//! raw info hash percent-encoded byte-by-byte), issuing the GET, and parsing
//! the bencoded response into a peer list. Handles both the compact 6-byte
//! peer records and the dictionary form.
use crate::torrent::file::TorrentFile;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker returned HTTP status {0}")]
    Failure(u16),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker response is not bencoded: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error("tracker response has no peers")]
    NoPeers,

    #[error("announce URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A client communicating with a BitTorrent tracker. Owns the peer id for
/// the lifetime of the process.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// A peer endpoint received from the tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The parsed response from a tracker announce.
#[derive(Debug)]
pub struct AnnounceResponse {
    /// Seconds the tracker asks us to wait between announces. Parsed but
    /// unused: periodic re-announce is out of scope.
    pub interval: i64,
    pub min_interval: Option<i64>,
    /// Seeder count, when the tracker reports it.
    pub complete: Option<i64>,
    /// Leecher count, when the tracker reports it.
    pub incomplete: Option<i64>,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default, rename = "min interval")]
    min_interval: Option<i64>,
    #[serde(default)]
    complete: Option<i64>,
    #[serde(default)]
    incomplete: Option<i64>,
    peers: Option<Peers>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(#[serde(with = "serde_bytes")] Vec<u8>),
    NonCompact(Vec<PeerDict>),
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Self {
            peer_id: generate_peer_id(),
            port,
        }
    }

    /// The 20-byte peer id advertised to the tracker and in handshakes.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker to get a list of peers.
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(&self, torrent: &TorrentFile) -> TrackerResult<AnnounceResponse> {
        let url = build_announce_url(
            &torrent.announce,
            &torrent.info_hash,
            &self.peer_id,
            self.port,
            torrent.total_length(),
        )?;
        tracing::debug!(%url, "making announce request to tracker");

        let response = reqwest::get(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::Failure(status.as_u16()));
        }
        let response_bytes = response.bytes().await?;
        parse_announce_response(&response_bytes)
    }
}

/// Builds the announce URL.
///
/// `info_hash` and `peer_id` are raw bytes and must be percent-encoded
/// directly; feeding them through a generic query builder would encode the
/// percent signs a second time and the tracker would see the wrong hash.
fn build_announce_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: i64,
) -> TrackerResult<Url> {
    let mut url = Url::parse(announce)?;
    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        url_encode(info_hash),
        url_encode(peer_id),
        port,
        left,
    );
    url.set_query(Some(&query));
    Ok(url)
}

/// Parses the bencoded body of a tracker announce response.
///
/// The `peers` field comes in two shapes:
/// - **Compact**: a byte string of 6-byte records, 4 IPv4 octets followed by
///   a big-endian port.
/// - **Non-compact**: a list of dictionaries with `ip` and `port`.
///
/// A response without `peers` at all is a tracker failure.
fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
    let tracker_response: TrackerResponse = serde_bencode::from_bytes(bytes)?;

    let peers = match tracker_response.peers.ok_or(TrackerError::NoPeers)? {
        Peers::Compact(bytes) => bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                Peer {
                    ip: IpAddr::V4(ip),
                    port,
                }
            })
            .collect(),
        Peers::NonCompact(dicts) => dicts
            .into_iter()
            .filter_map(|dict| {
                dict.ip.parse::<IpAddr>().ok().map(|ip| Peer {
                    ip,
                    port: dict.port,
                })
            })
            .collect(),
    };

    Ok(AnnounceResponse {
        interval: tracker_response.interval,
        min_interval: tracker_response.min_interval,
        complete: tracker_response.complete,
        incomplete: tracker_response.incomplete,
        peers,
    })
}

/// Generates the client's peer id: the `-SG0001-` prefix followed by 12
/// random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-SG0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// Percent-encodes a byte slice per RFC 3986.
///
/// Unreserved characters (a-z, A-Z, 0-9, `-`, `.`, `_`, `~`) pass through;
/// every other byte becomes `%XX`.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}
