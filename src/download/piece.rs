//! Piece descriptors, block splitting, scratch files and the completion
//! predicate.
use crate::peer::message::Request;
use crate::torrent::file::TorrentFile;
use crate::BLOCK_SIZE;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// Everything a worker needs to fetch and verify one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceSpec {
    pub index: usize,
    /// Byte length of this piece; equals the torrent's piece length except
    /// for the final piece.
    pub length: usize,
    /// Expected SHA-1 of the assembled piece.
    pub hash: [u8; 20],
}

impl PieceSpec {
    /// Builds the descriptor for one piece, `None` when out of range.
    pub fn for_index(torrent: &TorrentFile, index: usize) -> Option<Self> {
        if index >= torrent.num_pieces() {
            return None;
        }
        Some(Self {
            index,
            length: torrent.piece_size(index) as usize,
            hash: torrent.pieces_hash[index],
        })
    }

    /// Descriptors for every piece, in index order.
    pub fn all(torrent: &TorrentFile) -> Vec<Self> {
        (0..torrent.num_pieces())
            .map(|index| Self {
                index,
                length: torrent.piece_size(index) as usize,
                hash: torrent.pieces_hash[index],
            })
            .collect()
    }

    /// Splits the piece into 16 KiB block requests, ascending by `begin`.
    /// The final block carries the remainder.
    pub fn block_requests(&self) -> Vec<Request> {
        let mut requests = Vec::with_capacity(self.length.div_ceil(BLOCK_SIZE));
        let mut begin = 0usize;
        while begin < self.length {
            let length = (self.length - begin).min(BLOCK_SIZE);
            requests.push(Request::new(self.index as u32, begin as u32, length as u32));
            begin += length;
        }
        requests
    }

    /// True when `data` is exactly this piece: right length, right SHA-1.
    pub fn matches(&self, data: &[u8]) -> bool {
        if data.len() != self.length {
            return false;
        }
        let digest: [u8; 20] = Sha1::digest(data).into();
        digest == self.hash
    }
}

/// Path of the scratch file a piece is staged in: `<output>.<index>`.
pub fn scratch_path(output: &Path, index: usize) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// The scheduler's completion predicate: the scratch file exists, has
/// exactly the piece's length, and hashes to the expected digest. A partial
/// write never passes because both size and hash are checked.
pub async fn is_complete(output: &Path, spec: &PieceSpec) -> bool {
    let path = scratch_path(output, spec.index);
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.len() == spec.length as u64 => {}
        _ => return false,
    }
    match tokio::fs::read(&path).await {
        Ok(bytes) => spec.matches(&bytes),
        Err(_) => false,
    }
}
