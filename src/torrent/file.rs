//! Torrent file structure and parsing.
//!
//! Defines [`TorrentFile`] and the helpers that turn raw `.torrent` bytes
//! into a validated model: announce URL, info dictionary, per-piece hashes
//! and the memoised info hash.
use crate::bencode::{self, BencodeValue};
use crate::torrent::info_hash;

use super::TorrentError;
use super::TorrentResult;
use std::collections::HashMap;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    /// The tracker announce URL.
    pub announce: String,
    pub info: InfoDict,
    /// SHA-1 of the canonical bencoding of the `info` dictionary, computed
    /// once at parse time.
    pub info_hash: [u8; 20],
    /// The `info.pieces` string split into 20-byte digests, one per piece.
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    /// Suggested output file name. Purely advisory.
    pub name: String,
    pub piece_length: i64,
    /// Raw concatenated piece digests; length is a multiple of 20.
    pub pieces: Vec<u8>,
    /// Present for single-file torrents. Exactly one of `length` / `files`
    /// is set in a well-formed file.
    pub length: Option<i64>,
    /// Present for multi-file torrents, which are recognised here but
    /// rejected by every download path.
    pub files: Vec<FileDict>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

/**
Splits the concatenated SHA-1 hashes out of the `pieces` string.

The `pieces` key in the `info` dictionary is one long byte string made of
20-byte SHA-1 digests, one per piece, in piece-index order. The order is
load-bearing: index `i` of the result is the expected hash of piece `i`.
*/
#[instrument(level = "trace", skip(pieces_bytes))]
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    let num_pieces = pieces_bytes.len() / 20;
    let mut hashes = Vec::with_capacity(num_pieces);
    for chunk in pieces_bytes.chunks_exact(20) {
        let mut hash_array = [0u8; 20];
        hash_array.copy_from_slice(chunk);
        hashes.push(hash_array);
    }
    Ok(hashes)
}

/**
Parses the `info` dictionary.

Extracts `name`, `piece length` and `pieces` (all required), plus the
single-file `length` or the multi-file `files` list, validating the type of
every field it touches.
*/
fn parse_info_dict(dict: &HashMap<Vec<u8>, BencodeValue>) -> TorrentResult<InfoDict> {
    let piece_length = match dict.get(b"piece length".as_slice()) {
        Some(BencodeValue::Integer(i)) => *i,
        Some(_) => return Err(TorrentError::InvalidFieldType("piece length".to_string())),
        None => return Err(TorrentError::MissingField("piece length".to_string())),
    };

    let pieces = match dict.get(b"pieces".as_slice()) {
        Some(BencodeValue::String(s)) => s.clone(),
        Some(_) => return Err(TorrentError::InvalidFieldType("pieces".to_string())),
        None => return Err(TorrentError::MissingField("pieces".to_string())),
    };

    let name = match dict.get(b"name".as_slice()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::InvalidFormat(format!("name is not UTF-8: {}", e)))?,
        Some(_) => return Err(TorrentError::InvalidFieldType("name".to_string())),
        None => return Err(TorrentError::MissingField("name".to_string())),
    };

    let length = match dict.get(b"length".as_slice()) {
        Some(BencodeValue::Integer(i)) => Some(*i),
        Some(_) => return Err(TorrentError::InvalidFieldType("length".to_string())),
        None => None,
    };

    let files = match dict.get(b"files".as_slice()) {
        Some(BencodeValue::List(list)) => {
            let mut files_vec = Vec::new();
            for file_val in list {
                let BencodeValue::Dict(file_dict) = file_val else {
                    return Err(TorrentError::InvalidFieldType("files entry".to_string()));
                };
                let file_length = match file_dict.get(b"length".as_slice()) {
                    Some(BencodeValue::Integer(i)) => *i,
                    _ => return Err(TorrentError::MissingField("file length".to_string())),
                };
                let path = match file_dict.get(b"path".as_slice()) {
                    Some(BencodeValue::List(path_list)) => {
                        let mut components = Vec::new();
                        for component in path_list {
                            let BencodeValue::String(s) = component else {
                                return Err(TorrentError::InvalidFieldType(
                                    "file path component".to_string(),
                                ));
                            };
                            components.push(String::from_utf8(s.clone()).map_err(|e| {
                                TorrentError::InvalidFormat(format!(
                                    "file path is not UTF-8: {}",
                                    e
                                ))
                            })?);
                        }
                        components
                    }
                    _ => return Err(TorrentError::MissingField("file path".to_string())),
                };
                files_vec.push(FileDict {
                    length: file_length,
                    path,
                });
            }
            files_vec
        }
        Some(_) => return Err(TorrentError::InvalidFieldType("files".to_string())),
        None => Vec::new(),
    };

    if length.is_none() && files.is_empty() {
        return Err(TorrentError::MissingField("length or files".to_string()));
    }

    Ok(InfoDict {
        name,
        piece_length,
        pieces,
        length,
        files,
    })
}

impl TorrentFile {
    /// Reads and parses a `.torrent` file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> TorrentResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Parses torrent file bytes.
    ///
    /// Decodes the outer dictionary, requires `announce` and `info`, splits
    /// the piece hashes and computes the info hash over the canonical
    /// re-encoding of `info`.
    #[instrument(level = "debug", skip(bytes))]
    pub fn from_bytes(bytes: &[u8]) -> TorrentResult<Self> {
        let decoded = bencode::decode_bytes(bytes)?;
        let BencodeValue::Dict(root) = decoded else {
            return Err(TorrentError::InvalidFormat(
                "torrent file is not a dictionary".to_string(),
            ));
        };

        let announce = match root.get(b"announce".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
                .map_err(|e| TorrentError::InvalidFormat(format!("announce is not UTF-8: {}", e)))?,
            Some(_) => return Err(TorrentError::InvalidFieldType("announce".to_string())),
            None => return Err(TorrentError::MissingField("announce".to_string())),
        };

        let info_dict = match root.get(b"info".as_slice()) {
            Some(BencodeValue::Dict(d)) => d,
            Some(_) => return Err(TorrentError::InvalidFieldType("info".to_string())),
            None => return Err(TorrentError::MissingField("info".to_string())),
        };

        let info_hash = info_hash::calculate_info_hash(info_dict)?;
        let info = parse_info_dict(info_dict)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(TorrentFile {
            announce,
            info,
            info_hash,
            pieces_hash,
        })
    }

    /// Returns the total length of all payload bytes in the torrent.
    pub fn total_length(&self) -> i64 {
        match self.info.length {
            Some(length) => length,
            None => self.info.files.iter().map(|f| f.length).sum(),
        }
    }

    /// Returns the single-file length, rejecting multi-file torrents.
    pub fn single_file_length(&self) -> TorrentResult<i64> {
        self.info.length.ok_or(TorrentError::SingleFileOnly)
    }

    /// Returns the number of pieces, derived from the 20-byte hash count.
    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Returns the byte length of piece `index`.
    ///
    /// Every piece is `piece_length` bytes except the last, which holds
    /// whatever remains of the total length.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let full_pieces_length = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            let last_piece_size = self.total_length() - full_pieces_length;

            if last_piece_size == 0 && self.num_pieces() > 0 {
                self.info.piece_length
            } else {
                last_piece_size
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encoder::encode_to_vec;
    use sha1::{Digest, Sha1};

    /// Builds the bytes of a single-file torrent with three pieces whose
    /// shape matches a well-known fixture: length 92063, piece length 32768.
    fn sample_torrent_bytes() -> Vec<u8> {
        let pieces: Vec<u8> = (0u8..60).collect();

        let mut info = HashMap::new();
        info.insert(b"length".to_vec(), BencodeValue::Integer(92063));
        info.insert(
            b"name".to_vec(),
            BencodeValue::String(b"sample.txt".to_vec()),
        );
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(32768));
        info.insert(b"pieces".to_vec(), BencodeValue::String(pieces));

        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://tracker.example.com/announce".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));

        encode_to_vec(&BencodeValue::Dict(root)).unwrap()
    }

    #[test]
    fn parses_single_file_torrent() {
        let torrent = TorrentFile::from_bytes(&sample_torrent_bytes()).unwrap();
        assert_eq!(torrent.announce, "http://tracker.example.com/announce");
        assert_eq!(torrent.info.name, "sample.txt");
        assert_eq!(torrent.info.piece_length, 32768);
        assert_eq!(torrent.total_length(), 92063);
        assert_eq!(torrent.num_pieces(), 3);
        assert_eq!(torrent.single_file_length().unwrap(), 92063);
    }

    #[test]
    fn info_hash_matches_canonical_encoding() {
        let bytes = sample_torrent_bytes();
        let torrent = TorrentFile::from_bytes(&bytes).unwrap();

        // The canonical re-encoding of the decoded info dictionary must
        // reproduce the `info` slice of the input, so hashing it directly
        // gives the same digest the parser memoised.
        let decoded = bencode::decode_bytes(&bytes).unwrap();
        let BencodeValue::Dict(root) = decoded else {
            panic!("expected a dict");
        };
        let info_slice = encode_to_vec(root.get(b"info".as_slice()).unwrap()).unwrap();
        let digest: [u8; 20] = Sha1::digest(&info_slice).into();
        assert_eq!(torrent.info_hash, digest);
    }

    #[test]
    fn last_piece_is_truncated() {
        let torrent = TorrentFile::from_bytes(&sample_torrent_bytes()).unwrap();
        assert_eq!(torrent.piece_size(0), 32768);
        assert_eq!(torrent.piece_size(1), 32768);
        assert_eq!(torrent.piece_size(2), 92063 - 2 * 32768);
        assert_eq!(torrent.piece_size(3), 0);
    }

    #[test]
    fn splits_piece_hashes() {
        let torrent = TorrentFile::from_bytes(&sample_torrent_bytes()).unwrap();
        assert_eq!(torrent.pieces_hash.len(), 3);
        assert_eq!(torrent.pieces_hash[1][0], 20);
    }

    #[test]
    fn rejects_missing_announce() {
        let mut info = HashMap::new();
        info.insert(b"length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"name".to_vec(), BencodeValue::String(b"x".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0; 20]));
        let mut root = HashMap::new();
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = encode_to_vec(&BencodeValue::Dict(root)).unwrap();

        assert!(matches!(
            TorrentFile::from_bytes(&bytes),
            Err(TorrentError::MissingField(field)) if field == "announce"
        ));
    }

    #[test]
    fn rejects_ragged_pieces_string() {
        let mut info = HashMap::new();
        info.insert(b"length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"name".to_vec(), BencodeValue::String(b"x".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0; 19]));
        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://t/a".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = encode_to_vec(&BencodeValue::Dict(root)).unwrap();

        assert!(matches!(
            TorrentFile::from_bytes(&bytes),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }

    #[test]
    fn multi_file_torrents_parse_but_have_no_single_length() {
        let mut file_entry = HashMap::new();
        file_entry.insert(b"length".to_vec(), BencodeValue::Integer(7));
        file_entry.insert(
            b"path".to_vec(),
            BencodeValue::List(vec![BencodeValue::String(b"a.txt".to_vec())]),
        );
        let mut info = HashMap::new();
        info.insert(
            b"files".to_vec(),
            BencodeValue::List(vec![BencodeValue::Dict(file_entry)]),
        );
        info.insert(b"name".to_vec(), BencodeValue::String(b"dir".to_vec()));
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(7));
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0; 20]));
        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://t/a".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = encode_to_vec(&BencodeValue::Dict(root)).unwrap();

        let torrent = TorrentFile::from_bytes(&bytes).unwrap();
        assert_eq!(torrent.total_length(), 7);
        assert!(matches!(
            torrent.single_file_length(),
            Err(TorrentError::SingleFileOnly)
        ));
    }
}
