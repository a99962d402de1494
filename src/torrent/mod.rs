//! Torrent metainfo parsing.
//!
//! Types and error handling for `.torrent` files and magnet links: decoding
//! the bencoded dictionary, validating required fields, splitting piece
//! hashes and computing the info hash.
use thiserror::Error;
pub mod file;
pub mod info_hash;
pub mod magnet;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid data type for field: {0}")]
    InvalidFieldType(String),

    #[error("pieces string length is not a multiple of 20")]
    InvalidPiecesHashLength,

    #[error("only single-file torrents are supported")]
    SingleFileOnly,

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("invalid magnet link: {0}")]
    InvalidMagnet(String),
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
