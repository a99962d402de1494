use crate::bencode::{encoder, BencodeResult, BencodeValue};
use sha1::Digest;
use sha1::Sha1;
use std::collections::HashMap;

/// Computes the SHA-1 of the canonical bencoding of an `info` dictionary.
///
/// The canonical encoding (keys sorted) reproduces the dictionary exactly as
/// a conforming `.torrent` file carries it, so the digest here is the same
/// identity the tracker and every peer use for the torrent.
pub fn calculate_info_hash(info_dict: &HashMap<Vec<u8>, BencodeValue>) -> BencodeResult<[u8; 20]> {
    let mut buffer = Vec::new();
    encoder::encode(&mut buffer, &BencodeValue::Dict(info_dict.clone()))?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);

    let result = hasher.finalize();
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&result[..]);

    Ok(info_hash)
}
