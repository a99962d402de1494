//! Bencode codec.
//!
//! Bencoding is the self-describing serialisation format BitTorrent uses for
//! torrent metainfo and tracker responses. This module holds the value model
//! plus a streaming decoder and a canonical encoder; the canonical encoding
//! (dictionary keys in sorted byte order) is what the info hash is computed
//! over.
use std::collections::HashMap;
use thiserror::Error;
pub mod decoder;
pub mod encoder;

pub use decoder::{decode, decode_bytes};
pub use encoder::encode;

/**
Represents a single bencoded value.

Four variants cover the whole format:

1. String(Vec<u8>):
   - A byte string, e.g. "4:spam" decodes to String(b"spam").
   - Kept as raw bytes; torrent `pieces` strings are not UTF-8.

2. Integer(i64):
   - "i42e" decodes to Integer(42). The format allows arbitrary precision
     but 64 bits covers every field a real torrent carries.

3. List(Vec<BencodeValue>):
   - "l4:spami42ee" decodes to List([String(b"spam"), Integer(42)]).

4. Dict(HashMap<Vec<u8>, BencodeValue>):
   - "d3:foo3:bare" decodes to Dict({b"foo" => String(b"bar")}).
   - Keys are byte strings. A conforming encoder emits keys sorted, so
     re-encoding a decoded dictionary reproduces the input bytes.
*/
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    /// Renders the value as JSON for the `decode` command.
    ///
    /// Byte strings become lossy UTF-8 strings; dictionary keys are emitted
    /// in sorted order so the rendering is deterministic.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BencodeValue::String(s) => {
                serde_json::Value::String(String::from_utf8_lossy(s).into_owned())
            }
            BencodeValue::Integer(i) => serde_json::Value::Number((*i).into()),
            BencodeValue::List(items) => {
                serde_json::Value::Array(items.iter().map(BencodeValue::to_json).collect())
            }
            BencodeValue::Dict(dict) => {
                let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
                keys.sort_unstable();
                let map = keys
                    .into_iter()
                    .map(|k| {
                        (
                            String::from_utf8_lossy(k).into_owned(),
                            dict[k].to_json(),
                        )
                    })
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Error type for bencode decode and encode failures.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEoi,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_rendering_is_deterministic() {
        let mut dict = HashMap::new();
        dict.insert(b"spam".to_vec(), BencodeValue::Integer(1));
        dict.insert(b"eggs".to_vec(), BencodeValue::String(b"ham".to_vec()));
        let value = BencodeValue::Dict(dict);
        assert_eq!(
            value.to_json().to_string(),
            r#"{"eggs":"ham","spam":1}"#
        );
    }

    #[test]
    fn json_rendering_nested_list() {
        let value = BencodeValue::List(vec![
            BencodeValue::Integer(-7),
            BencodeValue::String(b"hi".to_vec()),
        ]);
        assert_eq!(value.to_json().to_string(), r#"[-7,"hi"]"#);
    }
}
