use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;

use std::collections::HashMap;
use std::io::{self, Read};
use tracing::instrument;

/// Decodes one bencoded value from the reader.
///
/// Performs a single forward pass, dispatching on the first byte: `i` starts
/// an integer, a digit starts a byte string, `l` a list and `d` a dictionary.
/// Anything else fails with [`BencodeError::InvalidFormat`]. Bytes after the
/// first complete value are left unread.
#[instrument(skip(reader), level = "debug")]
pub fn decode<R: Read>(reader: R) -> BencodeResult<BencodeValue> {
    let mut bytes = reader.bytes().peekable();
    decode_value(&mut bytes)
}

/// Convenience wrapper for decoding from an in-memory buffer.
pub fn decode_bytes(input: &[u8]) -> BencodeResult<BencodeValue> {
    decode(input)
}

/// Decodes a byte string in the form `<length>:<data>`.
///
/// The length prefix is decimal; exactly that many raw bytes follow the
/// colon. Fails when the prefix is not a number or the input ends before
/// `length` bytes have been read.
#[instrument(skip(reader), level = "trace")]
fn decode_string<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<u8>> {
    let length_str = read_until(reader, b':')?;
    let length = length_str
        .parse::<usize>()
        .map_err(|_| BencodeError::InvalidStringLength)?;

    let mut string_bytes = vec![0; length];
    for byte in string_bytes.iter_mut() {
        *byte = reader
            .next()
            .ok_or(BencodeError::UnexpectedEoi)?
            .map_err(|e| BencodeError::Io(e.kind().into()))?;
    }
    Ok(string_bytes)
}

/// Collects bytes up to (and consuming) `delimiter`, returned as UTF-8.
///
/// Used for the digits of string lengths and integer bodies; both are ASCII
/// in well-formed input, so non-UTF-8 here is a malformed stream.
fn read_until<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
    delimiter: u8,
) -> BencodeResult<String> {
    let mut buffer = Vec::new();

    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEoi)?
            .as_ref()
            .map_err(|e| BencodeError::Io(e.kind().into()))?;

        let byte = reader
            .next()
            .ok_or(BencodeError::UnexpectedEoi)?
            .map_err(|e| BencodeError::Io(e.kind().into()))?;

        if current_byte == delimiter {
            break;
        }
        buffer.push(byte);
    }

    String::from_utf8(buffer).map_err(|e| {
        BencodeError::InvalidFormat(format!("non-UTF8 bytes in length/integer: {}", e))
    })
}

/// Decodes an integer in the form `i<number>e`.
///
/// Leading zeros (other than `0` itself), `-0` and empty bodies are
/// rejected, matching the bencoding grammar.
#[instrument(skip(reader), level = "trace")]
fn decode_integer<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<i64> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEoi)?
        .map_err(|e| BencodeError::Io(e.kind().into()))?;

    if first_byte != b'i' {
        return Err(BencodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }

    let num_str = read_until(reader, b'e')?;

    if num_str.is_empty() || num_str == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    if num_str.len() > 1 && (num_str.starts_with('0') || num_str.starts_with("-0")) {
        return Err(BencodeError::InvalidInteger);
    }

    num_str
        .parse::<i64>()
        .map_err(|_| BencodeError::InvalidInteger)
}

/// Decodes a list in the form `l<items>e`, recursing per item.
#[instrument(skip(reader), level = "trace")]
fn decode_list<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<Vec<BencodeValue>> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEoi)?
        .map_err(|e| BencodeError::Io(e.kind().into()))?;
    if first_byte != b'l' {
        return Err(BencodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }

    let mut list = Vec::new();

    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEoi)?
            .as_ref()
            .map_err(|e| BencodeError::Io(e.kind().into()))?;

        if current_byte == b'e' {
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEoi)?
                .map_err(|e| BencodeError::Io(e.kind().into()))?;
            break;
        }

        list.push(decode_value(reader)?);
    }

    Ok(list)
}

/// Decodes a dictionary in the form `d<key><value>...e`.
///
/// Keys are byte strings; values recurse through the full grammar. The
/// container must be terminated by `e` before the input ends.
#[instrument(skip(reader), level = "trace")]
fn decode_dict<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<HashMap<Vec<u8>, BencodeValue>> {
    let first_byte = reader
        .next()
        .ok_or(BencodeError::UnexpectedEoi)?
        .map_err(|e| BencodeError::Io(e.kind().into()))?;

    if first_byte != b'd' {
        return Err(BencodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }

    let mut dict = HashMap::new();

    loop {
        let &current_byte = reader
            .peek()
            .ok_or(BencodeError::UnexpectedEoi)?
            .as_ref()
            .map_err(|e| BencodeError::Io(e.kind().into()))?;

        if current_byte == b'e' {
            reader
                .next()
                .ok_or(BencodeError::UnexpectedEoi)?
                .map_err(|e| BencodeError::Io(e.kind().into()))?;
            break;
        }

        let key = decode_string(reader)?;
        let value = decode_value(reader)?;
        dict.insert(key, value);
    }

    Ok(dict)
}

fn decode_value<R: Read>(
    reader: &mut std::iter::Peekable<io::Bytes<R>>,
) -> BencodeResult<BencodeValue> {
    let &first_byte = reader
        .peek()
        .ok_or(BencodeError::UnexpectedEoi)?
        .as_ref()
        .map_err(|e| BencodeError::Io(e.kind().into()))?;

    match first_byte {
        b'0'..=b'9' => decode_string(reader).map(BencodeValue::String),
        b'i' => decode_integer(reader).map(BencodeValue::Integer),
        b'l' => decode_list(reader).map(BencodeValue::List),
        b'd' => decode_dict(reader).map(BencodeValue::Dict),
        _ => Err(BencodeError::InvalidFormat(format!(
            "unexpected character: {}",
            first_byte as char
        ))),
    }
}
