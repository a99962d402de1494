//! Magnet link (v1) parsing.
//!
//! `magnet:?xt=urn:btih:<40-hex>&dn=<name>&tr=<tracker-url>&x.pe=<ip:port>`.
//! Pure string work: split scheme and query, pull the `xt` topic apart and
//! hex-decode the info hash. The v2 `btmh` topic is recognised so the parser
//! can name it in errors and renderings, but downloads only use v1 hashes.
use super::TorrentError;
use super::TorrentResult;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// BitTorrent v1 info hash (`urn:btih:`), 20 bytes.
    Btih,
    /// BitTorrent v2 multihash (`urn:btmh:`).
    Btmh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub hash_kind: HashKind,
    /// Decoded topic hash; exactly 20 bytes for `btih`.
    pub info_hash: Vec<u8>,
    /// Suggested display name (`dn`).
    pub name: Option<String>,
    /// Tracker announce URL (`tr`).
    pub tracker: Option<String>,
    /// Direct peer address (`x.pe`).
    pub peer: Option<String>,
}

impl MagnetLink {
    /// Parses a magnet link.
    ///
    /// The scheme must be `magnet` and the query must carry an `xt` topic of
    /// the form `urn:(btih|btmh):<hex>`, matched case-insensitively. A
    /// `btih` topic must decode to exactly 20 bytes.
    pub fn parse(link: &str) -> TorrentResult<Self> {
        let url = Url::parse(link)?;
        if url.scheme() != "magnet" {
            return Err(TorrentError::InvalidMagnet(format!(
                "scheme is '{}', expected 'magnet'",
                url.scheme()
            )));
        }

        let mut xt = None;
        let mut name = None;
        let mut tracker = None;
        let mut peer = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => xt = Some(value.into_owned()),
                "dn" => name = Some(value.into_owned()),
                "tr" => tracker = Some(value.into_owned()),
                "x.pe" => peer = Some(value.into_owned()),
                _ => {}
            }
        }

        let xt = xt.ok_or_else(|| TorrentError::InvalidMagnet("missing xt".to_string()))?;
        let (hash_kind, hash_hex) = parse_topic(&xt)?;

        let info_hash = hex::decode(hash_hex.to_ascii_lowercase())
            .map_err(|e| TorrentError::InvalidMagnet(format!("bad topic hex: {}", e)))?;
        if hash_kind == HashKind::Btih && info_hash.len() != 20 {
            return Err(TorrentError::InvalidMagnet(format!(
                "btih hash is {} bytes, expected 20",
                info_hash.len()
            )));
        }

        Ok(MagnetLink {
            hash_kind,
            info_hash,
            name,
            tracker,
            peer,
        })
    }

    /// Lowercase hex rendering of the topic hash.
    pub fn info_hash_hex(&self) -> String {
        hex::encode(&self.info_hash)
    }
}

/// Splits `urn:(btih|btmh):<hex>` into kind and hex digits.
fn parse_topic(xt: &str) -> TorrentResult<(HashKind, &str)> {
    let mut parts = xt.splitn(3, ':');
    let urn = parts.next().unwrap_or_default();
    let kind = parts.next().unwrap_or_default();
    let hex_digits = parts
        .next()
        .ok_or_else(|| TorrentError::InvalidMagnet(format!("malformed xt: {}", xt)))?;

    if !urn.eq_ignore_ascii_case("urn") {
        return Err(TorrentError::InvalidMagnet(format!("xt is not a urn: {}", xt)));
    }
    let hash_kind = if kind.eq_ignore_ascii_case("btih") {
        HashKind::Btih
    } else if kind.eq_ignore_ascii_case("btmh") {
        HashKind::Btmh
    } else {
        return Err(TorrentError::InvalidMagnet(format!(
            "unknown topic kind: {}",
            kind
        )));
    };
    if hex_digits.is_empty() || !hex_digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TorrentError::InvalidMagnet(format!(
            "topic is not hex: {}",
            hex_digits
        )));
    }
    Ok((hash_kind, hex_digits))
}
