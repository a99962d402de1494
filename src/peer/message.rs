//! Length-prefixed peer messages and their codec.
//!
//! After the handshake every message on the wire is
//! `[length: u32 BE][id: u8][payload: length-1 bytes]`; a zero length is a
//! keep-alive. [`MessageCodec`] frames a TCP stream into [`Message`] values
//! via `tokio_util`'s `Decoder`/`Encoder` so the connection can be driven as
//! a typed stream and sink.
use super::PeerError;
use super::PeerResult;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on a single frame. The largest legitimate frame is a `Piece`
/// carrying one 16 KiB block plus nine bytes of header; bitfields of very
/// large torrents stay far below this too.
const MAX_FRAME: usize = 1 << 17;

/// A peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Unchoke,
    Interested,
    /// Peer announces it acquired a piece. Tolerated, ignored.
    Have(u32),
    /// Bitmap of pieces the peer holds. Contents are opaque to us: we ask
    /// for every piece and let refusals surface as protocol errors.
    Bitfield(Vec<u8>),
    Request(Request),
    Piece(Piece),
}

/// A request for one block within a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// One delivered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub begin: u32,
    pub block: Vec<u8>,
}

mod ids {
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
}

impl Request {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }

    fn from_payload(payload: &[u8]) -> PeerResult<Self> {
        if payload.len() != 12 {
            return Err(PeerError::MalformedMessage("request"));
        }
        let mut cursor = Cursor::new(payload);
        Ok(Self {
            index: cursor.read_u32::<BigEndian>()?,
            begin: cursor.read_u32::<BigEndian>()?,
            length: cursor.read_u32::<BigEndian>()?,
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> PeerResult<()> {
        out.write_u32::<BigEndian>(self.index)?;
        out.write_u32::<BigEndian>(self.begin)?;
        out.write_u32::<BigEndian>(self.length)?;
        Ok(())
    }
}

impl Piece {
    fn from_payload(payload: &[u8]) -> PeerResult<Self> {
        if payload.len() < 8 {
            return Err(PeerError::MalformedMessage("piece"));
        }
        let mut cursor = Cursor::new(payload);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;
        Ok(Self {
            index,
            begin,
            block: payload[8..].to_vec(),
        })
    }

    fn write_payload(&self, out: &mut Vec<u8>) -> PeerResult<()> {
        out.write_u32::<BigEndian>(self.index)?;
        out.write_u32::<BigEndian>(self.begin)?;
        out.extend_from_slice(&self.block);
        Ok(())
    }
}

impl Message {
    /// Human-readable tag, used in "unexpected message" diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Message::KeepAlive => "keep-alive",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::Have(_) => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request(_) => "request",
            Message::Piece(_) => "piece",
        }
    }
}

/// Codec turning a raw byte stream into [`Message`] frames and back.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> PeerResult<Option<Message>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length == 0 {
            src.advance(4);
            return Ok(Some(Message::KeepAlive));
        }
        if length > MAX_FRAME {
            return Err(PeerError::FrameTooLarge(length));
        }
        if src.len() < 4 + length {
            // Partial frame; ask for the rest in one allocation.
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let id = src.get_u8();
        let payload = src.split_to(length - 1);

        let message = match id {
            ids::UNCHOKE => Message::Unchoke,
            ids::INTERESTED => Message::Interested,
            ids::HAVE => {
                if payload.len() != 4 {
                    return Err(PeerError::MalformedMessage("have"));
                }
                Message::Have(u32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))
            }
            ids::BITFIELD => Message::Bitfield(payload.to_vec()),
            ids::REQUEST => Message::Request(Request::from_payload(&payload)?),
            ids::PIECE => Message::Piece(Piece::from_payload(&payload)?),
            other => return Err(PeerError::UnknownMessage(other)),
        };
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = PeerError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> PeerResult<()> {
        let (id, payload) = match item {
            Message::KeepAlive => {
                dst.put_u32(0);
                return Ok(());
            }
            Message::Unchoke => (ids::UNCHOKE, Vec::new()),
            Message::Interested => (ids::INTERESTED, Vec::new()),
            Message::Have(index) => (ids::HAVE, index.to_be_bytes().to_vec()),
            Message::Bitfield(bits) => (ids::BITFIELD, bits),
            Message::Request(request) => {
                let mut payload = Vec::with_capacity(12);
                request.write_payload(&mut payload)?;
                (ids::REQUEST, payload)
            }
            Message::Piece(piece) => {
                let mut payload = Vec::with_capacity(8 + piece.block.len());
                piece.write_payload(&mut payload)?;
                (ids::PIECE, payload)
            }
        };

        dst.put_u32(payload.len() as u32 + 1);
        dst.put_u8(id);
        dst.put_slice(&payload);
        Ok(())
    }
}
