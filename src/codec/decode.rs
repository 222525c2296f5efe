//! Stateless record extraction: pull one complete frame off the head
//! of a byte buffer, or report that more bytes are needed.
//!
//! Mirrors the wire behavior directly: no state survives between
//! calls. A caller drains a receive buffer by calling `decode_record`
//! repeatedly until it returns `Incomplete`, exactly as the codec
//! documentation describes ("maintains no persistent state across
//! calls").

use super::header::{Header, HEADER_LEN};

pub struct DecodedRecord {
    pub header: Header,
    /// Content bytes only; padding has already been dropped.
    pub payload: Vec<u8>,
    /// Total bytes consumed from the input (header + content + padding).
    pub consumed: usize,
}

pub enum DecodeOutcome {
    Record(DecodedRecord),
    /// Not enough bytes yet for a full frame; `buf` is untouched.
    Incomplete,
}

/// Attempts to extract one complete record from the head of `buf`.
pub fn decode_record(buf: &[u8]) -> DecodeOutcome {
    if buf.len() < HEADER_LEN {
        return DecodeOutcome::Incomplete;
    }
    let mut header_bytes = [0u8; HEADER_LEN];
    header_bytes.copy_from_slice(&buf[..HEADER_LEN]);
    let header = Header::from_bytes(&header_bytes);

    let content_len = header.content_length as usize;
    let padding_len = header.padding_length as usize;
    let frame_len = HEADER_LEN + content_len + padding_len;

    if buf.len() < frame_len {
        return DecodeOutcome::Incomplete;
    }

    let payload = buf[HEADER_LEN..HEADER_LEN + content_len].to_vec();
    DecodeOutcome::Record(DecodedRecord {
        header,
        payload,
        consumed: frame_len,
    })
}
