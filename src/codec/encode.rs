//! Outbound record assembly: `BEGIN_REQUEST`, `PARAMS` (+ terminator),
//! `STDIN` (+ terminator, chunked to the record content limit).

use super::header::{Header, RecordType, Role, MAX_CONTENT_LENGTH};
use super::params::encode_params_content;

pub const REQUEST_ID: u16 = 1;

/// `BEGIN_REQUEST` body: role (u16 BE) + flags (u8) + 5 reserved bytes.
pub fn encode_begin_request(role: Role) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&role.as_u16().to_be_bytes());
    body.push(0); // flags: FCGI_KEEP_CONN unset, one connection per request
    body.extend_from_slice(&[0u8; 5]);

    let header = Header::new(RecordType::BeginRequest, REQUEST_ID, body.len());
    let mut out = header.to_bytes().to_vec();
    out.extend(body);
    out
}

/// `PARAMS` record(s) for the given environment, followed by the
/// empty `PARAMS` record that terminates the stream. Returns `None`
/// if the encoded environment exceeds a single record's content limit.
pub fn encode_params(pairs: &[(String, String)]) -> Option<Vec<u8>> {
    let content = encode_params_content(pairs)?;
    let mut out = Vec::new();
    out.extend(Header::new(RecordType::Params, REQUEST_ID, content.len()).to_bytes());
    out.extend(content);
    out.extend(encode_empty(RecordType::Params));
    Some(out)
}

/// One `STDIN` record carrying up to [`MAX_CONTENT_LENGTH`] bytes of
/// `chunk`. Callers wanting to frame a larger body call this per
/// 65535-byte slice.
pub fn encode_stdin_chunk(chunk: &[u8]) -> Vec<u8> {
    assert!(chunk.len() <= MAX_CONTENT_LENGTH);
    let mut out = Header::new(RecordType::Stdin, REQUEST_ID, chunk.len()).to_bytes().to_vec();
    out.extend_from_slice(chunk);
    out
}

/// Frames an entire body into zero or more `STDIN` records of at most
/// [`MAX_CONTENT_LENGTH`] bytes each, in wire order. Does not emit the
/// terminating empty record; callers append [`encode_empty`] only once
/// the upstream body is fully received.
pub fn encode_stdin_chunks(mut body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if body.is_empty() {
        return out;
    }
    while !body.is_empty() {
        let take = body.len().min(MAX_CONTENT_LENGTH);
        out.extend(encode_stdin_chunk(&body[..take]));
        body = &body[take..];
    }
    out
}

/// The empty record (zero content length) that terminates a `PARAMS`
/// or `STDIN` stream.
pub fn encode_empty(record_type: RecordType) -> Vec<u8> {
    Header::new(record_type, REQUEST_ID, 0).to_bytes().to_vec()
}

/// Parsed `END_REQUEST` body: `appStatus` (u32 BE) + `protocolStatus`
/// (u8) + 3 reserved bytes.
#[derive(Debug, Clone, Copy)]
pub struct EndRequestBody {
    pub app_status: u32,
    pub protocol_status: super::header::ProtocolStatus,
}

pub fn decode_end_request_body(payload: &[u8]) -> Option<EndRequestBody> {
    if payload.len() < 8 {
        return None;
    }
    let app_status = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let protocol_status = super::header::ProtocolStatus::from_u8(payload[4]);
    Some(EndRequestBody { app_status, protocol_status })
}
