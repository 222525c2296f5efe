//! Name/value pair encoding used by the `PARAMS` record stream.

/// Encodes a single length prefix: one byte if `< 128`, else four bytes
/// with the high bit of the first byte set.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let len = (len as u32) | 0x8000_0000;
        out.extend_from_slice(&len.to_be_bytes());
    }
}

/// Reads a length prefix from the head of `buf`, returning the decoded
/// length and the number of bytes the prefix occupied, or `None` if
/// `buf` doesn't yet hold a complete prefix.
pub fn decode_length(buf: &[u8]) -> Option<(usize, usize)> {
    let first = *buf.first()?;
    if first & 0x80 == 0 {
        Some((first as usize, 1))
    } else {
        if buf.len() < 4 {
            return None;
        }
        let raw = u32::from_be_bytes([buf[0] & 0x7f, buf[1], buf[2], buf[3]]);
        Some((raw as usize, 4))
    }
}

/// Appends one name/value pair's wire encoding to `out`.
pub fn encode_pair(name: &[u8], value: &[u8], out: &mut Vec<u8>) {
    encode_length(name.len(), out);
    encode_length(value.len(), out);
    out.extend_from_slice(name);
    out.extend_from_slice(value);
}

/// Encodes an ordered list of name/value pairs into one `PARAMS`
/// content block. Returns `None` if the encoded content would exceed
/// a single record's `contentLength` limit (the caller must split
/// across environments or reject the request; this crate never
/// multi-records a single PARAMS stream).
pub fn encode_params_content(pairs: &[(String, String)]) -> Option<Vec<u8>> {
    let mut content = Vec::new();
    for (name, value) in pairs {
        encode_pair(name.as_bytes(), value.as_bytes(), &mut content);
    }
    if content.len() > super::header::MAX_CONTENT_LENGTH {
        None
    } else {
        Some(content)
    }
}

/// Decodes every complete name/value pair out of a `PARAMS` content
/// block. A `PARAMS` block is always delivered whole (content length
/// is bounded by one record), so this never needs partial-decode
/// handling the way frame decoding does.
pub fn decode_params_content(mut buf: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    loop {
        let Some((name_len, name_prefix)) = decode_length(buf) else { break };
        let rest = &buf[name_prefix..];
        let Some((value_len, value_prefix)) = decode_length(rest) else { break };
        let rest = &rest[value_prefix..];
        if rest.len() < name_len + value_len {
            break;
        }
        let name = rest[..name_len].to_vec();
        let value = rest[name_len..name_len + value_len].to_vec();
        pairs.push((name, value));
        buf = &rest[name_len + value_len..];
    }
    pairs
}
