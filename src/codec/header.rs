//! FastCGI record header: the fixed 8-byte preamble on every frame.

/// Every record on the wire declares this version.
pub const VERSION_1: u8 = 1;

/// Maximum `contentLength` a single record may declare.
pub const MAX_CONTENT_LENGTH: usize = 0xffff;

pub const HEADER_LEN: usize = 8;

/// `FCGI_LISTENSOCK_FILENO`: the fd a spawned child finds its listening
/// socket bound to.
pub const LISTENSOCK_FILENO: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    EndRequest,
    Unknown(u8),
}

impl RecordType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => RecordType::BeginRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            other => RecordType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            RecordType::BeginRequest => 1,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Responder,
    Authorizer,
}

impl Role {
    pub fn as_u16(self) -> u16 {
        match self {
            Role::Responder => 1,
            Role::Authorizer => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete,
    CantMpxConn,
    Overloaded,
    UnknownRole,
}

impl ProtocolStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ProtocolStatus::CantMpxConn,
            2 => ProtocolStatus::Overloaded,
            3 => ProtocolStatus::UnknownRole,
            _ => ProtocolStatus::RequestComplete,
        }
    }
}

/// A decoded 8-byte header. `content_length` is validated to fit in a
/// 16-bit field; callers producing one for encoding should go through
/// [`Header::new`] rather than constructing this directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    pub fn new(record_type: RecordType, request_id: u16, content_length: usize) -> Self {
        assert!(content_length <= MAX_CONTENT_LENGTH, "content_length exceeds FastCGI record limit");
        Header {
            version: VERSION_1,
            record_type,
            request_id,
            content_length: content_length as u16,
            padding_length: 0,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.record_type.as_u8();
        out[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        out[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        out[6] = self.padding_length;
        out[7] = 0;
        out
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        Header {
            version: buf[0],
            record_type: RecordType::from_u8(buf[1]),
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        }
    }
}
