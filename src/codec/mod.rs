//! FastCGI record codec (component A): framing outbound
//! `BEGIN_REQUEST`/`PARAMS`/`STDIN` records and decoding inbound
//! `STDOUT`/`STDERR`/`END_REQUEST` records from a byte stream that may
//! deliver partial frames.

pub mod decode;
pub mod encode;
pub mod header;
pub mod params;

pub use decode::{decode_record, DecodeOutcome, DecodedRecord};
pub use encode::{decode_end_request_body, encode_begin_request, encode_empty, encode_params, encode_stdin_chunks, EndRequestBody};
pub use header::{Header, ProtocolStatus, RecordType, Role, HEADER_LEN, MAX_CONTENT_LENGTH};
