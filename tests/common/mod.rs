//! Shared test scaffolding: a minimal in-process FastCGI responder and
//! the collaborator stubs `handle_request` needs from an embedder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gruxi_fastcgi::codec::header::{Header, ProtocolStatus, RecordType};
use gruxi_fastcgi::codec::{decode_record, DecodeOutcome};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn stdout_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Header::new(RecordType::Stdout, 1, payload.len()).to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

pub fn end_request_record(app_status: u32, status: ProtocolStatus) -> Vec<u8> {
    let code: u8 = match status {
        ProtocolStatus::RequestComplete => 0,
        ProtocolStatus::CantMpxConn => 1,
        ProtocolStatus::Overloaded => 2,
        ProtocolStatus::UnknownRole => 3,
    };
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&app_status.to_be_bytes());
    body.push(code);
    body.extend_from_slice(&[0u8; 3]);
    let mut out = Header::new(RecordType::EndRequest, 1, body.len()).to_bytes().to_vec();
    out.extend(body);
    out
}

/// Binds a loopback listener and returns it along with the port picked.
pub async fn bind_loopback() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind loopback");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Drains one connection's request frames (BEGIN_REQUEST, PARAMS...
/// empty PARAMS, STDIN...empty STDIN) and returns the accumulated
/// STDIN payload.
async fn drain_request(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut read_buf = [0u8; 4096];
    let mut stdin_done = false;
    let mut stdin_body = Vec::new();

    while !stdin_done {
        let n = stream.read(&mut read_buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&read_buf[..n]);
        loop {
            match decode_record(&buf) {
                DecodeOutcome::Record(rec) => {
                    if rec.header.record_type == RecordType::Stdin {
                        if rec.header.content_length == 0 {
                            stdin_done = true;
                        } else {
                            stdin_body.extend_from_slice(&rec.payload);
                        }
                    }
                    buf.drain(..rec.consumed);
                }
                DecodeOutcome::Incomplete => break,
            }
        }
    }
    stdin_body
}

/// Accepts connections forever, answering every request with a fixed
/// `Status:` header block and body, then `END_REQUEST`/`RequestComplete`.
/// Returns a counter of how many connections it has accepted.
pub fn spawn_fixed_responder(listener: TcpListener, status: u16, body: &'static str) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = drain_request(&mut stream).await;
                let header = format!("Status: {status}\r\n\r\n{body}");
                let _ = stream.write_all(&stdout_record(header.as_bytes())).await;
                let _ = stream.write_all(&end_request_record(0, ProtocolStatus::RequestComplete)).await;
            });
        }
    });
    hits
}

/// Accepts one connection, writes a header block plus a few body bytes,
/// then forces an abortive close (`SO_LINGER(0)`) so the client's next
/// read sees a genuine I/O error rather than a clean EOF — simulating
/// a backend that's reset mid-response.
pub fn spawn_reset_after_headers_responder(listener: TcpListener) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = drain_request(&mut stream).await;
                let header = "Status: 200\r\n\r\npartial";
                let _ = stream.write_all(&stdout_record(header.as_bytes())).await;
                if let Ok(std_stream) = stream.into_std() {
                    let _ = std_stream.set_linger(Some(std::time::Duration::from_secs(0)));
                    drop(std_stream);
                }
            });
        }
    });
    hits
}

/// Accepts every connection and immediately drops it without writing a
/// single byte, simulating a backend that died mid-accept.
pub fn spawn_dropping_responder(listener: TcpListener) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    hits
}

pub struct FixedEnv(pub Vec<(String, String)>);
impl gruxi_fastcgi::collaborators::CgiEnvironmentSource for FixedEnv {
    fn cgi_environment(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}

pub struct FixedBody {
    chunks: Vec<Vec<u8>>,
    next: usize,
}
impl FixedBody {
    pub fn new(body: &[u8]) -> Self {
        if body.is_empty() {
            FixedBody { chunks: vec![], next: 0 }
        } else {
            FixedBody { chunks: vec![body.to_vec()], next: 0 }
        }
    }
}
impl gruxi_fastcgi::collaborators::RequestBodySource for FixedBody {
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.next < self.chunks.len() {
            let chunk = self.chunks[self.next].clone();
            self.next += 1;
            Some(chunk)
        } else {
            None
        }
    }
    fn is_complete(&self) -> bool {
        self.next >= self.chunks.len()
    }
    fn declared_length(&self) -> Option<u64> {
        Some(self.chunks.iter().map(|c| c.len() as u64).sum())
    }
}

/// A body of unknown length (as from a chunked upstream request) whose
/// embedder refuses to stream it to the backend without first knowing
/// the total size.
pub struct UnsizedNonStreamingBody;
impl gruxi_fastcgi::collaborators::RequestBodySource for UnsizedNonStreamingBody {
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        None
    }
    fn is_complete(&self) -> bool {
        false
    }
    fn declared_length(&self) -> Option<u64> {
        None
    }
    fn streaming_allowed(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub headers_raw: Vec<u8>,
    pub body: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started: bool,
    pub status: Option<u16>,
    pub docroot_overlay: Option<String>,
}
impl gruxi_fastcgi::collaborators::ResponseHeaderSink for RecordingSink {
    fn feed_headers(&mut self, chunk: &[u8]) -> bool {
        self.headers_raw.extend_from_slice(chunk);
        if let Some(pos) = find_header_end(&self.headers_raw) {
            let (head, rest) = self.headers_raw.split_at(pos);
            self.status = parse_status(head);
            let leftover = rest[4..].to_vec();
            self.started = true;
            self.body.extend_from_slice(&leftover);
            true
        } else {
            false
        }
    }
    fn push_body(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }
    fn push_stderr(&mut self, chunk: &[u8]) {
        self.stderr.extend_from_slice(chunk);
    }
    fn file_started(&self) -> bool {
        self.started
    }
    fn status(&self) -> Option<u16> {
        self.status
    }
    fn reset(&mut self) {
        self.headers_raw.clear();
        self.body.clear();
        self.started = false;
        self.status = None;
    }
    fn overlay_docroot(&mut self, docroot: &str) {
        self.docroot_overlay = Some(docroot.to_string());
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status(head: &[u8]) -> Option<u16> {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n") {
        if let Some(rest) = line.strip_prefix("Status: ") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    Some(200)
}

pub fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
