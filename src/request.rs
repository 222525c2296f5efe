//! Per-request state machine (component F): connect, frame, write,
//! read, and reconnect on transient failure.
//!
//! The five conceptual states (`INIT`, `CONNECT_DELAYED`,
//! `PREPARE_WRITE`, `WRITE`, `READ`) map directly onto a sequence of
//! `.await` points against `tokio`'s reactor rather than a hand-rolled
//! event-loop trait: a connect that would otherwise suspend the whole
//! worker is simply `TcpStream::connect(..).await`, and likewise for
//! every other suspension point.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

use crate::codec::{decode_end_request_body, decode_record, encode_begin_request, encode_empty, encode_params, encode_stdin_chunks, DecodeOutcome, RecordType};
use crate::collaborators::{CgiEnvironmentSource, RequestBodySource, ResponseHeaderSink};
use crate::config::EndpointConfig;
use crate::dispatcher::{dispatch, DispatchOutcome, FcgiMode};
use crate::error::{GatewayError, GatewayErrorKind, GatewayResult};
use crate::metrics::{BackendTag, Counter};
use crate::registry::Gateway;
use crate::supervisor;

/// Reconnects are bounded at 5 retries (6 attempts total); the 6th
/// failure is terminal.
const MAX_ATTEMPTS: u32 = 6;

/// Authorizer re-loops are bounded at 5 successful COMEBACKs; the 6th
/// is rejected (`++loops_per_request > 5`).
const MAX_AUTHORIZER_LOOPS: u32 = 5;

/// Write-buffer low-water mark: below this, and while the upstream
/// body isn't fully received, opportunistically pull more bytes
/// rather than waiting for backpressure to clear first. Treated as a
/// configurable default per the open question in the design notes.
pub const DEFAULT_LOW_WATER_MARK: usize = 65536 - 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Init,
    ConnectDelayed,
    PrepareWrite,
    Write,
    Read,
}

trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

async fn connect_backend(endpoint: &EndpointConfig) -> std::io::Result<Box<dyn DuplexStream>> {
    match endpoint {
        EndpointConfig::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            Ok(Box::new(stream))
        }
        EndpointConfig::Unix { path } => {
            let stream = UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
    }
}

/// A failure bucket distinguishing retryable connect-phase failures
/// from failures that happened after bytes were already sent to the
/// client, which are never retried. `Retryable::overloaded` marks the
/// EAGAIN connect-phase outcome, which disables the proc as OVERLOADED
/// rather than DEAD.
enum Failure {
    Retryable { err: GatewayError, overloaded: bool, got_proc: bool, proc_pid: Option<u32> },
    Terminal { err: GatewayError, got_proc: bool },
}

impl Failure {
    fn retryable(err: GatewayError, proc_pid: Option<u32>) -> Self {
        Failure::Retryable { err, overloaded: false, got_proc: true, proc_pid }
    }

    fn terminal(err: GatewayError) -> Self {
        Failure::Terminal { err, got_proc: true }
    }
}

/// Drives one HTTP request through both extension-matching passes and
/// the full FastCGI exchange, including the authorizer re-loop.
/// Returns `Ok(false)` if no Extension matched (pass-through).
pub async fn handle_request(
    gateway: &mut Gateway,
    filename: &str,
    env: &dyn CgiEnvironmentSource,
    body: &mut dyn RequestBodySource,
    sink: &mut dyn ResponseHeaderSink,
) -> GatewayResult<bool> {
    let mut authorizer_already_ran = false;
    let mut authorizer_loops = 0u32;
    let current_filename = filename.to_string();

    loop {
        let Some(outcome) = dispatch(gateway, &current_filename, authorizer_already_ran, true)? else {
            return Ok(false);
        };

        match outcome.mode {
            FcgiMode::Authorizer => {
                let end = run_with_reconnect(gateway, &outcome, &current_filename, true, env, &mut EmptyBody, sink).await?;
                authorizer_already_ran = true;

                let status = sink.status();
                let approved = matches!(status, None | Some(200));
                if approved {
                    authorizer_loops += 1;
                    if authorizer_loops > MAX_AUTHORIZER_LOOPS {
                        return Err(GatewayError::new(GatewayErrorKind::AuthorizerLoopLimit { count: authorizer_loops }));
                    }
                    let docroot = gateway.hosts.get(&outcome.host_id).and_then(|h| h.config.docroot.clone());
                    if let Some(docroot) = docroot {
                        sink.overlay_docroot(&docroot);
                    }
                    sink.reset();
                    debug!(app_status = end.app_status, loops = authorizer_loops, "authorizer approved, re-entering dispatch");
                    continue;
                }
                // Any non-2xx authorizer status is forwarded to the client as-is.
                return Ok(true);
            }
            FcgiMode::Responder => {
                if body.declared_length().is_none() && !body.streaming_allowed() {
                    return Err(GatewayError::new(GatewayErrorKind::LengthRequired));
                }
                run_with_reconnect(gateway, &outcome, &current_filename, false, env, body, sink).await?;
                return Ok(true);
            }
        }
    }
}

/// A zero-length body source for the authorizer pass: the authorizer
/// never streams a request body.
struct EmptyBody;
impl RequestBodySource for EmptyBody {
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        None
    }
    fn is_complete(&self) -> bool {
        true
    }
    fn declared_length(&self) -> Option<u64> {
        Some(0)
    }
}

/// Retries a single backend exchange up to [`MAX_ATTEMPTS`] times,
/// reselecting a host/proc on every retryable failure. A failure after
/// any response byte has reached the client is never retried.
async fn run_with_reconnect(
    gateway: &mut Gateway,
    first_outcome: &DispatchOutcome,
    filename: &str,
    is_authorizer: bool,
    env: &dyn CgiEnvironmentSource,
    body: &mut dyn RequestBodySource,
    sink: &mut dyn ResponseHeaderSink,
) -> GatewayResult<crate::codec::EndRequestBody> {
    let mut outcome_owned: Option<DispatchOutcome> = None;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = outcome_owned.as_ref().unwrap_or(first_outcome);

        match run_one_exchange(gateway, outcome, env, body, sink).await {
            Ok(end) => {
                release_proc(gateway, outcome, true);
                return Ok(end);
            }
            Err(Failure::Terminal { err, got_proc }) => {
                release_proc(gateway, outcome, got_proc);
                return Err(err);
            }
            Err(Failure::Retryable { err, overloaded, got_proc, proc_pid }) => {
                release_proc(gateway, outcome, got_proc);
                let host_id = outcome.host_id.clone();
                let proc_id = outcome.proc_id;
                let tag = BackendTag { host_id: &host_id, proc_id: Some(proc_id) };
                if overloaded {
                    if let Some(host) = gateway.hosts.get_mut(&host_id) {
                        host.mark_overloaded(proc_id);
                    }
                    gateway.metrics.incr_backend(tag, Counter::Overloaded, 1);
                } else {
                    if let Some(host) = gateway.hosts.get_mut(&host_id) {
                        host.disable_proc(proc_id, proc_pid);
                    }
                    gateway.metrics.incr_backend(tag, Counter::Died, 1);
                }

                if attempt >= MAX_ATTEMPTS {
                    return Err(GatewayError::new(GatewayErrorKind::ReconnectsExhausted { attempts: attempt }));
                }
                // fcgi_restart_dead_procs: give a drained local proc a
                // chance to come back before fcgi_reconnect reselects, so
                // a request that just killed its host's only local proc
                // can still recover within this reconnect budget.
                let env_provider = gateway.env_provider.clone();
                supervisor::restart_dead_procs(gateway, &host_id, env_provider.as_ref()).await;
                let Some(next) = dispatch(gateway, filename, is_authorizer, true)? else {
                    return Err(err);
                };
                outcome_owned = Some(next);
            }
        }
    }
}

/// Releases the load unit acquired by a successful connect. `got_proc`
/// mirrors the data model's `got_proc` flag: it's false for a failure
/// that happened before the proc/host load increment (e.g. connect
/// itself failing), in which case there is nothing to release.
fn release_proc(gateway: &mut Gateway, outcome: &DispatchOutcome, got_proc: bool) {
    if !got_proc {
        return;
    }
    if let Some(host) = gateway.hosts.get_mut(&outcome.host_id) {
        if let Some(proc) = host.find_proc_mut(outcome.proc_id) {
            if proc.generation == outcome.proc_generation {
                proc.decr_load();
            }
        }
    }
    gateway.metrics.incr_active_requests(-1);
}

/// One full connect -> write -> read cycle against the specific proc
/// named by `outcome`. The caller is responsible for retry policy.
async fn run_one_exchange(
    gateway: &mut Gateway,
    outcome: &DispatchOutcome,
    env: &dyn CgiEnvironmentSource,
    body: &mut dyn RequestBodySource,
    sink: &mut dyn ResponseHeaderSink,
) -> Result<crate::codec::EndRequestBody, Failure> {
    let tag = BackendTag { host_id: &outcome.host_id, proc_id: Some(outcome.proc_id) };

    let endpoint = gateway
        .hosts
        .get(&outcome.host_id)
        .map(|h| h.config.endpoint.clone())
        .ok_or_else(|| Failure::Terminal { err: GatewayError::new(GatewayErrorKind::Internal("host vanished mid-request".into())), got_proc: false })?;

    // The pid this proc slot held when this attempt started, so a
    // disable triggered by this attempt's own failure can identify
    // "this request just killed exactly this process" (spec §4.B).
    // Captured once up front rather than re-read per failure site, so
    // a respawn racing with this exchange can't be mistaken for the
    // proc this attempt is actually bound to.
    let proc_pid: Option<u32> = gateway
        .hosts
        .get(&outcome.host_id)
        .and_then(|h| h.procs.iter().find(|p| p.id == outcome.proc_id && p.generation == outcome.proc_generation))
        .filter(|p| p.is_local)
        .map(|p| p.pid);

    // INIT -> CONNECT_DELAYED (awaited inline) -> PREPARE_WRITE. A
    // non-blocking connect failing with EAGAIN means the backend's
    // listen queue is full (OVERLOADED); any other error (e.g.
    // ECONNREFUSED, ENOENT) means the backend is DEAD.
    let mut stream = connect_backend(&endpoint).await.map_err(|e| {
        let overloaded = e.kind() == std::io::ErrorKind::WouldBlock;
        // No proc/host load was ever incremented for this attempt (that
        // happens only once the connection is established, below), so
        // the retry path must not release a load unit that was never
        // acquired.
        Failure::Retryable { err: GatewayError::new(GatewayErrorKind::ConnectFailed(e)), overloaded, got_proc: false, proc_pid }
    })?;

    if let Some(host) = gateway.hosts.get_mut(&outcome.host_id) {
        if let Some(proc) = host.find_proc_mut(outcome.proc_id) {
            if proc.generation == outcome.proc_generation {
                proc.incr_load();
            }
        }
    }
    gateway.metrics.incr_backend(tag, Counter::Load, 1);
    gateway.metrics.incr_backend(tag, Counter::Connected, 1);
    gateway.metrics.incr_active_requests(1);
    gateway.metrics.incr_requests(1);

    // PREPARE_WRITE: assemble BEGIN_REQUEST + PARAMS + empty PARAMS.
    let pairs = env.cgi_environment();
    let params = encode_params(&pairs).ok_or_else(|| Failure::terminal(GatewayError::new(GatewayErrorKind::EnvironmentTooLarge)))?;

    let mut out = encode_begin_request(outcome.mode.role());
    out.extend(params);

    write_all(stream.as_mut(), &out).await.map_err(|e| write_failure(e, sink, proc_pid))?;

    // WRITE: stream the request body, chunked to the record limit,
    // then the terminating empty STDIN once the upstream body is
    // fully received.
    loop {
        match body.next_chunk() {
            Some(chunk) if !chunk.is_empty() => {
                let framed = encode_stdin_chunks(&chunk);
                write_all(stream.as_mut(), &framed).await.map_err(|e| write_failure(e, sink, proc_pid))?;
            }
            _ => {
                if body.is_complete() {
                    break;
                }
                // No chunk ready yet and the upstream body isn't fully
                // received: this is the "awaiting more request-body bytes"
                // suspension point. `RequestBodySource` is a plain
                // synchronous seam (the embedder owns the actual upstream
                // read), so yield back to the runtime instead of spinning
                // a worker thread hot while waiting for the embedder to
                // have more buffered.
                tokio::task::yield_now().await;
            }
        }
    }
    write_all(stream.as_mut(), &encode_empty(RecordType::Stdin)).await.map_err(|e| write_failure(e, sink, proc_pid))?;

    // READ: drain frames until END_REQUEST.
    let mut rb: Vec<u8> = Vec::new();
    let mut read_buf = [0u8; 16 * 1024];
    loop {
        loop {
            match decode_record(&rb) {
                DecodeOutcome::Record(rec) => {
                    rb.drain(..rec.consumed);
                    if rec.header.request_id != crate::codec::encode::REQUEST_ID {
                        continue;
                    }
                    match rec.header.record_type {
                        RecordType::Stdout => {
                            if !sink.file_started() {
                                let done = sink.feed_headers(&rec.payload);
                                let _ = done;
                            } else {
                                if outcome.mode == FcgiMode::Authorizer {
                                    let status = sink.status();
                                    if matches!(status, None | Some(200)) {
                                        continue;
                                    }
                                }
                                sink.push_body(&rec.payload);
                            }
                        }
                        RecordType::Stderr => sink.push_stderr(&rec.payload),
                        RecordType::EndRequest => {
                            if let Some(end) = decode_end_request_body(&rec.payload) {
                                return Ok(end);
                            }
                            return Err(Failure::terminal(GatewayError::new(GatewayErrorKind::Internal("malformed END_REQUEST body".into()))));
                        }
                        RecordType::Unknown(code) => {
                            debug!(record_type = code, "skipping unknown FastCGI record type");
                        }
                        RecordType::BeginRequest | RecordType::Params | RecordType::Stdin => {
                            debug!("unexpected outbound-only record type from backend, skipping");
                        }
                    }
                }
                DecodeOutcome::Incomplete => break,
            }
        }

        let n = stream.as_mut().read(&mut read_buf).await.map_err(|e| read_failure(e, sink, proc_pid))?;
        if n == 0 {
            return if sink.file_started() {
                Err(Failure::terminal(GatewayError::new(GatewayErrorKind::Truncated)))
            } else {
                Err(Failure::retryable(GatewayError::new(GatewayErrorKind::PrematureEof), proc_pid))
            };
        }
        rb.extend_from_slice(&read_buf[..n]);
    }
}

fn write_failure(err: std::io::Error, sink: &dyn ResponseHeaderSink, proc_pid: Option<u32>) -> Failure {
    let kind = GatewayErrorKind::WriteFailed(err);
    if sink.file_started() {
        Failure::terminal(GatewayError::new(GatewayErrorKind::Truncated))
    } else {
        Failure::retryable(GatewayError::new(kind), proc_pid)
    }
}

/// A read error past the point where any response byte has reached
/// the client is never retried (spec §7): re-dispatching would re-run
/// the whole exchange against a different backend and append its
/// body onto the one already flowing to the client.
fn read_failure(err: std::io::Error, sink: &dyn ResponseHeaderSink, proc_pid: Option<u32>) -> Failure {
    let kind = GatewayErrorKind::ReadFailed(err);
    if sink.file_started() {
        Failure::terminal(GatewayError::new(GatewayErrorKind::Truncated))
    } else {
        Failure::retryable(GatewayError::new(kind), proc_pid)
    }
}

async fn write_all(stream: &mut dyn DuplexStream, buf: &[u8]) -> std::io::Result<()> {
    stream.write_all(buf).await
}
