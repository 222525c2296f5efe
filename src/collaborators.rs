//! Trait seams for the concerns this crate deliberately does not
//! implement: HTTP header parsing, CGI environment assembly, response
//! header parsing, and response-body buffering all live in the
//! embedding server and are handed to the request state machine
//! through these traits.

/// Supplies the CGI/FastCGI environment (`HTTP_*` headers,
/// `SCRIPT_NAME`, `PATH_INFO`, `REQUEST_METHOD`, ...) for one request.
/// Assembly — including any `http_cgi_headers`-style logic — is the
/// embedder's responsibility; this crate only frames whatever pairs
/// are returned.
pub trait CgiEnvironmentSource: Send {
    fn cgi_environment(&self) -> Vec<(String, String)>;
}

/// Receives the backend's `STDOUT` bytes in arrival order and turns
/// them into an HTTP response. `feed_headers` is called repeatedly
/// with newly-arrived bytes until it reports the header block is
/// complete; every call after that goes to `push_body` instead.
pub trait ResponseHeaderSink: Send {
    /// Feeds more raw `STDOUT` bytes into the header parser. Returns
    /// `true` once the header block has been fully parsed and body
    /// streaming can begin (`file_started` in the state machine).
    fn feed_headers(&mut self, chunk: &[u8]) -> bool;

    fn push_body(&mut self, chunk: &[u8]);

    /// One `STDERR` payload, logged as diagnostic output.
    fn push_stderr(&mut self, chunk: &[u8]);

    /// `true` once headers have been fully parsed and body streaming
    /// has begun (used by the authorizer branch to decide whether a
    /// status is still droppable or must be forwarded as-is).
    fn file_started(&self) -> bool;

    /// The HTTP status the parsed headers declared, if known yet.
    fn status(&self) -> Option<u16>;

    /// Clears all accumulated header/body state (`connection_response_reset`
    /// in the original). Called once an authorizer pass is approved and the
    /// request is about to re-enter dispatch for the responder pass, so the
    /// authorizer's own `Status:`/body bytes never leak into the next pass.
    fn reset(&mut self);

    /// Overlays the backend's chroot-view docroot onto the embedder's
    /// physical-path state ahead of a responder re-dispatch, mirroring the
    /// original's `con->physical.{doc_root,basedir,path}` overwrite from
    /// `host->docroot`. Only called when the approving authorizer Host has
    /// a non-empty `docroot` configured. A no-op default lets embedders
    /// that don't track physical paths ignore it.
    fn overlay_docroot(&mut self, _docroot: &str) {}
}

/// Supplies the next slice of upstream request body bytes, or
/// signals that the body is fully received. Lets the state machine's
/// `WRITE` state opportunistically pull more bytes once its buffer
/// drops below the low-water mark without owning HTTP body framing
/// itself.
pub trait RequestBodySource: Send {
    /// Returns the next available chunk, or `None` if no more bytes
    /// are buffered upstream right now (the state machine should
    /// suspend until notified).
    fn next_chunk(&mut self) -> Option<Vec<u8>>;

    /// `true` once the upstream body is fully received (so
    /// `wb_reqlen` can be finalized and the terminating empty `STDIN`
    /// record emitted).
    fn is_complete(&self) -> bool;

    /// Total declared length, if known up front (`Content-Length`);
    /// `None` for a chunked body whose length is unknown until
    /// `is_complete` becomes true.
    fn declared_length(&self) -> Option<u64>;

    /// Whether this embedder is willing to stream a body of unknown
    /// length straight to the backend as it arrives. Defaults to `true`
    /// (this crate has no trouble framing `STDIN` without knowing the
    /// total length up front). An embedder that needs the whole body
    /// buffered before forwarding (e.g. to compute `Content-Length`
    /// itself) can return `false`; a chunked body with no declared
    /// length then fails fast as `411 Length Required` rather than
    /// streaming anyway.
    fn streaming_allowed(&self) -> bool {
        true
    }
}
