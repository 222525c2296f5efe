//! Gateway-wide error type. Every fallible operation in this crate
//! returns [`GatewayError`]; the HTTP status mapping lets an embedding
//! server turn a failure directly into a response per the error
//! handling table this crate implements.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{kind}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind) -> Self {
        GatewayError { kind }
    }

    /// HTTP status an embedding server should surface for this error.
    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

impl From<GatewayErrorKind> for GatewayError {
    fn from(kind: GatewayErrorKind) -> Self {
        GatewayError::new(kind)
    }
}

#[derive(Debug, Error)]
pub enum GatewayErrorKind {
    #[error("no healthy backend for extension {extension:?}")]
    AllHostsDown { extension: String },

    #[error("backend reconnect attempts exhausted ({attempts} attempts)")]
    ReconnectsExhausted { attempts: u32 },

    #[error("too many authorizer re-loops ({count})")]
    AuthorizerLoopLimit { count: u32 },

    #[error("fastcgi environment exceeds 65535 bytes")]
    EnvironmentTooLarge,

    #[error("chunked request body with streaming-to-backend disabled and no Content-Length")]
    LengthRequired,

    #[error("backend connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error("backend write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("backend read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("premature eof from backend before response headers were produced")]
    PrematureEof,

    #[error("response already started; backend failure truncates it")]
    Truncated,

    #[error("spawn failed for backend {bin_path:?}: {source}")]
    SpawnFailed { bin_path: String, #[source] source: std::io::Error },

    #[error("backend {bin_path:?} exited immediately after spawn")]
    ChildExitedImmediately { bin_path: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayErrorKind::AllHostsDown { .. } => 503,
            GatewayErrorKind::ReconnectsExhausted { .. } => 503,
            GatewayErrorKind::AuthorizerLoopLimit { .. } => 500,
            GatewayErrorKind::EnvironmentTooLarge => 400,
            GatewayErrorKind::LengthRequired => 411,
            GatewayErrorKind::ConnectFailed(_) => 503,
            GatewayErrorKind::WriteFailed(_) => 502,
            GatewayErrorKind::ReadFailed(_) => 502,
            GatewayErrorKind::PrematureEof => 500,
            GatewayErrorKind::Truncated => 200, // response already started; body is simply cut short
            GatewayErrorKind::SpawnFailed { .. } => 500,
            GatewayErrorKind::ChildExitedImmediately { .. } => 500,
            GatewayErrorKind::Configuration(_) => 500,
            GatewayErrorKind::Internal(_) => 500,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
