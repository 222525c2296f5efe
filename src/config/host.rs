//! Typed configuration for one Host (backend pool).

use serde::{Deserialize, Serialize};

/// Default SIGTERM, the conventional `kill-signal` default.
pub const DEFAULT_KILL_SIGNAL: u8 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    Responder,
    Authorizer,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Responder
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointConfig {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Stable identifier used in metric keys and diagnostics, since
    /// hosts are keyed by id rather than by list position.
    pub id: String,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub bin_path: Option<String>,
    #[serde(default)]
    pub bin_env: Vec<(String, String)>,
    #[serde(default)]
    pub bin_env_copy: Vec<String>,
    #[serde(default = "default_max_procs")]
    pub max_procs: u16,
    #[serde(default = "default_disable_time")]
    pub disable_time: u16,
    #[serde(default)]
    pub max_requests_per_proc: Option<u32>,
    #[serde(default = "default_kill_signal")]
    pub kill_signal: u8,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
    #[serde(default = "default_true")]
    pub check_local: bool,
    #[serde(default)]
    pub broken_scriptfilename: bool,
    #[serde(default)]
    pub fix_root_path_name: bool,
    #[serde(default)]
    pub xsendfile_allow: bool,
    #[serde(default)]
    pub xsendfile_docroot: Vec<String>,
    #[serde(default)]
    pub docroot: Option<String>,
    #[serde(default)]
    pub strip_request_uri: Option<String>,
    #[serde(default)]
    pub mode: Mode,
}

fn default_max_procs() -> u16 {
    4
}
fn default_disable_time() -> u16 {
    1
}
fn default_kill_signal() -> u8 {
    DEFAULT_KILL_SIGNAL
}
fn default_listen_backlog() -> i32 {
    1024
}
fn default_true() -> bool {
    true
}

impl HostConfig {
    pub fn sanitize(&mut self) {
        self.id = self.id.trim().to_string();
        if let EndpointConfig::Unix { path } = &mut self.endpoint {
            *path = path.trim().to_string();
        }
        for prefix in &mut self.xsendfile_docroot {
            *prefix = prefix.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.id.is_empty() {
            errors.push("id must not be empty".to_string());
        }
        if self.max_procs == 0 {
            errors.push("max-procs must be at least 1".to_string());
        }
        if let EndpointConfig::Unix { path } = &self.endpoint {
            if path.is_empty() {
                errors.push("socket path must not be empty".to_string());
            }
        }
        if let EndpointConfig::Tcp { host, .. } = &self.endpoint {
            if host.is_empty() {
                errors.push("host must not be empty for a TCP endpoint".to_string());
            }
        }
        for prefix in &self.xsendfile_docroot {
            if !prefix.starts_with('/') {
                errors.push(format!("x-sendfile-docroot entry {prefix:?} must start with '/'"));
            }
        }
        if self.listen_backlog <= 0 {
            errors.push("listen-backlog must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn is_local(&self) -> bool {
        self.bin_path.is_some()
    }
}
