//! Spawner (component G): bind/listen plus fork+exec of local
//! backends with an inherited listening socket on fd 0.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;

use socket2::{Domain, SockAddr, Socket, Type};
use tracing::{debug, info, warn};

use crate::codec::header::LISTENSOCK_FILENO;
use crate::config::{EndpointConfig, HostConfig};
use crate::env_provider::EnvironmentProvider;
use crate::error::{GatewayError, GatewayErrorKind, GatewayResult};

/// Name FastCGI child processes look for if their environment doesn't
/// already declare a worker-count hint. PHP-FPM/php-cgi both honor it.
const PHP_FCGI_CHILDREN: &str = "PHP_FCGI_CHILDREN";

pub struct SpawnedProcess {
    pub child: tokio::process::Child,
    pub pid: u32,
}

/// Outcome of attempting to stand up one configured proc.
pub enum SpawnOutcome {
    /// A child was forked against a freshly bound listening socket.
    Local(SpawnedProcess),
    /// The probe-connect succeeded: something else already owns this
    /// endpoint, so no child is forked and the proc is treated as remote.
    ExternallyManaged,
}

/// Resolves, probes, and (if nothing answers) binds+forks a backend
/// for `host`: probe-connect first; on success assume an externally
/// managed process; on failure (stale socket or nothing listening)
/// bind fresh and fork the configured `bin_path`.
pub async fn spawn(host: &HostConfig, env_provider: &dyn EnvironmentProvider) -> GatewayResult<SpawnOutcome> {
    let Some(bin_path) = host.bin_path.clone() else {
        return Ok(SpawnOutcome::ExternallyManaged);
    };

    let endpoint = host.endpoint.clone();
    if probe_connect(&endpoint).await {
        info!(host = %host.id, "endpoint already answers, treating as externally managed");
        return Ok(SpawnOutcome::ExternallyManaged);
    }

    let listen_backlog = host.listen_backlog;
    let env = build_child_environment(host, env_provider);

    let (socket, argv) = tokio::task::spawn_blocking({
        let endpoint = endpoint.clone();
        let bin_path = bin_path.clone();
        move || -> io::Result<(Socket, Vec<String>)> {
            let socket = bind_and_listen(&endpoint, listen_backlog)?;
            let argv = tokenize_bin_path(&bin_path);
            Ok((socket, argv))
        }
    })
    .await
    .map_err(|e| GatewayError::new(GatewayErrorKind::Internal(format!("spawn blocking task panicked: {e}"))))?
    .map_err(|e| GatewayError::new(GatewayErrorKind::SpawnFailed { bin_path: bin_path.clone(), source: e }))?;

    if argv.is_empty() {
        return Err(GatewayError::new(GatewayErrorKind::Configuration(format!("bin-path {bin_path:?} has no executable token"))));
    }

    let listen_fd = socket.as_raw_fd();

    let mut command = tokio::process::Command::new(&argv[0]);
    command.args(&argv[1..]);
    command.env_clear();
    command.envs(env);
    command.kill_on_drop(true);

    // SAFETY: the closure only calls async-signal-safe libc functions
    // (dup2) between fork and exec, as required by `pre_exec`.
    unsafe {
        command.pre_exec(move || {
            if libc::dup2(listen_fd, LISTENSOCK_FILENO) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = command
        .spawn()
        .map_err(|e| GatewayError::new(GatewayErrorKind::SpawnFailed { bin_path: bin_path.clone(), source: e }))?;
    let pid = child.id().unwrap_or(0);

    // The parent's copy of the listening socket is no longer needed
    // once the child has inherited it via dup2.
    drop(socket);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    match child.try_wait() {
        Ok(Some(status)) => {
            warn!(host = %host.id, pid, %status, "backend exited immediately after spawn");
            Err(GatewayError::new(GatewayErrorKind::ChildExitedImmediately { bin_path }))
        }
        Ok(None) => {
            debug!(host = %host.id, pid, "backend spawned");
            Ok(SpawnOutcome::Local(SpawnedProcess { child, pid }))
        }
        Err(e) => {
            warn!(host = %host.id, pid, %e, "waitpid anomaly immediately after spawn");
            Err(GatewayError::new(GatewayErrorKind::ChildExitedImmediately { bin_path }))
        }
    }
}

async fn probe_connect(endpoint: &EndpointConfig) -> bool {
    match endpoint {
        EndpointConfig::Tcp { host, port } => tokio::net::TcpStream::connect((host.as_str(), *port)).await.is_ok(),
        EndpointConfig::Unix { path } => tokio::net::UnixStream::connect(path).await.is_ok(),
    }
}

/// Binds and listens a fresh non-blocking, close-on-exec socket with
/// `SO_REUSEADDR` and the configured backlog. For a unix-domain
/// endpoint, a stale socket file left by a dead prior instance is
/// unlinked before rebinding (the probe-connect above having already
/// ruled out a live listener at this path).
fn bind_and_listen(endpoint: &EndpointConfig, backlog: i32) -> io::Result<Socket> {
    match endpoint {
        EndpointConfig::Tcp { host, port } => {
            let addr: std::net::SocketAddr = format!("{host}:{port}").parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid host:port"))?;
            let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let socket = Socket::new(domain, Type::STREAM, None)?;
            socket.set_reuse_address(true)?;
            socket.set_nonblocking(true)?;
            socket.bind(&SockAddr::from(addr))?;
            socket.listen(backlog)?;
            Ok(socket)
        }
        EndpointConfig::Unix { path } => {
            if let Err(e) = std::os::unix::net::UnixStream::connect(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    let _ = std::fs::remove_file(path);
                }
            }
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
            socket.set_nonblocking(true)?;
            let addr = SockAddr::unix(path)?;
            socket.bind(&addr)?;
            socket.listen(backlog)?;
            Ok(socket)
        }
    }
}

fn tokenize_bin_path(bin_path: &str) -> Vec<String> {
    bin_path.split_whitespace().map(str::to_string).collect()
}

/// Builds the child's environment: either a whitelist-copy of the
/// named ambient variables, or (if the whitelist is empty) a full
/// copy of the ambient environment; `bin_env` is then overlaid, and
/// `PHP_FCGI_CHILDREN` is injected only if nothing already defined it.
fn build_child_environment(host: &HostConfig, env_provider: &dyn EnvironmentProvider) -> HashMap<String, String> {
    let ambient = env_provider.ambient_env();
    let mut env: HashMap<String, String> = if host.bin_env_copy.is_empty() {
        ambient
    } else {
        host.bin_env_copy
            .iter()
            .filter_map(|name| ambient.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    };

    for (k, v) in &host.bin_env {
        env.insert(k.clone(), v.clone());
    }

    if !env.contains_key(PHP_FCGI_CHILDREN) {
        env.insert(PHP_FCGI_CHILDREN.to_string(), "1".to_string());
    }

    env
}
