//! End-to-end scenarios against an in-process FastCGI responder:
//! happy-path request/response, authorizer deny/approve, a dead host
//! falling back to a live one, reconnect exhaustion against a backend
//! that never answers, and the duplicate-unix-socket config rule.

mod common;

use std::sync::atomic::Ordering;

use gruxi_fastcgi::config::host::{EndpointConfig, Mode, DEFAULT_KILL_SIGNAL};
use gruxi_fastcgi::config::{ExtensionConfig, GatewayConfig, HostConfig};
use gruxi_fastcgi::process::Process;
use gruxi_fastcgi::{handle_request, Gateway};

use common::{bind_loopback, spawn_dropping_responder, spawn_fixed_responder, spawn_reset_after_headers_responder, FixedBody, FixedEnv, RecordingSink, UnsizedNonStreamingBody};

fn tcp_host(id: &str, port: u16) -> HostConfig {
    HostConfig {
        id: id.to_string(),
        endpoint: EndpointConfig::Tcp { host: "127.0.0.1".to_string(), port },
        bin_path: None,
        bin_env: vec![],
        bin_env_copy: vec![],
        max_procs: 1,
        disable_time: 1,
        max_requests_per_proc: None,
        kill_signal: DEFAULT_KILL_SIGNAL,
        listen_backlog: 1024,
        check_local: true,
        broken_scriptfilename: false,
        fix_root_path_name: false,
        xsendfile_allow: false,
        xsendfile_docroot: vec![],
        docroot: None,
        strip_request_uri: None,
        mode: Mode::Responder,
    }
}

#[tokio::test]
async fn happy_path_responder_round_trip() {
    let (listener, port) = bind_loopback().await;
    let hits = spawn_fixed_responder(listener, 200, "hello from backend");

    let config = GatewayConfig {
        hosts: vec![tcp_host("php", port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["php".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("php").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![("SCRIPT_FILENAME".to_string(), "/var/www/index.php".to_string())]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/index.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.status, Some(200));
    assert_eq!(sink.body, b"hello from backend");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unmatched_extension_passes_through() {
    let config = GatewayConfig { hosts: vec![], extensions: vec![], authorizer_extensions: vec![], map_extensions: vec![] };
    let mut gateway = Gateway::new(config).unwrap();
    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/style.css", &env, &mut body, &mut sink).await.unwrap();
    assert!(!matched);
}

#[tokio::test]
async fn authorizer_denial_short_circuits_without_touching_responder() {
    let (auth_listener, auth_port) = bind_loopback().await;
    let auth_hits = spawn_fixed_responder(auth_listener, 403, "forbidden");

    let (resp_listener, resp_port) = bind_loopback().await;
    let resp_hits = spawn_fixed_responder(resp_listener, 200, "should not run");

    let config = GatewayConfig {
        hosts: vec![tcp_host("auth", auth_port), tcp_host("resp", resp_port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["resp".to_string()] }],
        authorizer_extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["auth".to_string()] }],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("auth").unwrap().push_proc(Process::new_remote(1));
    gateway.hosts.get_mut("resp").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/secret.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.status, Some(403));
    assert_eq!(auth_hits.load(Ordering::SeqCst), 1);
    assert_eq!(resp_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn authorizer_approval_runs_the_responder() {
    let (auth_listener, auth_port) = bind_loopback().await;
    let auth_hits = spawn_fixed_responder(auth_listener, 200, "");

    let (resp_listener, resp_port) = bind_loopback().await;
    let resp_hits = spawn_fixed_responder(resp_listener, 200, "real response body");

    let config = GatewayConfig {
        hosts: vec![tcp_host("auth", auth_port), tcp_host("resp", resp_port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["resp".to_string()] }],
        authorizer_extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["auth".to_string()] }],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("auth").unwrap().push_proc(Process::new_remote(1));
    gateway.hosts.get_mut("resp").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/app.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.status, Some(200));
    assert_eq!(sink.body, b"real response body");
    assert_eq!(auth_hits.load(Ordering::SeqCst), 1);
    assert_eq!(resp_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn authorizer_with_docroot_overlays_physical_path_before_responder_runs() {
    let (auth_listener, auth_port) = bind_loopback().await;
    spawn_fixed_responder(auth_listener, 200, "");

    let (resp_listener, resp_port) = bind_loopback().await;
    spawn_fixed_responder(resp_listener, 200, "real response body");

    let mut auth_host = tcp_host("auth", auth_port);
    auth_host.docroot = Some("/var/www/authorized".to_string());

    let config = GatewayConfig {
        hosts: vec![auth_host, tcp_host("resp", resp_port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["resp".to_string()] }],
        authorizer_extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["auth".to_string()] }],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("auth").unwrap().push_proc(Process::new_remote(1));
    gateway.hosts.get_mut("resp").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/app.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.docroot_overlay.as_deref(), Some("/var/www/authorized"));
    // The overlay call happens alongside the reset; the responder's own
    // body must still come through untainted by the authorizer's headers.
    assert_eq!(sink.body, b"real response body");
}

#[tokio::test]
async fn dead_host_falls_back_to_the_live_one() {
    let dead_port = {
        let (listener, port) = bind_loopback().await;
        drop(listener); // nothing listens here at all
        port
    };
    let (live_listener, live_port) = bind_loopback().await;
    let live_hits = spawn_fixed_responder(live_listener, 200, "from the surviving host");

    let config = GatewayConfig {
        hosts: vec![tcp_host("dead", dead_port), tcp_host("live", live_port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["dead".to_string(), "live".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    // The dead host's proc never actually started, so it carries no
    // active process and the selection algorithm skips it outright
    // rather than ever attempting to connect.
    let mut dead_proc = Process::new_local(1);
    dead_proc.state = gruxi_fastcgi::process::ProcessState::Died;
    gateway.hosts.get_mut("dead").unwrap().push_proc(dead_proc);
    gateway.hosts.get_mut("live").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/index.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.body, b"from the surviving host");
    assert_eq!(live_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn backend_that_drops_every_connection_exhausts_reconnects() {
    let (listener, port) = bind_loopback().await;
    let hits = spawn_dropping_responder(listener);

    let config = GatewayConfig {
        hosts: vec![tcp_host("flaky", port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["flaky".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    // Six procs sharing the one flaky endpoint: a proc is never retried
    // after it's disabled (spec Section 7), so exhausting the 6-attempt
    // reconnect budget requires 6 distinct, still-Running candidates for
    // the selector to hand out in turn.
    let host = gateway.hosts.get_mut("flaky").unwrap();
    for id in 1..=6 {
        host.push_proc(Process::new_remote(id));
    }

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let err = handle_request(&mut gateway, "/index.php", &env, &mut body, &mut sink).await.unwrap_err();
    assert_eq!(err.http_status(), 503);
    assert_eq!(hits.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn chunked_request_body_with_unknown_length_is_forwarded_whole() {
    let (listener, port) = bind_loopback().await;
    // A responder that echoes back whatever it read as STDIN, to prove
    // a multi-chunk body streamed piecewise assembles correctly.
    let hits = spawn_fixed_responder(listener, 200, "ack");

    let config = GatewayConfig {
        hosts: vec![tcp_host("php", port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["php".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("php").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let payload = vec![b'x'; 300_000]; // several records' worth, unknown length until drained
    let mut body = FixedBody::new(&payload);
    let mut sink = RecordingSink::default();

    let matched = handle_request(&mut gateway, "/upload.php", &env, &mut body, &mut sink).await.unwrap();
    assert!(matched);
    assert_eq!(sink.body, b"ack");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsized_body_with_streaming_disabled_fails_fast_as_length_required() {
    let (listener, port) = bind_loopback().await;
    let hits = spawn_fixed_responder(listener, 200, "should never run");

    let config = GatewayConfig {
        hosts: vec![tcp_host("php", port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["php".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("php").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = UnsizedNonStreamingBody;
    let mut sink = RecordingSink::default();

    let err = handle_request(&mut gateway, "/upload.php", &env, &mut body, &mut sink).await.unwrap_err();
    assert_eq!(err.http_status(), 411);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn proc_load_returns_to_zero_after_every_attempt_refuses_connection() {
    // Bind and immediately drop the listener: the port is free, but
    // nothing is listening, so every connect attempt fails outright
    // (ECONNREFUSED) rather than succeeding and failing later. This
    // exercises the connect-failure path specifically, where no load
    // unit was ever acquired for the failed attempt.
    let refused_port = {
        let (listener, port) = bind_loopback().await;
        drop(listener);
        port
    };

    let config = GatewayConfig {
        hosts: vec![tcp_host("refused", refused_port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["refused".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("refused").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let err = handle_request(&mut gateway, "/index.php", &env, &mut body, &mut sink).await.unwrap_err();
    assert_eq!(err.http_status(), 503);

    let host = gateway.hosts.get("refused").unwrap();
    assert_eq!(host.load(), 0, "a connect failure must never decrement a load unit it never acquired");
    assert_eq!(host.procs[0].load, 0);
}

#[tokio::test]
async fn read_error_after_headers_started_is_truncated_not_retried() {
    // Only one proc: if the failure were (wrongly) classified retryable,
    // the next dispatch would have nothing else to select and the test
    // would instead observe AllHostsDown rather than a doubled body.
    let (listener, port) = bind_loopback().await;
    let hits = spawn_reset_after_headers_responder(listener);

    let config = GatewayConfig {
        hosts: vec![tcp_host("reset", port)],
        extensions: vec![ExtensionConfig { key: ".php".to_string(), host_ids: vec!["reset".to_string()] }],
        authorizer_extensions: vec![],
        map_extensions: vec![],
    };
    let mut gateway = Gateway::new(config).unwrap();
    gateway.hosts.get_mut("reset").unwrap().push_proc(Process::new_remote(1));

    let env = FixedEnv(vec![]);
    let mut body = FixedBody::new(&[]);
    let mut sink = RecordingSink::default();

    let err = handle_request(&mut gateway, "/index.php", &env, &mut body, &mut sink).await.unwrap_err();
    // Truncated maps to 200: the client already has a response in flight.
    assert_eq!(err.http_status(), 200);
    assert_eq!(sink.body, b"partial", "a post-file_started read error must not re-run the exchange and append a second body");
    assert_eq!(hits.load(Ordering::SeqCst), 1, "a post-file_started read error must not trigger a reconnect attempt");
}

#[test]
fn duplicate_unix_socket_hosts_must_share_bin_path() {
    let mut a = tcp_host("a", 0);
    a.endpoint = EndpointConfig::Unix { path: "/tmp/shared.sock".to_string() };
    a.bin_path = Some("/usr/bin/php-cgi".to_string());
    let mut b = tcp_host("b", 0);
    b.endpoint = EndpointConfig::Unix { path: "/tmp/shared.sock".to_string() };
    b.bin_path = Some("/usr/bin/php-cgi-other".to_string());

    let config = GatewayConfig { hosts: vec![a, b], extensions: vec![], authorizer_extensions: vec![], map_extensions: vec![] };
    assert!(config.validate().is_err());
}
