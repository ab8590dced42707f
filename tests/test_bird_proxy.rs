//! Integration tests for bird-proxy.
//!
//! For each test, we start a [MockServer], and exchange protocol data
//! with it to test

use bird_proxy::*;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use server::*;

macro_rules! test_sync_async_request {
    ($id:ident($mock:expr, $request:literal, $blank:literal, $reply:ident, $delay:literal) $test:block) => {
        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn $id() {
            let _ = env_logger::try_init();
            let server = MockServer::start_server($mock, $delay)
                .await
                .expect("failed to start server");
            let client = server.client();

            let mut async_conn = client.connection();
            let $reply = async_conn.execute($request, $blank).await;
            $test;
            async_conn.close();

            let $reply = tokio::task::spawn_blocking(move || {
                let mut sync_conn = client.sync_connection();
                sync_conn.execute($request, $blank)
            })
            .await
            .expect("sync request panicked");
            $test;

            server.wait_until(2, 3).await;
        }
    };

    ($id:ident($mock:expr, $request:literal, $blank:literal, $reply:ident) $test:block) => {
        test_sync_async_request!($id($mock, $request, $blank, $reply, 0) $test);
    };
}

const SHOW_STATUS: &str = concat!(
    "1000-BIRD 2.0.7\n",
    "1011-Router ID is 192.0.2.1\n",
    " Current server time is 2022-04-14 10:00:00.000\n",
    " Last reboot on 2022-04-14 09:00:00.000\n",
    "0013 Daemon is up and running\n",
);

const SHOW_STATUS_TEXT: &str = concat!(
    "BIRD 2.0.7\n",
    "Router ID is 192.0.2.1\n",
    "Current server time is 2022-04-14 10:00:00.000\n",
    "Last reboot on 2022-04-14 09:00:00.000\n",
    "Daemon is up and running\n",
);

const SHOW_PROTOCOLS_ALL: &str = concat!(
    "2002-Name       Proto      Table      State  Since         Info\n",
    "1002-device1    Device     ---        up     2022-04-14    \n",
    " \n",
    "1002-peer_as64496 BGP        ---        up     2022-04-14    Established   \n",
    "1006-  Description:    Transit one\n",
    "  BGP state:          Established\n",
    "    Neighbor address: 192.0.2.1\n",
    "    Neighbor AS:      64496\n",
    "  Channel ipv4\n",
    "    Routes:         12 imported, 4 exported, 10 preferred\n",
    " \n",
    "1002-peer_as64497 BGP        ---        start  2022-04-14    Active\n",
    "1006-  BGP state:          Active\n",
    "    Neighbor address: 2001:db8::2\n",
    "\n",
    "1006-never read\n",
    "0000 \n",
);

const CONFIG_OK: &str = "0002-Reading configuration from uploaded file\n0020 Configuration OK\n";
const RECONFIGURED: &str = "0002-Reading configuration from uploaded file\n0003 Reconfigured\n";
const SYNTAX_ERROR: &str =
    "0002-Reading configuration from uploaded file\n8002 uploaded:3:1 syntax error, unexpected '}'\n";

test_sync_async_request!(
    test_raw_request(&[("show status", SHOW_STATUS)], "show status", false, reply) {
        assert!(reply.success);
        assert_eq!(reply.text, SHOW_STATUS_TEXT);
    }
);

// Same as [test_raw_request], but the server sends the response in delayed
// batches, cutting lines in the middle, to test buffering.
test_sync_async_request!(
    test_raw_request_with_delays(&[("show status", SHOW_STATUS)], "show status", false, reply, 50) {
        assert!(reply.success);
        assert_eq!(reply.text, SHOW_STATUS_TEXT);
    }
);

test_sync_async_request!(
    test_error_code_stops_reading(
        &[("show protocols", "1002-device1 Device --- up\n8003 peer_x\n1002-after error\n0000 \n")],
        "show protocols \"peer_x\"",
        false,
        reply
    ) {
        assert!(!reply.success);
        assert_eq!(reply.text, "device1 Device --- up\nNo protocols match: peer_x\n");
    }
);

test_sync_async_request!(
    test_unknown_command(&[], "show nonsense", false, reply) {
        assert!(!reply.success);
        assert_eq!(
            reply.text,
            "Parse error: syntax error, unexpected CF_SYM_UNDEFINED\n"
        );
    }
);

test_sync_async_request!(
    test_unparsable_line_is_embedded(&[("show memory", "1018-Memory usage\n?garbage\n0000 \n")], "show memory", false, reply) {
        assert!(reply.success);
        assert_eq!(
            reply.text,
            "Memory usage\n<<<unparsable_string(?garbage)>>>\n"
        );
    }
);

test_sync_async_request!(
    test_blank_line_ends_reply(&[("show protocols all", SHOW_PROTOCOLS_ALL)], "show protocols all", true, reply, 20) {
        assert!(reply.success);
        assert!(reply.text.starts_with("Name       Proto"));
        assert!(reply.text.contains("peer_as64497"));
        assert!(!reply.text.contains("never read"));
    }
);

fn validate_sessions(outcome: Outcome<Vec<PeerSession>>) {
    let sessions = outcome.success().expect("expected sessions");
    assert_eq!(sessions.len(), 2);

    assert_eq!(sessions[0].session_name, "peer_as64496");
    assert!(matches!(&sessions[0].description, Some(x) if x == "Transit one"));
    assert!(matches!(&sessions[0].bgp_state, Some(x) if x == "Established"));
    assert_eq!(sessions[0].ip_address, Some("192.0.2.1".parse().unwrap()));
    assert_eq!(sessions[0].as_number, Some(64496));
    assert_eq!(
        sessions[0].prefixes,
        Prefixes {
            imported: 12,
            exported: 4,
            preferred: 10
        }
    );

    assert_eq!(sessions[1].session_name, "peer_as64497");
    assert!(sessions[1].description.is_none());
    assert!(matches!(&sessions[1].bgp_state, Some(x) if x == "Active"));
    assert_eq!(sessions[1].ip_address, Some("2001:db8::2".parse().unwrap()));
    assert_eq!(sessions[1].prefixes, Prefixes::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_show_protocols_all() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(&[("show protocols all", SHOW_PROTOCOLS_ALL)], 0)
        .await
        .expect("failed to start server");
    let client = server.client();

    let mut async_conn = client.connection();
    let outcome = async_conn
        .run(&ShowProtocolsAll, &[("wildcard", "\"peer_*\"")])
        .await
        .expect("failed to run command");
    validate_sessions(outcome);
    async_conn.close();

    let outcome = tokio::task::spawn_blocking(move || {
        client
            .sync_connection()
            .run(&ShowProtocolsAll, &[("wildcard", "")])
    })
    .await
    .expect("sync request panicked")
    .expect("failed to run command");
    validate_sessions(outcome);

    server.wait_until(2, 3).await;
    assert_eq!(
        server.requests().await,
        vec!["show protocols all \"peer_*\"", "show protocols all"]
    );
}

/// A missing argument is detected before the connection is even opened
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_argument_sends_nothing() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(&[], 0)
        .await
        .expect("failed to start server");

    let mut async_conn = server.client().connection();
    let result = async_conn.run(&VALIDATE_CONFIG, &[]).await;
    assert!(matches!(result, Err(Error::MissingArgument(name)) if name == "config_filename"));
    assert!(!async_conn.is_connected());
    assert!(server.requests().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_share_connection() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(
        &[("show status", SHOW_STATUS), ("show memory", "1018-Memory usage\n0000 \n")],
        0,
    )
    .await
    .expect("failed to start server");
    let client = server.client();

    let replies = tokio::task::spawn_blocking(move || {
        let mut sync_conn = client.sync_connection();
        let first = sync_conn.execute("show status", false);
        let connected = sync_conn.is_connected();
        let second = sync_conn.execute("show memory", false);
        sync_conn.close();
        (first, connected, second)
    })
    .await
    .expect("sync requests panicked");

    assert_eq!(replies.0.text, SHOW_STATUS_TEXT);
    assert!(replies.1);
    assert_eq!(replies.2.text, "Memory usage\n");

    // both requests went over a single connection
    server.wait_until(1, 3).await;
    assert_eq!(server.requests().await, vec!["show status", "show memory"]);
}

/// The daemon keeps sending after the blank line that ends a listing, so
/// the handle must not be reused for the next request as is
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reuse_after_blank_line_reply() {
    let _ = env_logger::try_init();
    let listing = concat!(
        "1002-peer_a BGP\n",
        "\n",
        "1002-peer_b BGP\n",
        "1006-  Description: second listing, long enough to arrive in a later read\n",
        "0000 \n",
    );
    let server = MockServer::start_server(
        &[("show protocols all", listing), ("show status", SHOW_STATUS)],
        50,
    )
    .await
    .expect("failed to start server");
    let client = server.client();

    let mut async_conn = client.connection();
    let reply = async_conn.execute("show protocols all", true).await;
    assert_eq!(reply.text, "peer_a BGP\n");
    assert!(!async_conn.is_connected());
    let reply = async_conn.execute("show status", false).await;
    assert!(reply.success);
    assert_eq!(reply.text, SHOW_STATUS_TEXT);
    async_conn.close();

    let replies = tokio::task::spawn_blocking(move || {
        let mut sync_conn = client.sync_connection();
        let first = sync_conn.execute("show protocols all", true);
        let connected = sync_conn.is_connected();
        let second = sync_conn.execute("show status", false);
        (first, connected, second)
    })
    .await
    .expect("sync requests panicked");
    assert_eq!(replies.0.text, "peer_a BGP\n");
    assert!(!replies.1);
    assert!(replies.2.success);
    assert_eq!(replies.2.text, SHOW_STATUS_TEXT);

    server.wait_until(4, 3).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tcp_endpoint() {
    let _ = env_logger::try_init();
    let server = MockServer::start_tcp_server(&[("show status", SHOW_STATUS)], 0)
        .await
        .expect("failed to start server");
    let client = server.client();
    assert!(matches!(client.endpoint(), Endpoint::Tcp { .. }));

    let reply = client.connection().execute("show status", false).await;
    assert!(reply.success);
    assert_eq!(reply.text, SHOW_STATUS_TEXT);

    let reply = tokio::task::spawn_blocking(move || {
        client.sync_connection().execute("show status", false)
    })
    .await
    .expect("sync request panicked");
    assert!(reply.success);
    assert_eq!(reply.text, SHOW_STATUS_TEXT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_server() {
    let _ = env_logger::try_init();
    let client = Client::for_unix_socket(std::env::temp_dir().join(format!(
        "test-bird-proxy-missing-{}.ctl",
        rand::random::<u32>()
    )));

    let reply = client.connection().execute("show status", false).await;
    assert!(!reply.success);
    assert!(reply.text.starts_with("BIRD connection problem: "));

    let reply = tokio::task::spawn_blocking(move || {
        client.sync_connection().execute("show status", false)
    })
    .await
    .expect("sync request panicked");
    assert!(!reply.success);
    assert!(reply.text.starts_with("BIRD connection problem: "));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unanswered_request_times_out() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(&[("show status", "")], 0)
        .await
        .expect("failed to start server");
    let client = server.client();

    let start = Instant::now();
    let reply = client.connection().execute("show status", false).await;
    assert!(!reply.success);
    assert!(reply.text.starts_with("BIRD connection problem: "));
    assert!(start.elapsed() < Duration::from_secs(3));

    let reply = tokio::task::spawn_blocking(move || {
        let mut sync_conn = client.sync_connection();
        let reply = sync_conn.execute("show status", false);
        (reply, sync_conn.is_connected())
    })
    .await
    .expect("sync request panicked");
    assert!(!reply.0.success);
    assert!(!reply.1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_after_hang_up() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(&[("down", HANG_UP), ("show status", SHOW_STATUS)], 0)
        .await
        .expect("failed to start server");

    let mut async_conn = server.client().connection();
    let reply = async_conn.execute("down", false).await;
    assert!(!reply.success);
    assert_eq!(reply.text, "BIRD connection problem: premature EOF");
    assert!(!async_conn.is_connected());

    let reply = async_conn.execute("show status", false).await;
    assert!(reply.success);
    assert_eq!(reply.text, SHOW_STATUS_TEXT);
    async_conn.close();

    server.wait_until(2, 3).await;
}

fn proxy_config(server: &MockServer, folder: &Path) -> ProxyConfig {
    ProxyConfig {
        bird_socket: server.endpoint.clone(),
        bird6_socket: Endpoint::Unix {
            path: folder.join("bird6.ctl"),
        },
        config_folder: folder.to_owned(),
        timeout_secs: 1,
    }
}

fn deploy(config: &ProxyConfig, filename: &str, content: &str) -> Result<Outcome<String>> {
    BirdManager::new("ipv4", config)?.deploy_config(&ConfigUpload::new(filename, content))
}

fn stored_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(folder)
        .expect("failed to list folder")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| !fs::symlink_metadata(path).unwrap().file_type().is_symlink())
        .collect();
    files.sort();
    files
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deploy_config() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(
        &[("configure check", CONFIG_OK), ("configure \"", RECONFIGURED)],
        0,
    )
    .await
    .expect("failed to start server");
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = proxy_config(&server, dir.path());
    let alias = dir.path().join("bird-ipv4-latest.conf");

    let worker_config = config.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        deploy(&worker_config, "edge.conf", "router id 192.0.2.1;\n")
    })
    .await
    .expect("deploy panicked")
    .expect("deploy failed");
    assert_eq!(
        outcome,
        Outcome::Success("Reading configuration from uploaded file\nReconfigured\n".to_owned())
    );

    let files = stored_files(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().ends_with("-edge.conf"));
    assert_eq!(fs::read(&alias).unwrap(), b"router id 192.0.2.1;\n");

    // validation and activation shared one connection
    server.wait_until(1, 3).await;
    assert_eq!(
        server.requests().await,
        vec![
            format!("configure check \"{}\"", files[0].display()),
            format!("configure \"{}\"", files[0].display()),
        ]
    );

    // a second deployment moves the alias
    let worker_config = config.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        deploy(&worker_config, "edge.conf", "router id 192.0.2.2;\n")
    })
    .await
    .expect("deploy panicked")
    .expect("deploy failed");
    assert!(outcome.is_success());
    assert_eq!(stored_files(dir.path()).len(), 2);
    assert_eq!(fs::read(&alias).unwrap(), b"router id 192.0.2.2;\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deploy_invalid_config() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(
        &[("configure check", SYNTAX_ERROR), ("configure \"", RECONFIGURED)],
        0,
    )
    .await
    .expect("failed to start server");
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = proxy_config(&server, dir.path());

    let outcome = tokio::task::spawn_blocking(move || deploy(&config, "broken.conf", "}"))
        .await
        .expect("deploy panicked")
        .expect("deploy failed");
    assert_eq!(
        outcome,
        Outcome::Failure(
            "Reading configuration from uploaded file\nConfiguration file error: uploaded:3:1 syntax error, unexpected '}'\n"
                .to_owned()
        )
    );

    // nothing is left behind, and the file was never activated
    assert!(stored_files(dir.path()).is_empty());
    assert!(fs::symlink_metadata(dir.path().join("bird-ipv4-latest.conf")).is_err());
    server.wait_until(1, 3).await;
    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("configure check \""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manager_queries() {
    let _ = env_logger::try_init();
    let server = MockServer::start_server(
        &[
            ("show protocols all", SHOW_PROTOCOLS_ALL),
            (
                "show route",
                "1007-192.0.2.0/24          unicast [peer_as64496 10:00:00.000] * (100) [AS64496i]\n \tvia 192.0.2.1 on eth0\n0000 \n",
            ),
        ],
        0,
    )
    .await
    .expect("failed to start server");
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = proxy_config(&server, dir.path());

    let (sessions, routes) = tokio::task::spawn_blocking(move || {
        let manager = BirdManager::new("ipv4", &config).expect("failed to create manager");
        let sessions = manager.protocol_information_verbose(Some("\"peer_*\""));
        let query = RouteQuery {
            forwarding_table: true,
            prefix: Some("192.0.2.0/24".into()),
            detail: true,
            ..Default::default()
        };
        (sessions, manager.routes_information(&query))
    })
    .await
    .expect("queries panicked");

    validate_sessions(sessions.expect("failed to query sessions"));
    let routes = routes.expect("failed to query routes");
    assert!(routes.is_success());

    server.wait_until(2, 3).await;
    assert_eq!(
        server.requests().await,
        vec![
            "show protocols all \"peer_*\"",
            "show route for 192.0.2.0/24 all"
        ]
    );
}

#[test]
fn test_invalid_address_family() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = ProxyConfig {
        bird_socket: Endpoint::Unix {
            path: dir.path().join("bird.ctl"),
        },
        bird6_socket: Endpoint::Unix {
            path: dir.path().join("bird6.ctl"),
        },
        config_folder: dir.path().to_owned(),
        timeout_secs: 1,
    };
    let result = deploy_with_family("ipv7", &config);
    assert!(matches!(result, Err(Error::InvalidAddressFamily(family)) if family == "ipv7"));
    assert!(stored_files(dir.path()).is_empty());
}

fn deploy_with_family(family: &str, config: &ProxyConfig) -> Result<Outcome<String>> {
    BirdManager::new(family, config)?.deploy_config(&ConfigUpload::new("a.conf", "a"))
}
