use mc_runner::config::{ServerRecord, Timeouts};
use mc_runner::console::{self, ConsoleEndpoint, PropertiesHint, RconClient, RemoteConsole};
use mc_runner::error::ConsoleError;
use mc_runner::protocol::{self, PACKET_AUTH_RESPONSE, PACKET_LOGIN, RconPacket};
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const PASSWORD: &str = "hunter2";

/// Fake console: serves one session, checks the password, answers one
/// command with `reply`, and returns the command it received.
///
/// Connections that close without sending anything (reachability probes)
/// are skipped.
async fn fake_console(
    reply: &'static str,
    empty_packet_first: bool,
) -> (ConsoleEndpoint, JoinHandle<Option<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, login) = loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            if let Ok(login) = protocol::read_packet(&mut stream).await {
                break (stream, login);
            }
        };
        assert_eq!(login.packet_type, PACKET_LOGIN);

        if empty_packet_first {
            protocol::write_packet(&mut stream, &RconPacket::response(login.request_id, ""))
                .await
                .unwrap();
        }

        let auth_id = if login.body == PASSWORD { login.request_id } else { -1 };
        let auth = RconPacket {
            request_id: auth_id,
            packet_type: PACKET_AUTH_RESPONSE,
            body: String::new(),
        };
        protocol::write_packet(&mut stream, &auth).await.unwrap();
        if auth_id == -1 {
            return None;
        }

        let command = protocol::read_packet(&mut stream).await.unwrap();
        protocol::write_packet(&mut stream, &RconPacket::response(command.request_id, reply))
            .await
            .unwrap();
        Some(command.body)
    });

    (ConsoleEndpoint::new("127.0.0.1", port), handle)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_run_command_returns_reply() {
    let (endpoint, server) = fake_console("There are 1 of a max of 20 players online: Alex", false).await;
    let client = RconClient::new();

    let reply = client
        .run_command(&endpoint, PASSWORD, "list", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(reply, "There are 1 of a max of 20 players online: Alex");
    assert_eq!(server.await.unwrap().as_deref(), Some("list"));
}

#[tokio::test]
async fn test_packets_before_auth_reply_are_skipped() {
    let (endpoint, server) = fake_console("Stopping the server", true).await;
    let client = RconClient::new();

    let reply = client
        .run_command(&endpoint, PASSWORD, "stop", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(reply, "Stopping the server");
    assert_eq!(server.await.unwrap().as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_wrong_password_is_auth_failure() {
    let (endpoint, server) = fake_console("unused", false).await;
    let client = RconClient::new();

    let result = client
        .run_command(&endpoint, "wrong", "list", Duration::from_secs(5))
        .await;

    assert_eq!(result, Err(ConsoleError::AuthFailed));
    assert_eq!(server.await.unwrap(), None);
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = ConsoleEndpoint::new("127.0.0.1", listener.local_addr().unwrap().port());

    // Accept and hold the connection without ever answering.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let client = RconClient::new();
    let timeout = Duration::from_millis(200);
    let result = client.run_command(&endpoint, PASSWORD, "list", timeout).await;

    assert_eq!(result, Err(ConsoleError::Timeout(timeout)));
    server.abort();
}

#[tokio::test]
async fn test_probe_and_unreachable_console() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = ConsoleEndpoint::new("127.0.0.1", listener.local_addr().unwrap().port());
    let closed = ConsoleEndpoint::new("127.0.0.1", closed_port().await);
    let client = RconClient::new();

    assert!(client.probe_reachable(&open, Duration::from_secs(2)).await);
    assert!(!client.probe_reachable(&closed, Duration::from_secs(2)).await);

    let result = client
        .run_command(&closed, PASSWORD, "list", Duration::from_secs(2))
        .await;
    assert!(matches!(result, Err(ConsoleError::Unreachable(_))));
}

#[tokio::test]
async fn test_diagnose_reads_server_properties() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("server.properties"),
        "enable-rcon=false\nrcon.password=\nrcon.port=25580\n",
    )
    .unwrap();

    let record = ServerRecord::new("survival", dir.path()).with_console("127.0.0.1", closed_port().await);
    let client = RconClient::new();

    let diagnosis = console::diagnose(&client, &record, Some(PASSWORD), &Timeouts::default()).await;

    assert!(!diagnosis.reachable);
    assert!(!diagnosis.is_healthy());
    assert_eq!(diagnosis.auth, None);
    assert_eq!(
        diagnosis.properties,
        Some(PropertiesHint::Found {
            enable_rcon: Some("false".to_string()),
            password_set: false,
            port: Some("25580".to_string()),
        })
    );
}

#[tokio::test]
async fn test_diagnose_healthy_console() {
    let (endpoint, server) = fake_console("There are 0 of a max of 20 players online: ", false).await;
    let record = ServerRecord::new("survival", "/nonexistent")
        .with_console(endpoint.host.clone(), endpoint.port);
    let client = RconClient::new();

    let diagnosis = console::diagnose(&client, &record, Some(PASSWORD), &Timeouts::default()).await;

    assert!(diagnosis.is_healthy());
    assert_eq!(diagnosis.auth, Some(Ok(())));
    assert_eq!(diagnosis.properties, None);
    assert_eq!(server.await.unwrap().as_deref(), Some("list"));
}

#[tokio::test]
async fn test_diagnose_without_password_skips_auth() {
    let dir = tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let record = ServerRecord::new("survival", dir.path())
        .with_console("127.0.0.1", listener.local_addr().unwrap().port());
    let client = RconClient::new();

    let diagnosis = console::diagnose(&client, &record, None, &Timeouts::default()).await;

    assert!(diagnosis.reachable);
    assert_eq!(diagnosis.auth, None);
    assert_eq!(diagnosis.properties, Some(PropertiesHint::Missing));
}
