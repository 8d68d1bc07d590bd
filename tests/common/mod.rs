#![allow(dead_code)]

use async_trait::async_trait;
use mc_runner::console::{ConsoleEndpoint, RemoteConsole};
use mc_runner::error::{ConsoleError, QueryError};
use mc_runner::protocol;
use mc_runner::status::{StatusInfo, StatusSource};
use mockall::mock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

mock! {
    pub Console {}

    #[async_trait]
    impl RemoteConsole for Console {
        async fn probe_reachable(&self, endpoint: &ConsoleEndpoint, timeout: Duration) -> bool;
        async fn run_command(
            &self,
            endpoint: &ConsoleEndpoint,
            password: &str,
            command: &str,
            timeout: Duration,
        ) -> Result<String, ConsoleError>;
    }
}

mock! {
    pub Status {}

    #[async_trait]
    impl StatusSource for Status {
        async fn query_status(&self, address: &str, timeout: Duration) -> Result<StatusInfo, QueryError>;
    }
}

/// Status info as a healthy server would report it
pub fn status_info(online: u32) -> StatusInfo {
    StatusInfo {
        version_name: "1.21.1".to_string(),
        online_players: online,
        max_players: 20,
        latency_ms: 3.0,
    }
}

fn frame(packet_id: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    protocol::encode_varint(&mut body, packet_id);
    body.extend_from_slice(payload);

    let mut framed = Vec::new();
    protocol::encode_varint(&mut framed, body.len() as i32);
    framed.extend_from_slice(&body);
    framed
}

/// Fake status server answering one status query with `json`, echoing the
/// ping when `answer_ping` is set. Returns the address and the host/port
/// announced in the handshake.
pub async fn fake_status_server(
    json: &'static str,
    answer_ping: bool,
) -> (String, JoinHandle<(String, u16)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let (id, handshake) = protocol::read_frame(&mut stream).await.unwrap();
        assert_eq!(id, 0x00);
        let (_, offset) = protocol::decode_varint(&handshake).unwrap();
        let host = protocol::read_string(&handshake[offset..]).unwrap();
        let port_at = offset + 1 + host.len();
        let port = u16::from_be_bytes([handshake[port_at], handshake[port_at + 1]]);

        let (id, request) = protocol::read_frame(&mut stream).await.unwrap();
        assert_eq!(id, 0x00);
        assert!(request.is_empty());

        let mut payload = Vec::new();
        protocol::encode_varint(&mut payload, json.len() as i32);
        payload.extend_from_slice(json.as_bytes());
        stream.write_all(&frame(0x00, &payload)).await.unwrap();

        if answer_ping {
            if let Ok((0x01, ping)) = protocol::read_frame(&mut stream).await {
                stream.write_all(&frame(0x01, &ping)).await.unwrap();
            }
        }
        (host, port)
    });

    (address, handle)
}
