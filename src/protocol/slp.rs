use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Port assumed when a status address has none
pub const DEFAULT_STATUS_PORT: u16 = 25565;

/// Protocol number sent in the handshake; servers answer status requests
/// regardless of the number a client announces.
pub const PROTOCOL_VERSION: i32 = 47;

const HANDSHAKE_ID: i32 = 0x00;
const STATUS_REQUEST_ID: i32 = 0x00;
const PING_ID: i32 = 0x01;
const NEXT_STATE_STATUS: i32 = 1;

/// Status responses are JSON documents; favicons keep them well below this
const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Version block of a status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusVersion {
    /// Human-readable version, e.g. `1.21.1` or `Paper 1.20.4`
    pub name: String,
    /// Protocol number
    pub protocol: i32,
}

/// Player block of a status response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPlayers {
    /// Slots
    pub max: u32,
    /// Players currently online
    pub online: u32,
}

/// JSON body of a status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server version
    pub version: StatusVersion,
    /// Player counts
    pub players: StatusPlayers,
    /// Message of the day, as a string or chat component
    #[serde(default)]
    pub description: Value,
}

/// Append `value` as a VarInt
pub fn encode_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
}

/// Decode a VarInt from the front of `bytes`, returning it and its length
pub fn decode_varint(bytes: &[u8]) -> Result<(i32, usize), QueryError> {
    let mut value: u32 = 0;
    for (i, byte) in bytes.iter().enumerate().take(5) {
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value as i32, i + 1));
        }
    }

    if bytes.len() < 5 {
        Err(QueryError::Protocol("truncated VarInt".to_string()))
    } else {
        Err(QueryError::Protocol("VarInt longer than 5 bytes".to_string()))
    }
}

async fn read_varint<R>(reader: &mut R) -> Result<i32, QueryError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    for i in 0..5 {
        let byte = reader
            .read_u8()
            .await
            .map_err(|e| QueryError::Unreachable(format!("connection closed: {}", e)))?;
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(QueryError::Protocol("VarInt longer than 5 bytes".to_string()))
}

fn encode_string(buf: &mut Vec<u8>, value: &str) {
    encode_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Decode a VarInt-prefixed UTF-8 string from the front of `bytes`
pub fn read_string(bytes: &[u8]) -> Result<String, QueryError> {
    let (len, offset) = decode_varint(bytes)?;
    let len = usize::try_from(len)
        .map_err(|_| QueryError::Protocol(format!("negative string length {}", len)))?;

    let raw = bytes
        .get(offset..offset + len)
        .ok_or_else(|| QueryError::Protocol("string runs past the packet".to_string()))?;

    String::from_utf8(raw.to_vec())
        .map_err(|e| QueryError::Protocol(format!("string is not UTF-8: {}", e)))
}

fn frame(packet_id: i32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 5);
    encode_varint(&mut body, packet_id);
    body.extend_from_slice(payload);

    let mut buf = Vec::with_capacity(body.len() + 5);
    encode_varint(&mut buf, body.len() as i32);
    buf.extend_from_slice(&body);
    buf
}

/// Handshake announcing a status query for `host:port`
pub fn handshake_packet(host: &str, port: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    encode_varint(&mut payload, PROTOCOL_VERSION);
    encode_string(&mut payload, host);
    payload.extend_from_slice(&port.to_be_bytes());
    encode_varint(&mut payload, NEXT_STATE_STATUS);
    frame(HANDSHAKE_ID, &payload)
}

/// Empty status request
pub fn status_request_packet() -> Vec<u8> {
    frame(STATUS_REQUEST_ID, &[])
}

/// Ping carrying `payload`, echoed back by the server
pub fn ping_packet(payload: i64) -> Vec<u8> {
    frame(PING_ID, &payload.to_be_bytes())
}

/// Read one length-prefixed packet, returning its id and remaining bytes
pub async fn read_frame<R>(reader: &mut R) -> Result<(i32, Vec<u8>), QueryError>
where
    R: AsyncRead + Unpin,
{
    let length = read_varint(reader).await?;
    let length = usize::try_from(length)
        .ok()
        .filter(|len| *len > 0 && *len <= MAX_FRAME_LEN)
        .ok_or_else(|| QueryError::Protocol(format!("invalid packet length {}", length)))?;

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| QueryError::Unreachable(format!("connection closed: {}", e)))?;

    let (packet_id, offset) = decode_varint(&body)?;
    Ok((packet_id, body.split_off(offset)))
}

/// Split a status address into host and port.
///
/// Accepts `host`, `host:port` and `[v6]:port`.
pub fn parse_address(address: &str) -> Result<(String, u16), QueryError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(QueryError::Protocol("empty server address".to_string()));
    }

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| QueryError::Protocol(format!("bad address '{}'", address)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(address, port)?,
            None if tail.is_empty() => DEFAULT_STATUS_PORT,
            None => return Err(QueryError::Protocol(format!("bad address '{}'", address))),
        };
        return Ok((host.to_string(), port));
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok((host.to_string(), parse_port(address, port)?))
        }
        // bare IPv6 literal or no port at all
        _ => Ok((address.to_string(), DEFAULT_STATUS_PORT)),
    }
}

fn parse_port(address: &str, port: &str) -> Result<u16, QueryError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| QueryError::Protocol(format!("bad port in address '{}'", address)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_known_values() {
        let cases: &[(i32, &[u8])] = &[
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (25565, &[0xdd, 0xc7, 0x01]),
            (2147483647, &[0xff, 0xff, 0xff, 0xff, 0x07]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];

        for (value, bytes) in cases {
            let mut buf = Vec::new();
            encode_varint(&mut buf, *value);
            assert_eq!(&buf, bytes, "encoding {}", value);
            assert_eq!(decode_varint(bytes).unwrap(), (*value, bytes.len()));
        }
    }

    #[test]
    fn varint_rejects_truncated_input() {
        assert!(decode_varint(&[0x80, 0x80]).is_err());
        assert!(decode_varint(&[0xff; 6]).is_err());
    }

    #[test]
    fn handshake_layout() {
        let packet = handshake_packet("localhost", 25565);

        // length, id 0x00, protocol 47, "localhost", port, next state 1
        let mut expected = vec![0x00, 47, 9];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&25565u16.to_be_bytes());
        expected.push(1);
        let mut framed = vec![expected.len() as u8];
        framed.extend_from_slice(&expected);

        assert_eq!(packet, framed);
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(parse_address("localhost").unwrap(), ("localhost".to_string(), 25565));
        assert_eq!(parse_address("mc.example.org:25570").unwrap(), ("mc.example.org".to_string(), 25570));
        assert_eq!(parse_address("[::1]:25566").unwrap(), ("::1".to_string(), 25566));
        assert!(parse_address("host:notaport").is_err());
        assert!(parse_address("").is_err());
    }
}
