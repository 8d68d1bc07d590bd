use crate::error::ConsoleError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Login request carrying the console password
pub const PACKET_LOGIN: i32 = 3;
/// Command request
pub const PACKET_COMMAND: i32 = 2;
/// Login reply; shares its code with `PACKET_COMMAND`
pub const PACKET_AUTH_RESPONSE: i32 = 2;
/// Command reply
pub const PACKET_RESPONSE: i32 = 0;

/// Longest command body a server accepts from a client
pub const MAX_COMMAND_LEN: usize = 1446;

/// Request id a server puts in the login reply when the password is wrong
const AUTH_FAILED_ID: i32 = -1;

/// id + type + two terminating nulls
const HEADER_LEN: usize = 10;

/// Upper bound on an inbound frame; servers split replies at 4096 bytes
const MAX_FRAME_LEN: usize = 64 * 1024;

/// A remote console packet.
///
/// On the wire every packet is a little-endian `i32` length followed by the
/// request id, the packet type and a null-terminated body plus one padding
/// null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Client-chosen id echoed by the server
    pub request_id: i32,
    /// One of the `PACKET_*` codes
    pub packet_type: i32,
    /// Body text
    pub body: String,
}

impl RconPacket {
    /// Create a login packet
    pub fn login(request_id: i32, password: impl Into<String>) -> Self {
        Self {
            request_id,
            packet_type: PACKET_LOGIN,
            body: password.into(),
        }
    }

    /// Create a command packet
    pub fn command(request_id: i32, command: impl Into<String>) -> Self {
        Self {
            request_id,
            packet_type: PACKET_COMMAND,
            body: command.into(),
        }
    }

    /// Create a command reply packet
    pub fn response(request_id: i32, body: impl Into<String>) -> Self {
        Self {
            request_id,
            packet_type: PACKET_RESPONSE,
            body: body.into(),
        }
    }

    /// Whether this is a login reply rejecting the password
    pub fn is_auth_failure(&self) -> bool {
        self.request_id == AUTH_FAILED_ID
    }

    /// Encode the packet including its length prefix
    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let length = (HEADER_LEN + body.len()) as i32;

        let mut buf = Vec::with_capacity(4 + HEADER_LEN + body.len());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    /// Decode a packet from a frame that excludes the length prefix
    pub fn decode(frame: &[u8]) -> Result<Self, ConsoleError> {
        if frame.len() < HEADER_LEN {
            return Err(ConsoleError::Protocol(format!(
                "packet of {} bytes is shorter than its header",
                frame.len()
            )));
        }

        let request_id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let packet_type = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

        let payload = &frame[8..];
        let end = payload.iter().position(|b| *b == 0).ok_or_else(|| {
            ConsoleError::Protocol("packet body is not null-terminated".to_string())
        })?;
        let body = String::from_utf8_lossy(&payload[..end]).into_owned();

        Ok(Self {
            request_id,
            packet_type,
            body,
        })
    }
}

/// Write one packet and flush.
pub async fn write_packet<W>(writer: &mut W, packet: &RconPacket) -> Result<(), ConsoleError>
where
    W: AsyncWrite + Unpin,
{
    if packet.body.len() > MAX_COMMAND_LEN {
        return Err(ConsoleError::Protocol(format!(
            "body of {} bytes exceeds the {} byte limit",
            packet.body.len(),
            MAX_COMMAND_LEN
        )));
    }

    writer
        .write_all(&packet.encode())
        .await
        .map_err(|e| ConsoleError::Unreachable(format!("write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| ConsoleError::Unreachable(format!("flush failed: {}", e)))
}

/// Read one packet.
pub async fn read_packet<R>(reader: &mut R) -> Result<RconPacket, ConsoleError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0u8; 4];
    reader
        .read_exact(&mut length)
        .await
        .map_err(|e| ConsoleError::Unreachable(format!("connection closed: {}", e)))?;

    let length = i32::from_le_bytes(length);
    if length < HEADER_LEN as i32 || length as usize > MAX_FRAME_LEN {
        return Err(ConsoleError::Protocol(format!(
            "invalid packet length {}",
            length
        )));
    }

    let mut frame = vec![0u8; length as usize];
    reader
        .read_exact(&mut frame)
        .await
        .map_err(|e| ConsoleError::Unreachable(format!("connection closed: {}", e)))?;

    RconPacket::decode(&frame)
}
