//! Wire codecs for the remote console and the status protocol.

mod rcon;
mod slp;

pub use rcon::{
    MAX_COMMAND_LEN, PACKET_AUTH_RESPONSE, PACKET_COMMAND, PACKET_LOGIN, PACKET_RESPONSE,
    RconPacket, read_packet, write_packet,
};
pub use slp::{
    DEFAULT_STATUS_PORT, PROTOCOL_VERSION, StatusPlayers, StatusResponse, StatusVersion,
    decode_varint, encode_varint, handshake_packet, parse_address, ping_packet, read_frame,
    read_string, status_request_packet,
};
