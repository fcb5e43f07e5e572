//! RTMP protocol plumbing
//!
//! - handshake (simple variant)
//! - chunk framing/deframing
//! - the message-level connection with control handling and acks

pub mod chunk;
pub mod connection;
pub mod constants;
pub mod handshake;

pub use chunk::{BufferArena, ChunkMessage, ChunkReader};
pub use connection::{media_message, Connection};
pub use handshake::{handshake_client, handshake_server, Handshake, Role, HANDSHAKE_TIMEOUT};
