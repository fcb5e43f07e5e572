//! Server-side RTMP sessions
//!
//! The command state machine that accepts publishers and players, and the
//! media endpoints a finished session turns into.

pub mod endpoint;
pub mod server;

pub use endpoint::{RtmpConsumer, RtmpProducer};
pub use server::{
    command_message, decode_command, AllowAll, PublishAuth, ServerSession, SessionOutcome,
};
