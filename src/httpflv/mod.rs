//! HTTP-FLV and WebSocket-FLV delivery

pub mod server;
pub mod writer;

pub use server::HttpFlvServer;
pub use writer::{flv_preamble, flv_tag, ChannelSink, FlvSink, FlvWriter, FLV_HEADER};
