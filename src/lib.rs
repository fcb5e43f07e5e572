//! rill — a live-streaming media server
//!
//! Ingests RTMP publish streams and fans them out in near real time:
//!
//! - RTMP playback (port 1935)
//! - HTTP-FLV and WebSocket-FLV (port 7001)
//! - HLS with a sliding three-segment window (port 7002)
//! - optional on-disk FLV recording
//! - optional upstream RTMP relays (static push, API-driven push/pull)
//!
//! Channels are identified by `app/stream` names; publishing requires the
//! channel's opaque key (`?k=...`), minted through the control API.
//!
//! The crate is a library plus the `rill` binary; every subsystem is
//! separately usable (and tested) against in-memory transports.

pub mod amf;
pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod hls;
pub mod httpflv;
pub mod keystore;
pub mod media;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use keystore::ChannelKeys;
pub use registry::{ChannelRegistry, Packet, StreamConsumer, StreamInfo, StreamProducer};
pub use server::RtmpServer;
