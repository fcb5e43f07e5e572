//! Client-side RTMP
//!
//! - the connector (handshake + command sequence, publish or play mode)
//! - the puller (remote stream → local producer)

pub mod connector;
pub mod puller;

pub use connector::{ClientMode, RtmpConnector, RtmpTarget};
pub use puller::RtmpPuller;
