//! Stream multiplexer
//!
//! The registry of active channels. Each channel owns one producer, a
//! packet cache for late joiners, and any number of consumers; a
//! per-channel task pulls packets and fans them out.
//!
//! ```text
//!                       ChannelRegistry
//!                 ┌──────────────────────────┐
//!                 │ channels: map<key,       │
//!                 │   Channel {              │
//!                 │     cache: PacketCache,  │
//!                 │     writers: map<uid>,   │
//!                 │   }                      │
//!                 └───────────┬──────────────┘
//!                             │ fan-out task per channel
//!        ┌────────────────────┼────────────────────┐
//!        ▼                    ▼                    ▼
//!   [RTMP player]       [HTTP-FLV body]      [HLS segmenter]
//!   PacketQueue(1024)   PacketQueue(1024)    PacketQueue(512)
//! ```
//!
//! Payloads are reference-counted `Bytes`; fan-out clones packets, not
//! media bytes.

pub mod cache;
pub mod channel;
pub mod packet;
pub mod queue;
pub mod rwbase;
pub mod store;

pub use cache::{GopRing, PacketCache, MAX_GOP_PACKETS};
pub use channel::{Channel, NoopPush, PushDispatcher, STOP_OLD};
pub use packet::{new_uid, Packet, PacketKind, StreamConsumer, StreamInfo, StreamProducer};
pub use queue::{PacketQueue, QUEUE_CAPACITY};
pub use rwbase::{RwBase, MEDIA_TIMEOUT};
pub use store::{ChannelHandle, ChannelRegistry, ChannelStat, SWEEP_INTERVAL};
