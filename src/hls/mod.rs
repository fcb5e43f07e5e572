//! HLS pipeline
//!
//! FLV packets → demux → codec parse (Annex-B/ADTS) → TS mux → a sliding
//! window of segments served over HTTP with a live M3U8.

pub mod cache;
pub mod segmenter;
pub mod server;
pub mod ts;

pub use cache::{TsCache, TsItem, MAX_SEGMENTS};
pub use segmenter::{HlsSegmenter, SEGMENT_MIN_MS};
pub use server::HlsServer;
pub use ts::{TsFrame, TsMuxer, TS_PACKET_LEN};
