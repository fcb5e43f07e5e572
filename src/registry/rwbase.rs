//! Shared reader/writer bookkeeping
//!
//! Every stream endpoint carries one of these: the liveness clock the 5 s
//! sweep checks, and the timestamp base that keeps playback continuous
//! when a publisher is replaced.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::registry::packet::PacketKind;

/// Media-path liveness timeout
pub const MEDIA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Inner {
    pre_time: Instant,
    base_timestamp: u32,
    last_video_ts: u32,
    last_audio_ts: u32,
}

/// Liveness + timestamp-base state, shared via `Arc`
#[derive(Debug)]
pub struct RwBase {
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl RwBase {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(Inner {
                pre_time: Instant::now(),
                base_timestamp: 0,
                last_video_ts: 0,
                last_audio_ts: 0,
            }),
        }
    }

    /// Touch the liveness clock
    pub fn set_pre_time(&self) {
        self.inner.lock().unwrap().pre_time = Instant::now();
    }

    /// Alive while the last touch is within the timeout
    pub fn alive(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.pre_time.elapsed() < self.timeout
    }

    pub fn base_timestamp(&self) -> u32 {
        self.inner.lock().unwrap().base_timestamp
    }

    /// Record the timestamp actually sent for a media kind
    pub fn rec_timestamp(&self, timestamp: u32, kind: PacketKind) {
        let mut inner = self.inner.lock().unwrap();
        match kind {
            PacketKind::Video => inner.last_video_ts = timestamp,
            PacketKind::Audio => inner.last_audio_ts = timestamp,
            PacketKind::Metadata => {}
        }
    }

    /// Rebase on publisher replacement: the next stream continues from the
    /// largest timestamp this endpoint has observed.
    pub fn calc_base_timestamp(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_timestamp = inner.last_video_ts.max(inner.last_audio_ts);
    }
}

impl Default for RwBase {
    fn default() -> Self {
        Self::new(MEDIA_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_until_timeout() {
        let base = RwBase::new(Duration::from_millis(20));
        assert!(base.alive());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!base.alive());
        base.set_pre_time();
        assert!(base.alive());
    }

    #[test]
    fn test_base_timestamp_takes_latest_track() {
        let base = RwBase::default();
        base.rec_timestamp(500, PacketKind::Video);
        base.rec_timestamp(800, PacketKind::Audio);
        assert_eq!(base.base_timestamp(), 0);

        base.calc_base_timestamp();
        assert_eq!(base.base_timestamp(), 800);

        base.rec_timestamp(1200, PacketKind::Video);
        base.calc_base_timestamp();
        assert_eq!(base.base_timestamp(), 1200);
    }

    #[test]
    fn test_metadata_does_not_move_base() {
        let base = RwBase::default();
        base.rec_timestamp(999, PacketKind::Metadata);
        base.calc_base_timestamp();
        assert_eq!(base.base_timestamp(), 0);
    }
}
