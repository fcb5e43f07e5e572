//! Segment window and playlist generation
//!
//! Each channel keeps the three most recent TS segments in an
//! insertion-ordered window. Readers (the HTTP surface) take a lock-held
//! snapshot, so playlist generation never observes a half-updated window.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::RwLock;

use bytes::Bytes;

use crate::error::HlsError;

/// Segments retained per channel
pub const MAX_SEGMENTS: usize = 3;

/// One finished TS segment
#[derive(Debug, Clone)]
pub struct TsItem {
    pub name: String,
    pub seq: u64,
    pub duration_ms: i64,
    pub data: Bytes,
}

#[derive(Debug, Default)]
struct Window {
    order: VecDeque<String>,
    items: HashMap<String, TsItem>,
}

/// The per-channel segment window
#[derive(Debug)]
pub struct TsCache {
    key: String,
    window: RwLock<Window>,
}

impl TsCache {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            window: RwLock::new(Window::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Insert a segment, evicting the oldest past [`MAX_SEGMENTS`].
    ///
    /// Cuts inside one wall-clock second share a name; the newer segment
    /// replaces the older in place rather than duplicating the window.
    pub fn push(&self, item: TsItem) {
        let mut window = self.window.write().unwrap();
        if window.items.contains_key(&item.name) {
            window.items.insert(item.name.clone(), item);
            return;
        }
        if window.order.len() == MAX_SEGMENTS {
            if let Some(oldest) = window.order.pop_front() {
                window.items.remove(&oldest);
            }
        }
        window.order.push_back(item.name.clone());
        window.items.insert(item.name.clone(), item);
    }

    /// Segment lookup by name
    pub fn get(&self, name: &str) -> Result<TsItem, HlsError> {
        let window = self.window.read().unwrap();
        window
            .items
            .get(name)
            .cloned()
            .ok_or_else(|| HlsError::NoSegment(name.to_string()))
    }

    /// Drop every retained segment (publisher gone, keep-after-end off)
    pub fn clear(&self) {
        let mut window = self.window.write().unwrap();
        window.order.clear();
        window.items.clear();
    }

    pub fn len(&self) -> usize {
        self.window.read().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live playlist over the current window.
    pub fn m3u8(&self) -> String {
        let window = self.window.read().unwrap();

        let mut body = String::new();
        let mut max_duration: i64 = 0;
        let mut first_seq: u64 = 0;
        let mut have_seq = false;
        for name in &window.order {
            if let Some(item) = window.items.get(name) {
                max_duration = max_duration.max(item.duration_ms);
                if !have_seq {
                    have_seq = true;
                    first_seq = item.seq;
                }
                let _ = write!(
                    body,
                    "#EXTINF:{:.3},\n{}\n",
                    item.duration_ms as f64 / 1000.0,
                    item.name
                );
            }
        }

        format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-ALLOW-CACHE:NO\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:{}\n\n{}",
            max_duration / 1000 + 1,
            first_seq,
            body
        )
    }
}
