//! Bounded packet queue with the backpressure policy
//!
//! Every consumer drains one of these on its own task. Producers push
//! without blocking; when the queue nears capacity the drop policy runs:
//! audio is kept (continuity), video keeps only sequence headers and
//! keyframes (recoverable at the next keyframe), the rest is shed.
//!
//! The policy lives here, transport-free, so it is testable on its own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::registry::packet::Packet;

/// Queue capacity in packets
pub const QUEUE_CAPACITY: usize = 1024;

/// Drop policy triggers this close to capacity
const DROP_TRIGGER: usize = QUEUE_CAPACITY - 24;

/// How many packets one policy run scans
const DROP_SCAN: usize = QUEUE_CAPACITY - 84;

/// Audio is re-queued while the queue stays under this bound
const AUDIO_KEEP_BOUND: usize = QUEUE_CAPACITY - 2;

/// Bounded multi-producer single-consumer packet queue
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<VecDeque<Packet>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(QUEUE_CAPACITY))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Push without blocking; runs the drop policy when nearly full.
    pub fn push(&self, packet: Packet) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        {
            let mut queue = self.inner.lock().unwrap();
            if queue.len() >= self.trigger() {
                apply_drop_policy(&mut queue, self.capacity);
            }
            queue.push_back(packet);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next packet; `None` once closed and drained.
    pub async fn pop(&self) -> Option<Packet> {
        loop {
            {
                let mut queue = self.inner.lock().unwrap();
                if let Some(packet) = queue.pop_front() {
                    return Some(packet);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue; pending packets still drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn trigger(&self) -> usize {
        self.capacity.saturating_sub(QUEUE_CAPACITY - DROP_TRIGGER)
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The backpressure policy: scan from the oldest end, keep audio while
/// room remains, keep video sequence headers and keyframes, drop the rest.
fn apply_drop_policy(queue: &mut VecDeque<Packet>, capacity: usize) {
    let audio_bound = capacity.saturating_sub(QUEUE_CAPACITY - AUDIO_KEEP_BOUND);
    let scan = DROP_SCAN.min(queue.len());
    for _ in 0..scan {
        let Some(packet) = queue.pop_front() else {
            break;
        };
        if packet.is_audio() {
            if queue.len() <= audio_bound {
                queue.push_back(packet);
            }
        } else if packet.is_video() {
            let keep = packet
                .video_header()
                .map(|h| h.is_sequence_header() || h.is_key_frame())
                .unwrap_or(false);
            if keep {
                queue.push_back(packet);
            }
        }
        // metadata re-sends on publisher change; shed here
    }
}
