//! One channel: a producer, its cache, and the consumer fan-out
//!
//! The fan-out task owns the producer and is the only writer of channel
//! state while running. Everything else reaches the channel through the
//! registry's shared handle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::registry::cache::PacketCache;
use crate::registry::packet::{Packet, StreamConsumer, StreamInfo, StreamProducer};
use crate::registry::rwbase::RwBase;

/// Reason handed to a replaced publisher
pub const STOP_OLD: &str = "stop old";

/// Forwarding hook for preconfigured upstream pushes.
///
/// The relay layer implements this; the registry only signals channel
/// start/stop and hands over ingested packets.
pub trait PushDispatcher: Send + Sync {
    fn start(&self, key: &str);
    fn forward(&self, key: &str, packet: &Packet);
    fn stop(&self, key: &str);
}

/// Dispatcher for configurations without static push
#[derive(Debug, Default)]
pub struct NoopPush;

impl PushDispatcher for NoopPush {
    fn start(&self, _key: &str) {}
    fn forward(&self, _key: &str, _packet: &Packet) {}
    fn stop(&self, _key: &str) {}
}

/// A consumer attached to a channel
pub(crate) struct WriterSlot {
    /// Set once the cache has been replayed to the consumer
    pub initialized: bool,
    pub consumer: Arc<dyn StreamConsumer>,
}

/// Per-channel state
pub struct Channel {
    pub(crate) info: StreamInfo,
    pub(crate) cache: PacketCache,
    pub(crate) reader_uid: Option<String>,
    pub(crate) reader_base: Option<Arc<RwBase>>,
    pub(crate) writers: HashMap<String, WriterSlot>,
    pub(crate) started: bool,
    stop_tx: watch::Sender<Option<String>>,
}

impl Channel {
    pub fn new(info: StreamInfo, gop_num: usize) -> Self {
        let (stop_tx, _) = watch::channel(None);
        Self {
            info,
            cache: PacketCache::new(gop_num),
            reader_uid: None,
            reader_base: None,
            writers: HashMap::new(),
            started: false,
            stop_tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn reader_uid(&self) -> Option<&str> {
        self.reader_uid.as_deref()
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    /// Consumers attached right now, for the stat surface
    pub fn writer_infos(&self) -> Vec<StreamInfo> {
        self.writers.values().map(|s| s.consumer.info()).collect()
    }

    /// Install a new producer and arm a fresh stop signal.
    pub(crate) fn install_reader(&mut self, producer: &dyn StreamProducer) -> watch::Receiver<Option<String>> {
        let info = producer.info();
        self.info = StreamInfo {
            interstitial: false,
            ..info.clone()
        };
        self.reader_uid = Some(info.uid);
        self.reader_base = Some(producer.base());
        self.started = true;
        let (stop_tx, stop_rx) = watch::channel(None);
        self.stop_tx = stop_tx;
        stop_rx
    }

    /// Signal the fan-out task to stop
    pub fn stop(&self, reason: &str) {
        let _ = self.stop_tx.send(Some(reason.to_string()));
    }

    pub fn add_writer(&mut self, consumer: Arc<dyn StreamConsumer>) {
        let uid = consumer.info().uid;
        debug!(channel = %self.info.key, writer = %uid, "writer attached");
        self.writers.insert(
            uid,
            WriterSlot {
                initialized: false,
                consumer,
            },
        );
    }

    /// Write one packet to every consumer. Fresh consumers get the cache
    /// replay first. A failing consumer is removed; siblings are
    /// untouched.
    pub(crate) fn fan_out(&mut self, packet: &Packet) {
        let mut dead = Vec::new();
        for (uid, slot) in self.writers.iter_mut() {
            if !slot.initialized {
                if let Err(e) = self.cache.send(slot.consumer.as_ref()) {
                    debug!(writer = %uid, error = %e, "cache replay failed, removing writer");
                    dead.push(uid.clone());
                    continue;
                }
                slot.initialized = true;
            } else if let Err(e) = slot.consumer.write_packet(packet.clone()) {
                debug!(writer = %uid, error = %e, "write failed, removing writer");
                dead.push(uid.clone());
            }
        }
        for uid in dead {
            self.writers.remove(&uid);
        }
    }

    /// Close consumers that should not outlive the publisher.
    pub(crate) fn close_interstitial(&mut self, reason: &str) {
        self.writers.retain(|uid, slot| {
            if slot.consumer.info().interstitial {
                debug!(writer = %uid, "closing interstitial writer");
                slot.consumer.close(reason);
                false
            } else {
                true
            }
        });
    }

    /// Liveness sweep: count live endpoints, drop dead writers.
    pub(crate) fn sweep(&mut self) -> usize {
        let mut live = 0;

        if self.started {
            let reader_ok = self.reader_base.as_ref().map(|b| b.alive()).unwrap_or(false);
            if reader_ok {
                live += 1;
            } else {
                info!(channel = %self.info.key, "reader timed out");
                self.stop("read timeout");
            }
        }

        let started = self.started;
        self.writers.retain(|uid, slot| {
            // writers waiting for a publisher are not held to the timeout
            if slot.consumer.alive() || !started {
                live += 1;
                true
            } else {
                info!(writer = %uid, "writer timed out, removing");
                slot.consumer.close("write timeout");
                false
            }
        });

        live
    }
}

/// The per-channel read/fan-out loop.
///
/// Owns the producer. Exits on producer error or a stop signal; either
/// way static pushes stop and interstitial consumers close.
pub(crate) async fn run_fanout(
    handle: Arc<RwLock<Channel>>,
    mut producer: Box<dyn StreamProducer>,
    mut stop_rx: watch::Receiver<Option<String>>,
    push: Arc<dyn PushDispatcher>,
) {
    let info = producer.info();
    info!(channel = %info.key, uid = %info.uid, "fan-out started");
    push.start(&info.key);

    loop {
        let packet = tokio::select! {
            _ = stop_rx.changed() => {
                let reason = stop_rx.borrow().clone().unwrap_or_default();
                info!(channel = %info.key, reason = %reason, "fan-out stopped");
                break;
            }
            result = producer.read_packet() => match result {
                Ok(packet) => packet,
                Err(e) => {
                    if e.is_disconnect() {
                        info!(channel = %info.key, "publisher disconnected");
                    } else {
                        warn!(channel = %info.key, error = %e, "publisher read failed");
                    }
                    break;
                }
            }
        };

        push.forward(&info.key, &packet);

        let mut channel = handle.write().await;
        if let Err(e) = channel.cache.write(&packet) {
            // a runaway GOP; caching restarts at the next keyframe
            if matches!(e, ChannelError::GopTooLarge) {
                warn!(channel = %info.key, "gop exceeded packet bound, cache reset");
            }
        }
        channel.fan_out(&packet);
    }

    push.stop(&info.key);

    let mut channel = handle.write().await;
    // only tear down if we are still the installed reader (a replacement
    // may already own the channel)
    if channel.reader_uid.as_deref() == Some(info.uid.as_str()) {
        channel.started = false;
        channel.reader_uid = None;
        channel.reader_base = None;
        channel.close_interstitial("closed");
    }
}
