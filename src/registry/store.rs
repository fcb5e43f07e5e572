//! Channel registry
//!
//! The concurrent map of active channels. Producers and consumers
//! register here; each started channel runs one fan-out task; a
//! background sweep retires dead endpoints and empty channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::registry::channel::{run_fanout, Channel, NoopPush, PushDispatcher, WriterSlot, STOP_OLD};
use crate::registry::packet::{StreamConsumer, StreamInfo, StreamProducer};

/// Liveness sweep period
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub type ChannelHandle = Arc<RwLock<Channel>>;

/// Stat snapshot of one channel (control API surface)
#[derive(Debug, Clone)]
pub struct ChannelStat {
    pub key: String,
    pub publisher: Option<StreamInfo>,
    pub players: Vec<StreamInfo>,
}

/// Registry of active channels
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelHandle>>,
    push: Arc<dyn PushDispatcher>,
    gop_num: usize,
}

impl ChannelRegistry {
    pub fn new(gop_num: usize, push: Arc<dyn PushDispatcher>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            push,
            gop_num: gop_num.max(1),
        }
    }

    /// Registry without static push (tests, minimal configs)
    pub fn without_push(gop_num: usize) -> Self {
        Self::new(gop_num, Arc::new(NoopPush))
    }

    /// Install a producer and start (or restart) the channel.
    ///
    /// An existing publisher with a different uid is stopped with
    /// "stop old"; its consumers move to the fresh channel uninitialized,
    /// with their timestamp bases recomputed, so each replays the new
    /// publisher's cache and continues monotonically.
    pub async fn register_producer(&self, producer: Box<dyn StreamProducer>) {
        let info = producer.info();
        debug!(channel = %info.key, uid = %info.uid, "register producer");

        let mut map = self.channels.write().await;
        let handle = match map.get(&info.key).cloned() {
            Some(existing) => {
                let mut old = existing.write().await;
                if old.started() && old.reader_uid() != Some(info.uid.as_str()) {
                    old.stop(STOP_OLD);
                    info!(channel = %info.key, "publisher replaced");

                    let mut fresh = Channel::new(info.clone(), self.gop_num);
                    for (uid, slot) in old.writers.drain() {
                        slot.consumer.base().calc_base_timestamp();
                        fresh.writers.insert(
                            uid,
                            WriterSlot {
                                initialized: false,
                                consumer: slot.consumer,
                            },
                        );
                    }
                    drop(old);
                    let fresh = Arc::new(RwLock::new(fresh));
                    map.insert(info.key.clone(), fresh.clone());
                    fresh
                } else {
                    drop(old);
                    existing
                }
            }
            None => {
                let channel = Arc::new(RwLock::new(Channel::new(info.clone(), self.gop_num)));
                map.insert(info.key.clone(), channel.clone());
                channel
            }
        };
        drop(map);

        let stop_rx = handle.write().await.install_reader(producer.as_ref());
        tokio::spawn(run_fanout(handle, producer, stop_rx, self.push.clone()));
    }

    /// Attach a consumer, creating the channel if it does not exist yet.
    pub async fn register_consumer(&self, consumer: Arc<dyn StreamConsumer>) {
        let info = consumer.info();
        debug!(channel = %info.key, uid = %info.uid, "register consumer");

        let mut map = self.channels.write().await;
        let handle = map
            .entry(info.key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Channel::new(info.clone(), self.gop_num))))
            .clone();
        drop(map);

        handle.write().await.add_writer(consumer);
    }

    pub async fn get(&self, key: &str) -> Option<ChannelHandle> {
        self.channels.read().await.get(key).cloned()
    }

    /// Does the channel have a live publisher right now
    pub async fn has_publisher(&self, key: &str) -> bool {
        match self.get(key).await {
            Some(handle) => handle.read().await.started(),
            None => false,
        }
    }

    /// Stop a channel's publisher and drop the channel (control API)
    pub async fn drop_channel(&self, key: &str, reason: &str) -> bool {
        let handle = self.channels.write().await.remove(key);
        match handle {
            Some(handle) => {
                let channel = handle.read().await;
                channel.stop(reason);
                true
            }
            None => false,
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Stat snapshot for the API.
    ///
    /// `None` when a specific room was asked for and no such channel
    /// exists, so the caller can answer 404 instead of an empty report.
    pub async fn snapshot(&self, room: Option<&str>) -> Option<Vec<ChannelStat>> {
        let map = self.channels.read().await;
        if let Some(room) = room {
            if !map.contains_key(room) {
                return None;
            }
        }
        let mut out = Vec::new();
        for (key, handle) in map.iter() {
            if let Some(room) = room {
                if room != key {
                    continue;
                }
            }
            let channel = handle.read().await;
            out.push(ChannelStat {
                key: key.clone(),
                publisher: if channel.started() {
                    Some(channel.info.clone())
                } else {
                    None
                },
                players: channel.writer_infos(),
            });
        }
        Some(out)
    }

    /// One sweep pass: drop dead endpoints, GC empty channels.
    pub async fn check_alive(&self) {
        let mut map = self.channels.write().await;
        let mut empty = Vec::new();
        for (key, handle) in map.iter() {
            let mut channel = handle.write().await;
            if channel.sweep() == 0 {
                empty.push(key.clone());
            }
        }
        for key in empty {
            info!(channel = %key, "channel removed");
            map.remove(&key);
        }
    }

    /// Background liveness sweep every [`SWEEP_INTERVAL`]
    pub fn spawn_liveness_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.check_alive().await;
            }
        })
    }
}
