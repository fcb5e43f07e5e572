//! RTMP relays
//!
//! - [`StaticPushRegistry`]: preconfigured upstream publish targets that
//!   mirror every packet a channel ingests. Lives in the core state, keyed
//!   by push URL; `start`/`forward`/`stop` are driven by the channel
//!   fan-out through the [`PushDispatcher`] hook.
//! - [`RtmpRelay`]: an API-controlled play→publish pairing (pull brings a
//!   remote stream into this server, push mirrors a local stream out).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::connector::{ClientMode, RtmpConnector};
use crate::error::Result;
use crate::media::flv::{parse_header, TagHeader};
use crate::protocol::constants::msg;
use crate::registry::channel::PushDispatcher;
use crate::registry::packet::Packet;
use crate::registry::queue::PacketQueue;

/// Relay-side packet queue depth
const RELAY_QUEUE: usize = 500;

/// Control sentinel for a running relay leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayControl {
    Stop,
}

/// One preconfigured upstream publish session
pub struct StaticPush {
    url: String,
    queue: Arc<PacketQueue>,
}

impl StaticPush {
    /// Queue immediately, connect in the background; packets buffered
    /// while the dial is in flight are delivered once publishing starts.
    pub fn start(url: String) -> Arc<Self> {
        let push = Arc::new(Self {
            url: url.clone(),
            queue: Arc::new(PacketQueue::with_capacity(RELAY_QUEUE)),
        });

        let queue = push.queue.clone();
        tokio::spawn(async move {
            let mut connector = match RtmpConnector::dial(&url, ClientMode::Publish).await {
                Ok(connector) => {
                    info!(url = %url, "static push connected");
                    connector
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "static push connect failed");
                    queue.close();
                    return;
                }
            };
            while let Some(packet) = queue.pop().await {
                if let Err(e) = connector.write_packet(packet).await {
                    debug!(url = %url, error = %e, "static push write failed");
                    queue.close();
                    break;
                }
            }
            connector.close().await;
            info!(url = %url, "static push stopped");
        });

        push
    }

    pub fn write(&self, packet: Packet) -> Result<()> {
        self.queue.push(packet)
    }

    pub fn stop(&self) {
        self.queue.close();
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Registry of active static pushes plus the per-app URL configuration
pub struct StaticPushRegistry {
    /// app → configured base push URLs
    config: HashMap<String, Vec<String>>,
    /// full push URL → live session
    active: RwLock<HashMap<String, Arc<StaticPush>>>,
}

impl StaticPushRegistry {
    pub fn new(config: HashMap<String, Vec<String>>) -> Self {
        Self {
            config,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    /// Configured base URLs for an application
    pub fn urls_for_app(&self, app: &str) -> &[String] {
        self.config.get(app).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full push URLs for a channel key
    fn push_urls(&self, key: &str) -> Vec<String> {
        let Some((app, stream)) = key.split_once('/') else {
            return Vec::new();
        };
        self.urls_for_app(app)
            .iter()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), stream))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().unwrap().len()
    }
}

impl PushDispatcher for StaticPushRegistry {
    fn start(&self, key: &str) {
        for url in self.push_urls(key) {
            let mut active = self.active.write().unwrap();
            if !active.contains_key(&url) {
                info!(url = %url, channel = %key, "starting static push");
                active.insert(url.clone(), StaticPush::start(url));
            }
        }
    }

    fn forward(&self, key: &str, packet: &Packet) {
        let urls = self.push_urls(key);
        if urls.is_empty() {
            return;
        }
        let active = self.active.read().unwrap();
        for url in urls {
            if let Some(push) = active.get(&url) {
                let _ = push.write(packet.clone());
            }
        }
    }

    fn stop(&self, key: &str) {
        let mut active = self.active.write().unwrap();
        for url in self.push_urls(key) {
            if let Some(push) = active.remove(&url) {
                info!(url = %url, channel = %key, "stopping static push");
                push.stop();
            }
        }
    }
}

/// A running play→publish relay pairing (control API)
pub struct RtmpRelay {
    pub play_url: String,
    pub publish_url: String,
    control: mpsc::Sender<RelayControl>,
    running: Arc<AtomicBool>,
}

impl RtmpRelay {
    /// Dial both legs and start forwarding. Fails if either session does.
    pub async fn start(play_url: &str, publish_url: &str) -> Result<Self> {
        let mut play = RtmpConnector::dial(play_url, ClientMode::Play).await?;
        let publish = match RtmpConnector::dial(publish_url, ClientMode::Publish).await {
            Ok(publish) => publish,
            Err(e) => {
                play.close().await;
                return Err(e);
            }
        };

        let (control_tx, mut control_rx) = mpsc::channel(1);
        let (packet_tx, mut packet_rx) = mpsc::channel::<Packet>(RELAY_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        // receive leg: remote play → packet channel
        let recv_running = running.clone();
        let recv_play_url = play_url.to_string();
        tokio::spawn(async move {
            loop {
                if !recv_running.load(Ordering::Acquire) {
                    break;
                }
                let message = match play.read_message().await {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(url = %recv_play_url, error = %e, "relay play leg ended");
                        break;
                    }
                };
                let packet = match message.type_id {
                    msg::AUDIO => parse_header(&message.data, false).ok().and_then(|(h, _)| {
                        match h {
                            TagHeader::Audio(a) => {
                                Some(Packet::audio(message.timestamp, message.data.clone(), a))
                            }
                            _ => None,
                        }
                    }),
                    msg::VIDEO => parse_header(&message.data, true).ok().and_then(|(h, _)| {
                        match h {
                            TagHeader::Video(v) => {
                                Some(Packet::video(message.timestamp, message.data.clone(), v))
                            }
                            _ => None,
                        }
                    }),
                    msg::DATA_AMF0 | msg::DATA_AMF3 => {
                        Some(Packet::metadata(message.timestamp, message.data.clone()))
                    }
                    _ => {
                        debug!(type_id = message.type_id, "relay ignoring message");
                        None
                    }
                };
                if let Some(packet) = packet {
                    if packet_tx.send(packet).await.is_err() {
                        break;
                    }
                }
            }
            play.close().await;
        });

        // send leg: packet channel → remote publish, until the stop sentinel
        let send_running = running.clone();
        let send_publish_url = publish_url.to_string();
        tokio::spawn(async move {
            let mut publish = publish;
            loop {
                tokio::select! {
                    control = control_rx.recv() => {
                        if matches!(control, Some(RelayControl::Stop) | None) {
                            break;
                        }
                    }
                    packet = packet_rx.recv() => {
                        let Some(packet) = packet else { break };
                        if let Err(e) = publish.write_packet(packet).await {
                            debug!(url = %send_publish_url, error = %e, "relay publish leg failed");
                            break;
                        }
                    }
                }
            }
            send_running.store(false, Ordering::Release);
            publish.close().await;
            info!(url = %send_publish_url, "relay stopped");
        });

        Ok(Self {
            play_url: play_url.to_string(),
            publish_url: publish_url.to_string(),
            control: control_tx,
            running,
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.control.try_send(RelayControl::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
