//! RTMP server: accept loop and session wiring
//!
//! Each accepted socket runs handshake + command phase on its own task,
//! then joins the registry as a producer (publisher) or consumer
//! (player). Publishers also get their interstitial consumers attached:
//! the HLS segmenter and, when configured, the FLV recorder.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hls::server::HlsServer;
use crate::keystore::ChannelKeys;
use crate::protocol::connection::Connection;
use crate::protocol::handshake::{handshake_server, HANDSHAKE_TIMEOUT};
use crate::registry::packet::StreamInfo;
use crate::registry::store::ChannelRegistry;
use crate::session::endpoint::{RtmpConsumer, RtmpProducer};
use crate::session::server::{ServerSession, SessionOutcome};

/// The RTMP ingest/playback server
pub struct RtmpServer {
    config: Arc<Config>,
    registry: Arc<ChannelRegistry>,
    keys: Arc<ChannelKeys>,
    hls: Option<Arc<HlsServer>>,
}

impl RtmpServer {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ChannelRegistry>,
        keys: Arc<ChannelKeys>,
        hls: Option<Arc<HlsServer>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            keys,
            hls,
        })
    }

    /// Accept loop; runs until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr(), "rtmp listening");
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer).await {
                            if e.is_disconnect() {
                                debug!(peer = %peer, "connection closed");
                            } else {
                                debug!(peer = %peer, error = %e, "connection failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut socket: TcpStream, peer: SocketAddr) -> Result<()> {
        socket.set_nodelay(true)?;
        handshake_server(&mut socket, HANDSHAKE_TIMEOUT).await?;

        let mut session = ServerSession::new(Connection::new(socket));
        let outcome = session.run(self.keys.as_ref()).await?;

        let app = session.app().to_string();
        if !self.config.check_app_name(&app) {
            info!(peer = %peer, app = %app, "unknown application refused");
            return Err(Error::Unauthorized);
        }

        let key = session.channel_key();
        let url = session.stream_url();
        match outcome {
            SessionOutcome::Publisher => {
                info!(peer = %peer, channel = %key, "new publisher");
                let info = StreamInfo::new(key.as_str(), url);
                let producer = RtmpProducer::new(session.into_connection(), info);
                self.registry.register_producer(Box::new(producer)).await;
                self.attach_interstitials(&app, &key).await;
            }
            SessionOutcome::Player => {
                info!(peer = %peer, channel = %key, "new player");
                let info = StreamInfo::new(key.as_str(), url);
                let consumer = RtmpConsumer::spawn(session.into_connection(), info);
                self.registry.register_consumer(consumer).await;
            }
        }
        Ok(())
    }

    /// HLS segmenter and FLV recorder for a fresh publisher.
    async fn attach_interstitials(&self, app: &str, key: &str) {
        let app_config = self.config.app(app);

        if app_config.map(|a| a.hls).unwrap_or(false) {
            if let Some(hls) = &self.hls {
                let writer = hls.get_writer(key);
                self.registry.register_consumer(writer).await;
            }
        }

        let record_enabled =
            app_config.map(|a| a.flv).unwrap_or(false) && !self.config.flv_dir.is_empty();
        if record_enabled {
            let dir = std::path::PathBuf::from(&self.config.flv_dir);
            match crate::record::spawn_recorder(&dir, key).await {
                Ok(recorder) => self.registry.register_consumer(recorder).await,
                Err(e) => error!(channel = %key, error = %e, "recorder failed to start"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::client::connector::{ClientMode, RtmpConnector};
    use crate::media::flv::parse_header;
    use crate::protocol::constants::msg;
    use crate::registry::packet::Packet;

    fn video_packet(ts: u32, first: &'static [u8]) -> Packet {
        let (header, _) = parse_header(first, true).unwrap();
        Packet::video(ts, Bytes::from_static(first), *header.as_video().unwrap())
    }

    fn audio_packet(ts: u32, first: &'static [u8]) -> Packet {
        let (header, _) = parse_header(first, false).unwrap();
        Packet::audio(ts, Bytes::from_static(first), *header.as_audio().unwrap())
    }

    async fn start_server() -> (Arc<RtmpServer>, Arc<ChannelKeys>, Arc<ChannelRegistry>, u16) {
        let config = Arc::new(Config::default());
        let keys = Arc::new(ChannelKeys::new(None));
        let registry = Arc::new(ChannelRegistry::without_push(1));
        let server = RtmpServer::new(config, registry.clone(), keys.clone(), None);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(server.clone().serve(listener));
        (server, keys, registry, port)
    }

    #[tokio::test]
    async fn test_publish_then_play_end_to_end() {
        let (_server, keys, registry, port) = start_server().await;
        let key = keys.get_key("live/s");

        // publisher connects with the right key and sends media
        let publish_url = format!("rtmp://127.0.0.1:{}/live/s?k={}", port, key);
        let mut publisher = RtmpConnector::dial(&publish_url, ClientMode::Publish)
            .await
            .unwrap();

        publisher
            .write_packet(video_packet(0, &[0x17, 0x00, 0, 0, 0]))
            .await
            .unwrap(); // video seq
        publisher
            .write_packet(audio_packet(0, &[0xAF, 0x00, 0x12, 0x10]))
            .await
            .unwrap(); // audio seq
        publisher
            .write_packet(video_packet(40, &[0x17, 0x01, 0, 0, 0]))
            .await
            .unwrap(); // keyframe
        publisher
            .write_packet(audio_packet(60, &[0xAF, 0x01, 0x21]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.has_publisher("live/s").await);

        // player joins and receives the cache in canonical order
        let play_url = format!("rtmp://127.0.0.1:{}/live/s", port);
        let mut player = RtmpConnector::dial(&play_url, ClientMode::Play).await.unwrap();
        // let the server finish registering the consumer
        tokio::time::sleep(Duration::from_millis(100)).await;

        // push one live packet so the fan-out initializes the new player
        publisher
            .write_packet(video_packet(80, &[0x27, 0x01, 0, 0, 0]))
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..4 {
            let message = tokio::time::timeout(Duration::from_secs(2), player.read_message())
                .await
                .expect("timed out waiting for media")
                .unwrap();
            received.push((message.type_id, message.timestamp, message.data.clone()));
        }

        // video seq, audio seq, then the GOP (keyframe first)
        assert_eq!(received[0].0, msg::VIDEO);
        assert_eq!(received[0].2[1], 0x00); // sequence header
        assert_eq!(received[1].0, msg::AUDIO);
        assert_eq!(received[1].2[1], 0x00);
        assert_eq!(received[2].0, msg::VIDEO);
        assert_eq!(received[2].2[0], 0x17); // keyframe
        // in-order timestamps afterwards
        assert!(received[3].1 >= received[2].1);
    }

    #[tokio::test]
    async fn test_pull_reinjects_under_local_key() {
        use crate::client::puller::RtmpPuller;

        let (_server, keys, registry, port) = start_server().await;
        let key = keys.get_key("live/s");

        let publish_url = format!("rtmp://127.0.0.1:{}/live/s?k={}", port, key);
        let mut publisher = RtmpConnector::dial(&publish_url, ClientMode::Publish)
            .await
            .unwrap();
        publisher
            .write_packet(video_packet(0, &[0x17, 0x01, 0, 0, 0]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // pull our own stream back in under a mirror key
        let play_url = format!("rtmp://127.0.0.1:{}/live/s", port);
        let puller = RtmpPuller::dial(&play_url, "live/mirror").await.unwrap();
        registry.register_producer(Box::new(puller)).await;

        // feed one more packet so the pulled leg observes traffic
        publisher
            .write_packet(video_packet(40, &[0x27, 0x01, 0, 0, 0]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(registry.has_publisher("live/mirror").await);
        let mirror = registry.get("live/mirror").await.unwrap();
        assert!(mirror.read().await.started());
    }

    #[tokio::test]
    async fn test_relay_mirrors_between_channels() {
        use crate::relay::RtmpRelay;

        let (_server, keys, registry, port) = start_server().await;
        let key = keys.get_key("live/s");
        let mirror_key = keys.get_key("live/mirror");

        let publish_url = format!("rtmp://127.0.0.1:{}/live/s?k={}", port, key);
        let mut publisher = RtmpConnector::dial(&publish_url, ClientMode::Publish)
            .await
            .unwrap();
        publisher
            .write_packet(video_packet(0, &[0x17, 0x01, 0, 0, 0]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // play live/s, publish it back as live/mirror
        let play_url = format!("rtmp://127.0.0.1:{}/live/s", port);
        let publish_mirror = format!("rtmp://127.0.0.1:{}/live/mirror?k={}", port, mirror_key);
        let relay = RtmpRelay::start(&play_url, &publish_mirror).await.unwrap();
        assert!(relay.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;

        for n in 1..5u32 {
            publisher
                .write_packet(video_packet(n * 40, &[0x27, 0x01, 0, 0, 0]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(registry.has_publisher("live/mirror").await);

        relay.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!relay.is_running());
    }

    #[tokio::test]
    async fn test_wrong_key_rejected_and_no_channel() {
        let (_server, keys, registry, port) = start_server().await;
        let _right = keys.get_key("live/s");

        let url = format!("rtmp://127.0.0.1:{}/live/s?k=wrongwrongwrong", port);
        let err = RtmpConnector::dial(&url, ClientMode::Publish).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!registry.has_publisher("live/s").await);
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_app_refused() {
        let (_server, keys, _registry, port) = start_server().await;
        let key = keys.get_key("vod/s");

        let url = format!("rtmp://127.0.0.1:{}/vod/s?k={}", port, key);
        // the command phase succeeds (publish status sent) but the server
        // drops the connection before registering; the subsequent read fails
        match RtmpConnector::dial(&url, ClientMode::Publish).await {
            Ok(mut publisher) => {
                let mut failed = false;
                for n in 0..50u32 {
                    if publisher
                        .write_packet(audio_packet(n, &[0xAF, 0x01, 0x21]))
                        .await
                        .is_err()
                    {
                        failed = true;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                assert!(failed, "server kept an unknown app alive");
            }
            Err(_) => {}
        }
    }
}
