//! HTTP-FLV and WebSocket-FLV server
//!
//! `GET /<app>/<stream>.flv` streams FLV over a chunked HTTP response; the
//! same path with WebSocket upgrade headers delivers the identical byte
//! stream as binary messages. `GET /streams` reports who is publishing
//! and playing.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::SinkExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::Role;
use tungstenite::Message;

use crate::error::{Error, Result};
use crate::httpflv::writer::{ChannelSink, FlvSink, FlvWriter};
use crate::registry::packet::StreamInfo;
use crate::registry::store::ChannelRegistry;

type Body = BoxBody<Bytes, std::io::Error>;

/// Byte depth of the HTTP response channel
const BODY_CHANNEL_DEPTH: usize = 64;

#[derive(Serialize)]
struct StreamEntry {
    key: String,
    id: String,
}

#[derive(Serialize, Default)]
struct StreamsReport {
    publishers: Vec<StreamEntry>,
    players: Vec<StreamEntry>,
}

/// The HTTP-FLV listener
pub struct HttpFlvServer {
    registry: Arc<ChannelRegistry>,
}

impl HttpFlvServer {
    pub fn new(registry: Arc<ChannelRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr(), "http-flv listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, std::convert::Infallible>(server.handle(req).await) }
                });
                let conn = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades();
                if let Err(e) = conn.await {
                    debug!(peer = %peer, error = %e, "http-flv connection error");
                }
            });
        }
    }

    async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Response<Body> {
        if req.method() != Method::GET {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }
        let path = req.uri().path().to_string();

        if path == "/streams" {
            return self.streams_report().await;
        }

        let Some(stripped) = path.strip_suffix(".flv") else {
            return plain(StatusCode::BAD_REQUEST, "invalid path");
        };
        let key = stripped.trim_start_matches('/');
        let Some((_, _)) = key.split_once('/') else {
            return plain(StatusCode::BAD_REQUEST, "invalid path");
        };

        if is_websocket_upgrade(&req) {
            return self.upgrade_websocket(req, key).await;
        }

        // plain HTTP-FLV: consumer feeds the response body channel
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(BODY_CHANNEL_DEPTH);
        let info = StreamInfo::new(key, path.as_str()).interstitial();
        let writer = FlvWriter::spawn(info, ChannelSink { tx });
        self.registry.register_consumer(writer).await;

        let body = StreamBody::new(
            ReceiverStream::new(rx).map(|bytes| Ok::<_, std::io::Error>(Frame::data(bytes))),
        )
        .boxed();
        Response::builder()
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(header::CONTENT_TYPE, "video/x-flv")
            .body(body)
            .unwrap()
    }

    async fn streams_report(&self) -> Response<Body> {
        let mut report = StreamsReport::default();
        for stat in self.registry.snapshot(None).await.unwrap_or_default() {
            if let Some(publisher) = stat.publisher {
                report.publishers.push(StreamEntry {
                    key: stat.key.clone(),
                    id: publisher.uid,
                });
            }
            for player in stat.players {
                report.players.push(StreamEntry {
                    key: stat.key.clone(),
                    id: player.uid,
                });
            }
        }
        let json = serde_json::to_vec(&report).unwrap_or_default();
        Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(full(Bytes::from(json)))
            .unwrap()
    }

    async fn upgrade_websocket(self: Arc<Self>, mut req: Request<Incoming>, key: &str) -> Response<Body> {
        let Some(ws_key) = req
            .headers()
            .get(header::SEC_WEBSOCKET_KEY)
            .map(|k| derive_accept_key(k.as_bytes()))
        else {
            return plain(StatusCode::BAD_REQUEST, "missing websocket key");
        };

        let registry = self.registry.clone();
        let key = key.to_string();
        let path = req.uri().path().to_string();
        tokio::spawn(async move {
            match hyper::upgrade::on(&mut req).await {
                Ok(upgraded) => {
                    let io = TokioIo::new(upgraded);
                    let socket = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                    let info = StreamInfo::new(key.as_str(), path.as_str()).interstitial();
                    let writer = FlvWriter::spawn(info, WsSink { socket });
                    registry.register_consumer(writer).await;
                }
                Err(e) => warn!(error = %e, "websocket upgrade failed"),
            }
        });

        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_ACCEPT, ws_key)
            .body(BoxBody::default())
            .unwrap()
    }
}

fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    let upgrade_websocket = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    connection_upgrade && upgrade_websocket
}

fn full(bytes: Bytes) -> Body {
    Full::new(bytes).map_err(|e| match e {}).boxed()
}

fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(full(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

/// Sink delivering FLV bytes as binary WebSocket messages
struct WsSink<S> {
    socket: WebSocketStream<S>,
}

#[async_trait::async_trait]
impl<S> FlvSink for WsSink<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, bytes: Bytes) -> Result<()> {
        self.socket
            .send(Message::binary(bytes))
            .await
            .map_err(|_| Error::Closed)
    }

    async fn finish(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
