//! HLS HTTP surface
//!
//! Three paths: `/crossdomain.xml`, `/<app>/<stream>.m3u8` and
//! `/<app>/<stream>/<name>.ts`. Unknown channels and missing segments
//! answer 403, matching player expectations for a stream that is not
//! live.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::registry::packet::StreamConsumer;

use crate::error::Result;
use crate::hls::segmenter::HlsSegmenter;

const CROSSDOMAIN_XML: &str = r#"<?xml version="1.0" ?>
<cross-domain-policy>
	<allow-access-from domain="*" />
	<allow-http-request-headers-from domain="*" headers="*"/>
</cross-domain-policy>"#;

/// HLS server: the segmenter per channel plus the HTTP listener
pub struct HlsServer {
    sources: RwLock<HashMap<String, Arc<HlsSegmenter>>>,
    keep_after_end: bool,
}

impl HlsServer {
    pub fn new(keep_after_end: bool) -> Arc<Self> {
        Arc::new(Self {
            sources: RwLock::new(HashMap::new()),
            keep_after_end,
        })
    }

    /// The segmenter for a channel, created on first use.
    ///
    /// Channels attach this as their interstitial HLS consumer.
    pub fn get_writer(&self, key: &str) -> Arc<HlsSegmenter> {
        let mut sources = self.sources.write().unwrap();
        if let Some(existing) = sources.get(key) {
            if existing.alive() {
                return existing.clone();
            }
        }
        debug!(channel = %key, "new hls source");
        let segmenter = HlsSegmenter::spawn(key, self.keep_after_end);
        sources.insert(key.to_string(), segmenter.clone());
        segmenter
    }

    fn get_source(&self, key: &str) -> Option<Arc<HlsSegmenter>> {
        self.sources.read().unwrap().get(key).cloned()
    }

    /// Periodically drop sources whose segmenter has gone away
    pub fn spawn_check_stop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                server
                    .sources
                    .write()
                    .unwrap()
                    .retain(|key, source| {
                        let keep = source.alive();
                        if !keep {
                            debug!(channel = %key, "hls source removed");
                        }
                        keep
                    });
            }
        })
    }

    /// Accept loop for the HLS port
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr(), "hls listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(&req)) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %e, "hls connection error");
                }
            });
        }
    }

    /// Route one request; generic over the body so tests can drive it.
    pub fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET {
            return plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }
        let path = req.uri().path();

        if path.ends_with("/crossdomain.xml") {
            return Response::builder()
                .header("Content-Type", "application/xml")
                .body(Full::new(Bytes::from_static(CROSSDOMAIN_XML.as_bytes())))
                .unwrap();
        }

        if let Some(stripped) = path.strip_suffix(".m3u8") {
            let key = stripped.trim_start_matches('/');
            let Some(source) = self.get_source(key) else {
                return plain_response(StatusCode::FORBIDDEN, "no publisher");
            };
            let playlist = source.cache().m3u8();
            return Response::builder()
                .header("Access-Control-Allow-Origin", "*")
                .header("Cache-Control", "no-cache")
                .header("Content-Type", "application/x-mpegURL")
                .body(Full::new(Bytes::from(playlist)))
                .unwrap();
        }

        if path.ends_with(".ts") {
            // /app/stream/<name>.ts → channel key is the first two parts
            let parts: Vec<&str> = path.trim_start_matches('/').splitn(3, '/').collect();
            if parts.len() == 3 {
                let key = format!("{}/{}", parts[0], parts[1]);
                if let Some(source) = self.get_source(&key) {
                    if let Ok(item) = source.cache().get(path) {
                        return Response::builder()
                            .header("Access-Control-Allow-Origin", "*")
                            .header("Content-Type", "video/mp2ts")
                            .body(Full::new(item.data))
                            .unwrap();
                    }
                }
            }
            return plain_response(StatusCode::FORBIDDEN, "no publisher");
        }

        plain_response(StatusCode::BAD_REQUEST, "invalid path")
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}
