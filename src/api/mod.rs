//! Control and stat HTTP API
//!
//! ```text
//! POST /control/get?room=app/stream      fetch (or mint) the publish key
//! POST /control/reset?room=app/stream    rotate the publish key
//! POST /control/delete?room=app/stream   drop the key and the channel
//! POST /control/push?oper=start&app=&name=&url=   mirror a local stream out
//! POST /control/pull?oper=start&app=&name=&url=   bring a remote stream in
//! GET  /stat/livestat[?room=app/stream]  channel statistics
//! ```
//!
//! Responses are `{"status": N, "data": ...}`; 200/400/404/500. When
//! `jwt.secret` is configured every request must carry a valid token in
//! `Authorization: Bearer` or `?jwt=`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::JwtConfig;
use crate::error::Result;
use crate::keystore::ChannelKeys;
use crate::registry::store::ChannelRegistry;
use crate::relay::RtmpRelay;

#[derive(Serialize)]
struct ApiResponse {
    status: u16,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct StreamStat {
    key: String,
    id: String,
    url: String,
}

#[derive(Serialize, Default)]
struct LiveStat {
    publishers: Vec<StreamStat>,
    players: Vec<StreamStat>,
}

/// The control API server
pub struct ApiServer {
    registry: Arc<ChannelRegistry>,
    keys: Arc<ChannelKeys>,
    relays: Mutex<HashMap<String, RtmpRelay>>,
    jwt: JwtConfig,
    rtmp_addr: String,
}

impl ApiServer {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        keys: Arc<ChannelKeys>,
        jwt: JwtConfig,
        rtmp_addr: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            keys,
            relays: Mutex::new(HashMap::new()),
            jwt,
            rtmp_addr,
        })
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr(), "control api listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %e, "api connection error");
                }
            });
        }
    }

    async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let params = query_params(req.uri().query().unwrap_or(""));

        if !self.check_jwt(&req, &params) {
            return respond(StatusCode::FORBIDDEN, json!("invalid token"));
        }

        let path = req.uri().path();
        match (req.method(), path) {
            (&Method::GET, "/stat/livestat") => self.livestat(params.get("room").map(String::as_str)).await,
            (&Method::POST, "/control/get") => self.control_get(&params),
            (&Method::POST, "/control/reset") => self.control_reset(&params),
            (&Method::POST, "/control/delete") => self.control_delete(&params).await,
            (&Method::POST, "/control/push") => self.control_relay(&params, RelayKind::Push).await,
            (&Method::POST, "/control/pull") => self.control_relay(&params, RelayKind::Pull).await,
            _ => respond(StatusCode::BAD_REQUEST, json!("unknown endpoint")),
        }
    }

    fn check_jwt<B>(&self, req: &Request<B>, params: &HashMap<String, String>) -> bool {
        if self.jwt.secret.is_empty() {
            return true;
        }
        let token = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
            .or_else(|| params.get("jwt").cloned());
        let Some(token) = token else {
            return false;
        };

        let algorithm = match self.jwt.algorithm.as_str() {
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            _ => Algorithm::HS256,
        };
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        decode::<serde_json::Value>(
            &token,
            &DecodingKey::from_secret(self.jwt.secret.as_bytes()),
            &validation,
        )
        .is_ok()
    }

    async fn livestat(&self, room: Option<&str>) -> Response<Full<Bytes>> {
        let Some(channels) = self.registry.snapshot(room).await else {
            return respond(StatusCode::NOT_FOUND, json!("room not found or inactive"));
        };

        let mut stat = LiveStat::default();
        for channel in channels {
            if let Some(publisher) = channel.publisher {
                stat.publishers.push(StreamStat {
                    key: channel.key.clone(),
                    id: publisher.uid,
                    url: publisher.url,
                });
            }
            for player in channel.players {
                stat.players.push(StreamStat {
                    key: channel.key.clone(),
                    id: player.uid,
                    url: player.url,
                });
            }
        }
        respond(StatusCode::OK, serde_json::to_value(stat).unwrap_or_default())
    }

    fn control_get(&self, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
        match params.get("room") {
            Some(room) if !room.is_empty() => {
                respond(StatusCode::OK, json!(self.keys.get_key(room)))
            }
            _ => respond(StatusCode::BAD_REQUEST, json!("room required")),
        }
    }

    fn control_reset(&self, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
        match params.get("room") {
            Some(room) if !room.is_empty() => {
                respond(StatusCode::OK, json!(self.keys.set_key(room)))
            }
            _ => respond(StatusCode::BAD_REQUEST, json!("room required")),
        }
    }

    async fn control_delete(&self, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let Some(room) = params.get("room").filter(|r| !r.is_empty()) else {
            return respond(StatusCode::BAD_REQUEST, json!("room required"));
        };
        let had_key = self.keys.delete_channel(room);
        let had_channel = self.registry.drop_channel(room, "deleted by api").await;
        if had_key || had_channel {
            respond(StatusCode::OK, json!("ok"))
        } else {
            respond(StatusCode::NOT_FOUND, json!("unknown channel"))
        }
    }

    async fn control_relay(
        &self,
        params: &HashMap<String, String>,
        kind: RelayKind,
    ) -> Response<Full<Bytes>> {
        let oper = params.get("oper").map(String::as_str).unwrap_or("");
        let (Some(app), Some(name)) = (params.get("app"), params.get("name")) else {
            return respond(StatusCode::BAD_REQUEST, json!("app and name required"));
        };
        let relay_id = format!("{:?}:{}/{}", kind, app, name);

        match oper {
            "stop" => {
                let mut relays = self.relays.lock().await;
                match relays.remove(&relay_id) {
                    Some(relay) => {
                        relay.stop();
                        respond(StatusCode::OK, json!("stopped"))
                    }
                    None => respond(StatusCode::NOT_FOUND, json!("no such relay")),
                }
            }
            "start" => {
                let Some(url) = params.get("url").filter(|u| !u.is_empty()) else {
                    return respond(StatusCode::BAD_REQUEST, json!("url required"));
                };
                let local = format!(
                    "rtmp://127.0.0.1{}/{}/{}",
                    self.rtmp_addr, app, name
                );
                let remote = format!("{}/{}", url.trim_end_matches('/'), name);
                let (play, publish) = match kind {
                    // push: play our own stream, publish it remotely
                    RelayKind::Push => (local, remote),
                    // pull: play the remote stream, publish it locally
                    RelayKind::Pull => (remote, local),
                };
                match RtmpRelay::start(&play, &publish).await {
                    Ok(relay) => {
                        self.relays.lock().await.insert(relay_id, relay);
                        respond(StatusCode::OK, json!("started"))
                    }
                    Err(e) => {
                        warn!(error = %e, "relay start failed");
                        respond(StatusCode::INTERNAL_SERVER_ERROR, json!(e.to_string()))
                    }
                }
            }
            _ => respond(StatusCode::BAD_REQUEST, json!("oper must be start or stop")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RelayKind {
    Push,
    Pull,
}

fn query_params(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn respond(status: StatusCode, data: serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&ApiResponse {
        status: status.as_u16(),
        data,
    })
    .unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Arc<ApiServer> {
        ApiServer::new(
            Arc::new(ChannelRegistry::without_push(1)),
            Arc::new(ChannelKeys::new(None)),
            JwtConfig::default(),
            ":1935".to_string(),
        )
    }

    #[test]
    fn test_query_params() {
        let params = query_params("room=live%2Fmovie&oper=start");
        assert_eq!(params["room"], "live/movie");
        assert_eq!(params["oper"], "start");
    }

    #[tokio::test]
    async fn test_control_get_and_reset() {
        let server = server();
        let mut params = HashMap::new();
        params.insert("room".to_string(), "live/movie".to_string());

        let resp = server.control_get(&params);
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server.control_reset(&params);
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server.control_get(&HashMap::new());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_control_delete_unknown_is_404() {
        let server = server();
        let mut params = HashMap::new();
        params.insert("room".to_string(), "live/ghost".to_string());
        let resp = server.control_delete(&params).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        server.keys.get_key("live/real");
        params.insert("room".to_string(), "live/real".to_string());
        let resp = server.control_delete(&params).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_relay_stop_without_start_is_404() {
        let server = server();
        let mut params = HashMap::new();
        params.insert("oper".to_string(), "stop".to_string());
        params.insert("app".to_string(), "live".to_string());
        params.insert("name".to_string(), "movie".to_string());
        let resp = server.control_relay(&params, RelayKind::Push).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_relay_requires_params() {
        let server = server();
        let resp = server.control_relay(&HashMap::new(), RelayKind::Pull).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let mut params = HashMap::new();
        params.insert("oper".to_string(), "start".to_string());
        params.insert("app".to_string(), "live".to_string());
        params.insert("name".to_string(), "movie".to_string());
        // no url
        let resp = server.control_relay(&params, RelayKind::Pull).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_jwt_disabled_allows_all() {
        let server = server();
        let req = Request::builder().uri("/stat/livestat").body(()).unwrap();
        assert!(server.check_jwt(&req, &HashMap::new()));
    }

    #[test]
    fn test_jwt_round_trip() {
        let jwt = JwtConfig {
            secret: "s3cret".to_string(),
            algorithm: "HS256".to_string(),
        };
        let server = ApiServer::new(
            Arc::new(ChannelRegistry::without_push(1)),
            Arc::new(ChannelKeys::new(None)),
            jwt,
            ":1935".to_string(),
        );

        // no token
        let req = Request::builder().uri("/stat/livestat").body(()).unwrap();
        assert!(!server.check_jwt(&req, &HashMap::new()));

        // valid token in the header
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &json!({"sub": "ops"}),
            &jsonwebtoken::EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let req = Request::builder()
            .uri("/stat/livestat")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(())
            .unwrap();
        assert!(server.check_jwt(&req, &HashMap::new()));

        // wrong key fails
        let bad = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS256),
            &json!({"sub": "ops"}),
            &jsonwebtoken::EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        let req = Request::builder()
            .uri("/stat/livestat")
            .header(header::AUTHORIZATION, format!("Bearer {}", bad))
            .body(())
            .unwrap();
        assert!(!server.check_jwt(&req, &HashMap::new()));
    }

    #[tokio::test]
    async fn test_livestat_shape() {
        let server = server();
        let resp = server.livestat(None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livestat_unknown_room_is_404() {
        let server = server();
        let resp = server.livestat(Some("live/ghost")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // once the channel exists, the same query answers 200
        let consumer = crate::hls::segmenter::HlsSegmenter::spawn("live/movie", false);
        server.registry.register_consumer(consumer).await;
        let resp = server.livestat(Some("live/movie")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
