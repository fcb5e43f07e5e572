//! Server-side RTMP command state machine
//!
//! Runs after the handshake and drives the AMF command exchange until the
//! peer has either published or started playing:
//!
//! ```text
//! Start → Connected → StreamCreated → Publishing
//!                                   → Playing
//! ```
//!
//! Publish authorization: the stream name may carry a `?k=<token>` query;
//! the token must resolve to this channel in the key store, otherwise the
//! session ends with `NetStream.Publish.BadName`.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::amf::{self, AmfValue, Version};
use crate::amf_object;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::chunk::ChunkMessage;
use crate::protocol::connection::Connection;
use crate::protocol::constants::{
    cmd, msg, DEFAULT_PEER_BANDWIDTH, DEFAULT_WINDOW_ACK_SIZE, RECOMMENDED_CHUNK_SIZE,
};

/// Checks publish tokens against the key store
pub trait PublishAuth: Send + Sync {
    /// Does `token` authorize publishing to `channel` (`app/stream`)?
    fn authorize(&self, channel: &str, token: Option<&str>) -> bool;
}

/// Accept-everything authorizer (relay ingest, tests)
pub struct AllowAll;

impl PublishAuth for AllowAll {
    fn authorize(&self, _channel: &str, _token: Option<&str>) -> bool {
        true
    }
}

/// How the command phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Publisher,
    Player,
}

/// Server session state while the command exchange runs
pub struct ServerSession<S> {
    conn: Connection<S>,
    transaction_id: f64,
    stream_id: u32,
    app: String,
    tc_url: String,
    object_encoding: f64,
    stream_name: String,
    publish_type: String,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ServerSession<S> {
    pub fn new(conn: Connection<S>) -> Self {
        Self {
            conn,
            transaction_id: 0.0,
            stream_id: 1,
            app: String::new(),
            tc_url: String::new(),
            object_encoding: 0.0,
            stream_name: String::new(),
            publish_type: String::new(),
        }
    }

    /// Application from `connect`
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Stream name without any query string
    pub fn stream_name(&self) -> &str {
        match self.stream_name.split_once('?') {
            Some((name, _)) => name,
            None => &self.stream_name,
        }
    }

    /// `k` token from the stream-name query string
    pub fn publish_token(&self) -> Option<&str> {
        let (_, query) = self.stream_name.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("k="))
    }

    /// Channel key `app/stream`
    pub fn channel_key(&self) -> String {
        format!("{}/{}", self.app, self.stream_name())
    }

    pub fn tc_url(&self) -> &str {
        &self.tc_url
    }

    /// Publish type the encoder requested ("live", "record", "append")
    pub fn publish_type(&self) -> &str {
        &self.publish_type
    }

    /// Full source URL for the stream
    pub fn stream_url(&self) -> String {
        format!("{}/{}", self.tc_url, self.stream_name())
    }

    pub fn into_connection(self) -> Connection<S> {
        self.conn
    }

    /// Drive commands until publish or play completes.
    pub async fn run(&mut self, auth: &dyn PublishAuth) -> Result<SessionOutcome> {
        loop {
            let message = self.conn.read_message().await?;
            if !message.is_command() {
                continue;
            }
            if let Some(outcome) = self.handle_command(&message, auth).await? {
                return Ok(outcome);
            }
        }
    }

    async fn handle_command(
        &mut self,
        message: &ChunkMessage,
        auth: &dyn PublishAuth,
    ) -> Result<Option<SessionOutcome>> {
        let mut data = message.data.clone();
        if message.type_id == msg::COMMAND_AMF3 {
            // AMF3 command bodies lead with a format byte, then AMF0
            if data.is_empty() {
                return Err(ProtocolError::BadChunkHeader.into());
            }
            data = data.slice(1..);
        }
        let values = amf::decode_batch(data, Version::Amf0).map_err(Error::from)?;
        let name = match values.first().and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };

        match name.as_str() {
            cmd::CONNECT => {
                self.on_connect(&values)?;
                self.connect_response(message).await?;
                Ok(None)
            }
            cmd::CREATE_STREAM => {
                if let Some(txn) = values.get(1).and_then(|v| v.as_number()) {
                    self.transaction_id = txn;
                }
                self.create_stream_response(message).await?;
                Ok(None)
            }
            cmd::PUBLISH => {
                self.on_publish_or_play(&values);
                let channel = self.channel_key();
                if !auth.authorize(&channel, self.publish_token()) {
                    self.status_response(
                        message,
                        "error",
                        cmd::PUBLISH_BAD_NAME,
                        "Bad publish key.",
                    )
                    .await?;
                    return Err(Error::Unauthorized);
                }
                self.status_response(message, "status", cmd::PUBLISH_START, "Start publishing.")
                    .await?;
                tracing::debug!(channel = %channel, "publish accepted");
                Ok(Some(SessionOutcome::Publisher))
            }
            cmd::PLAY => {
                self.on_publish_or_play(&values);
                self.play_response(message).await?;
                tracing::debug!(channel = %self.channel_key(), "play accepted");
                Ok(Some(SessionOutcome::Player))
            }
            cmd::FC_PUBLISH | cmd::RELEASE_STREAM | cmd::FC_UNPUBLISH | cmd::DELETE_STREAM => {
                Ok(None)
            }
            other => {
                tracing::debug!(command = other, "unsupported command ignored");
                Ok(None)
            }
        }
    }

    fn on_connect(&mut self, values: &[AmfValue]) -> Result<()> {
        for value in &values[1..] {
            match value {
                AmfValue::Number(txn) => {
                    if *txn != 1.0 {
                        return Err(ProtocolError::BadTransactionId(*txn).into());
                    }
                    self.transaction_id = *txn;
                }
                AmfValue::Object(_) => {
                    if let Some(app) = value.get_string("app") {
                        self.app = app.trim_end_matches('/').to_string();
                    }
                    if let Some(tc_url) = value.get_string("tcUrl") {
                        self.tc_url = tc_url.to_string();
                    }
                    if let Some(encoding) = value.get_number("objectEncoding") {
                        self.object_encoding = encoding;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn on_publish_or_play(&mut self, values: &[AmfValue]) {
        for (index, value) in values[1..].iter().enumerate() {
            match value {
                AmfValue::Number(txn) => self.transaction_id = *txn,
                AmfValue::String(s) => {
                    if index == 2 {
                        self.stream_name = s.clone();
                    } else if index == 3 {
                        self.publish_type = s.clone();
                    }
                }
                _ => {}
            }
        }
    }

    async fn connect_response(&mut self, request: &ChunkMessage) -> Result<()> {
        self.conn.write_window_ack_size(DEFAULT_WINDOW_ACK_SIZE).await?;
        self.conn
            .write_set_peer_bandwidth(DEFAULT_PEER_BANDWIDTH)
            .await?;
        self.conn.write_set_chunk_size(RECOMMENDED_CHUNK_SIZE).await?;

        let properties = amf_object! {
            "fmsVer" => "FMS/3,0,1,123",
            "capabilities" => 31.0,
        };
        let information = amf_object! {
            "level" => "status",
            "code" => cmd::CONNECT_SUCCESS,
            "description" => "Connection succeeded.",
            "objectEncoding" => self.object_encoding,
        };
        self.write_command(
            request,
            &[
                AmfValue::String(cmd::RESULT.into()),
                AmfValue::Number(self.transaction_id),
                properties,
                information,
            ],
        )
        .await
    }

    async fn create_stream_response(&mut self, request: &ChunkMessage) -> Result<()> {
        self.write_command(
            request,
            &[
                AmfValue::String(cmd::RESULT.into()),
                AmfValue::Number(self.transaction_id),
                AmfValue::Null,
                AmfValue::Number(self.stream_id as f64),
            ],
        )
        .await
    }

    async fn status_response(
        &mut self,
        request: &ChunkMessage,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<()> {
        let event = amf_object! {
            "level" => level,
            "code" => code,
            "description" => description,
        };
        self.write_command(
            request,
            &[
                AmfValue::String(cmd::ON_STATUS.into()),
                AmfValue::Number(0.0),
                AmfValue::Null,
                event,
            ],
        )
        .await
    }

    async fn play_response(&mut self, request: &ChunkMessage) -> Result<()> {
        self.conn.write_stream_is_recorded(self.stream_id).await?;
        self.conn.write_stream_begin(self.stream_id).await?;

        self.status_response(request, "status", cmd::PLAY_RESET, "Playing and resetting stream.")
            .await?;
        self.status_response(request, "status", cmd::PLAY_START, "Started playing stream.")
            .await?;
        self.status_response(request, "status", cmd::DATA_START, "Started playing stream.")
            .await?;
        self.status_response(
            request,
            "status",
            cmd::PLAY_PUBLISH_NOTIFY,
            "Started playing notify.",
        )
        .await
    }

    async fn write_command(&mut self, request: &ChunkMessage, values: &[AmfValue]) -> Result<()> {
        let body = amf::encode_batch(values, Version::Amf0).map_err(Error::from)?;
        let response = ChunkMessage::new(
            request.csid,
            0,
            msg::COMMAND_AMF0,
            request.stream_id,
            body,
        );
        self.conn.send(&response).await
    }
}

/// Build a command message (client side and tests)
pub fn command_message(
    csid: u32,
    stream_id: u32,
    values: &[AmfValue],
) -> Result<ChunkMessage> {
    let body = amf::encode_batch(values, Version::Amf0).map_err(Error::from)?;
    Ok(ChunkMessage::new(csid, 0, msg::COMMAND_AMF0, stream_id, body))
}

/// Decode a command/data message body to AMF values
pub fn decode_command(message: &ChunkMessage) -> Result<Vec<AmfValue>> {
    let mut data = message.data.clone();
    if message.type_id == msg::COMMAND_AMF3 || message.type_id == msg::DATA_AMF3 {
        if data.is_empty() {
            return Err(ProtocolError::BadChunkHeader.into());
        }
        data = data.slice(1..);
    }
    amf::decode_batch(data, Version::Amf0).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::csid;

    struct OneKey;

    impl PublishAuth for OneKey {
        fn authorize(&self, channel: &str, token: Option<&str>) -> bool {
            channel == "live/movie" && token == Some("sekrit")
        }
    }

    async fn client_send(conn: &mut Connection<tokio::io::DuplexStream>, values: &[AmfValue]) {
        let message = command_message(csid::COMMAND, 0, values).unwrap();
        conn.send(&message).await.unwrap();
    }

    async fn client_read_command(
        conn: &mut Connection<tokio::io::DuplexStream>,
    ) -> Vec<AmfValue> {
        loop {
            let message = conn.read_message().await.unwrap();
            if message.is_command() {
                return decode_command(&message).unwrap();
            }
        }
    }

    async fn drive_connect(client: &mut Connection<tokio::io::DuplexStream>) {
        client_send(
            client,
            &[
                AmfValue::String("connect".into()),
                AmfValue::Number(1.0),
                amf_object! {
                    "app" => "live",
                    "tcUrl" => "rtmp://localhost/live",
                    "flashVer" => "FMLE/3.0",
                    "objectEncoding" => 0.0,
                },
            ],
        )
        .await;

        let result = client_read_command(client).await;
        assert_eq!(result[0].as_str(), Some("_result"));
        assert_eq!(result[1].as_number(), Some(1.0));
        assert_eq!(
            result[3].get_string("code"),
            Some(cmd::CONNECT_SUCCESS)
        );
    }

    async fn drive_create_stream(client: &mut Connection<tokio::io::DuplexStream>) {
        client_send(
            client,
            &[
                AmfValue::String("createStream".into()),
                AmfValue::Number(2.0),
                AmfValue::Null,
            ],
        )
        .await;
        let result = client_read_command(client).await;
        assert_eq!(result[0].as_str(), Some("_result"));
        assert_eq!(result[1].as_number(), Some(2.0));
        assert_eq!(result[3].as_number(), Some(1.0)); // stream id
    }

    #[tokio::test]
    async fn test_publish_flow() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let server = tokio::spawn(async move {
            let mut session = ServerSession::new(Connection::new(server_io));
            let outcome = session.run(&OneKey).await.unwrap();
            (outcome, session.channel_key(), session.stream_name().to_string())
        });

        drive_connect(&mut client).await;
        drive_create_stream(&mut client).await;

        client_send(
            &mut client,
            &[
                AmfValue::String("publish".into()),
                AmfValue::Number(3.0),
                AmfValue::Null,
                AmfValue::String("movie?k=sekrit".into()),
                AmfValue::String("live".into()),
            ],
        )
        .await;
        let status = client_read_command(&mut client).await;
        assert_eq!(status[0].as_str(), Some("onStatus"));
        assert_eq!(status[3].get_string("code"), Some(cmd::PUBLISH_START));

        let (outcome, channel, name) = server.await.unwrap();
        assert_eq!(outcome, SessionOutcome::Publisher);
        assert_eq!(channel, "live/movie");
        assert_eq!(name, "movie");
    }

    #[tokio::test]
    async fn test_unauthorized_publish() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let server = tokio::spawn(async move {
            let mut session = ServerSession::new(Connection::new(server_io));
            session.run(&OneKey).await
        });

        drive_connect(&mut client).await;
        drive_create_stream(&mut client).await;

        client_send(
            &mut client,
            &[
                AmfValue::String("publish".into()),
                AmfValue::Number(3.0),
                AmfValue::Null,
                AmfValue::String("movie?k=wrong".into()),
                AmfValue::String("live".into()),
            ],
        )
        .await;

        let status = client_read_command(&mut client).await;
        assert_eq!(status[3].get_string("level"), Some("error"));
        assert_eq!(status[3].get_string("code"), Some(cmd::PUBLISH_BAD_NAME));

        assert!(matches!(
            server.await.unwrap(),
            Err(Error::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_play_flow_sends_four_statuses() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let server = tokio::spawn(async move {
            let mut session = ServerSession::new(Connection::new(server_io));
            session.run(&AllowAll).await
        });

        drive_connect(&mut client).await;
        drive_create_stream(&mut client).await;

        client_send(
            &mut client,
            &[
                AmfValue::String("play".into()),
                AmfValue::Number(0.0),
                AmfValue::Null,
                AmfValue::String("movie".into()),
            ],
        )
        .await;

        let mut codes = Vec::new();
        for _ in 0..4 {
            let status = client_read_command(&mut client).await;
            codes.push(status[3].get_string("code").unwrap().to_string());
        }
        assert_eq!(
            codes,
            vec![
                cmd::PLAY_RESET,
                cmd::PLAY_START,
                cmd::DATA_START,
                cmd::PLAY_PUBLISH_NOTIFY,
            ]
        );

        assert_eq!(server.await.unwrap().unwrap(), SessionOutcome::Player);
    }

    #[tokio::test]
    async fn test_connect_requires_transaction_one() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let server = tokio::spawn(async move {
            let mut session = ServerSession::new(Connection::new(server_io));
            session.run(&AllowAll).await
        });

        client_send(
            &mut client,
            &[
                AmfValue::String("connect".into()),
                AmfValue::Number(7.0),
                amf_object! { "app" => "live" },
            ],
        )
        .await;

        assert!(matches!(
            server.await.unwrap(),
            Err(Error::Protocol(ProtocolError::BadTransactionId(_)))
        ));
    }

    #[tokio::test]
    async fn test_silent_commands_ignored() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut client = Connection::new(client_io);

        let server = tokio::spawn(async move {
            let mut session = ServerSession::new(Connection::new(server_io));
            session.run(&AllowAll).await
        });

        drive_connect(&mut client).await;
        client_send(
            &mut client,
            &[
                AmfValue::String("releaseStream".into()),
                AmfValue::Number(2.0),
                AmfValue::Null,
                AmfValue::String("movie".into()),
            ],
        )
        .await;
        client_send(
            &mut client,
            &[
                AmfValue::String("FCPublish".into()),
                AmfValue::Number(3.0),
                AmfValue::Null,
                AmfValue::String("movie".into()),
            ],
        )
        .await;
        drive_create_stream(&mut client).await;

        client_send(
            &mut client,
            &[
                AmfValue::String("play".into()),
                AmfValue::Number(0.0),
                AmfValue::Null,
                AmfValue::String("movie".into()),
            ],
        )
        .await;
        for _ in 0..4 {
            client_read_command(&mut client).await;
        }
        assert_eq!(server.await.unwrap().unwrap(), SessionOutcome::Player);
    }

    #[test]
    fn test_token_parsing() {
        let (_a, b) = tokio::io::duplex(16);
        let mut session = ServerSession::new(Connection::new(b));
        session.app = "live".into();
        session.stream_name = "movie?x=1&k=abc".into();
        assert_eq!(session.stream_name(), "movie");
        assert_eq!(session.publish_token(), Some("abc"));
        assert_eq!(session.channel_key(), "live/movie");

        session.stream_name = "plain".into();
        assert_eq!(session.publish_token(), None);
        assert_eq!(session.stream_name(), "plain");
    }
}
