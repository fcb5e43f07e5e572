//! RTMP protocol constants

/// Protocol version carried in C0/S0
pub const RTMP_VERSION: u8 = 3;

/// C1/C2/S1/S2 packet size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both sides start with
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Chunk size we negotiate after connect
pub const RECOMMENDED_CHUNK_SIZE: u32 = 1024;

/// Upper bound we accept for SetChunkSize
pub const MAX_CHUNK_SIZE: u32 = 65536;

/// Window acknowledgement size both sides start with
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;

/// Peer bandwidth advertised after connect
pub const DEFAULT_PEER_BANDWIDTH: u32 = 2_500_000;

/// The received-bytes counter resets when it approaches this bound
pub const ACK_COUNTER_RESET: u32 = 0xF000_0000;

/// Chunk-assembly arena size per connection
pub const ARENA_SIZE: usize = 500 * 1024;

/// Message type ids
pub mod msg {
    pub const SET_CHUNK_SIZE: u8 = 1;
    pub const ABORT: u8 = 2;
    pub const ACK: u8 = 3;
    pub const USER_CONTROL: u8 = 4;
    pub const WINDOW_ACK_SIZE: u8 = 5;
    pub const SET_PEER_BANDWIDTH: u8 = 6;
    pub const AUDIO: u8 = 8;
    pub const VIDEO: u8 = 9;
    pub const DATA_AMF3: u8 = 15;
    pub const COMMAND_AMF3: u8 = 17;
    pub const DATA_AMF0: u8 = 18;
    pub const COMMAND_AMF0: u8 = 20;
}

/// Chunk stream ids by convention
pub mod csid {
    pub const CONTROL: u32 = 2;
    pub const COMMAND: u32 = 3;
    pub const AUDIO: u32 = 4;
    pub const VIDEO: u32 = 6;
}

/// User-control event types
pub mod user_control {
    pub const STREAM_BEGIN: u16 = 0;
    pub const STREAM_EOF: u16 = 1;
    pub const STREAM_DRY: u16 = 2;
    pub const SET_BUFFER_LEN: u16 = 3;
    pub const STREAM_IS_RECORDED: u16 = 4;
    pub const PING_REQUEST: u16 = 6;
    pub const PING_RESPONSE: u16 = 7;
}

/// Command and status strings
pub mod cmd {
    pub const CONNECT: &str = "connect";
    pub const CREATE_STREAM: &str = "createStream";
    pub const PUBLISH: &str = "publish";
    pub const PLAY: &str = "play";
    pub const FC_PUBLISH: &str = "FCPublish";
    pub const FC_UNPUBLISH: &str = "FCUnpublish";
    pub const RELEASE_STREAM: &str = "releaseStream";
    pub const DELETE_STREAM: &str = "deleteStream";
    pub const RESULT: &str = "_result";
    pub const ERROR: &str = "_error";
    pub const ON_STATUS: &str = "onStatus";

    pub const CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
    pub const PUBLISH_START: &str = "NetStream.Publish.Start";
    pub const PUBLISH_BAD_NAME: &str = "NetStream.Publish.BadName";
    pub const PLAY_RESET: &str = "NetStream.Play.Reset";
    pub const PLAY_START: &str = "NetStream.Play.Start";
    pub const DATA_START: &str = "NetStream.Data.Start";
    pub const PLAY_PUBLISH_NOTIFY: &str = "NetStream.Play.PublishNotify";
}
