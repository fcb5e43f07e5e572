//! RTMP handshake (simple variant)
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 S1 S2 ----------------------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! C1/S1 carry a 4-byte timestamp, 4 zero bytes and a random tail; the
//! echo packets mirror the peer's packet with our receive time in bytes
//! 4..8. No HMAC digest; encoders that want the digest variant still
//! complete this one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Default deadline for the whole exchange
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which side of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Client: C0C1 not yet sent. Server: waiting for C0C1.
    Initial,
    /// Server sent S0S1S2, waiting for C2
    AwaitEcho,
    Done,
}

/// Sans-io handshake state machine
///
/// The async drivers below feed it; tests can run both roles against each
/// other without sockets.
#[derive(Debug)]
pub struct Handshake {
    role: Role,
    state: State,
    our_packet: [u8; HANDSHAKE_SIZE],
}

impl Handshake {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: State::Initial,
            our_packet: generate_packet(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Client: C0+C1 to send first. Server: nothing.
    pub fn initial_bytes(&self) -> Option<Bytes> {
        match (self.role, self.state) {
            (Role::Client, State::Initial) => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&self.our_packet);
                Some(buf.freeze())
            }
            _ => None,
        }
    }

    /// How many bytes the next [`consume`] call needs.
    ///
    /// [`consume`]: Handshake::consume
    pub fn bytes_needed(&self) -> usize {
        match (self.role, self.state) {
            (Role::Server, State::Initial) => 1 + HANDSHAKE_SIZE,
            (Role::Client, State::Initial) => 1 + 2 * HANDSHAKE_SIZE,
            (Role::Server, State::AwaitEcho) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Feed exactly [`bytes_needed`] bytes; returns bytes to send back.
    ///
    /// [`bytes_needed`]: Handshake::bytes_needed
    pub fn consume(&mut self, mut input: Bytes) -> Result<Option<Bytes>> {
        match (self.role, self.state) {
            (Role::Server, State::Initial) => {
                let version = input.get_u8();
                // lenient: some encoders send versions above 3
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }
                let mut c1 = [0u8; HANDSHAKE_SIZE];
                input.copy_to_slice(&mut c1);

                let mut response = BytesMut::with_capacity(1 + 2 * HANDSHAKE_SIZE);
                response.put_u8(RTMP_VERSION);
                response.put_slice(&self.our_packet);
                response.put_slice(&generate_echo(&c1));
                self.state = State::AwaitEcho;
                Ok(Some(response.freeze()))
            }
            (Role::Server, State::AwaitEcho) => {
                // C2 is read and discarded; echo mismatches are tolerated
                self.state = State::Done;
                Ok(None)
            }
            (Role::Client, State::Initial) => {
                let version = input.get_u8();
                if version < RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }
                let mut s1 = [0u8; HANDSHAKE_SIZE];
                input.copy_to_slice(&mut s1);
                // S2 follows in the remaining bytes; not strictly validated

                self.state = State::Done;
                Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
            }
            _ => Ok(None),
        }
    }
}

/// time(4) + zero(4) + random tail
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    packet[0..4].copy_from_slice(&now.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut packet[8..]);
    packet
}

/// peer time(4) + our time(4) + peer random tail
fn generate_echo(peer: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0);
    echo[4..8].copy_from_slice(&now.to_be_bytes());
    echo
}

/// Run the server side with a deadline.
pub async fn handshake_server<S>(stream: &mut S, deadline: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(deadline, drive(stream, Role::Server))
        .await
        .map_err(|_| Error::from(HandshakeError::Incomplete))?
}

/// Run the client side with a deadline.
pub async fn handshake_client<S>(stream: &mut S, deadline: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(deadline, drive(stream, Role::Client))
        .await
        .map_err(|_| Error::from(HandshakeError::Incomplete))?
}

async fn drive<S>(stream: &mut S, role: Role) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(role);

    if let Some(bytes) = handshake.initial_bytes() {
        stream.write_all(&bytes).await?;
        stream.flush().await?;
    }

    while !handshake.is_done() {
        let needed = handshake.bytes_needed();
        let mut buf = vec![0u8; needed];
        stream.read_exact(&mut buf).await?;
        if let Some(response) = handshake.consume(Bytes::from(buf))? {
            stream.write_all(&response).await?;
            stream.flush().await?;
        }
    }
    Ok(())
}
