//! Protocol Messages & Framing
//!
//! Wire format for client-server communication: each frame is a 4-byte
//! big-endian length prefix followed by that many bytes of UTF-8 JSON. The
//! JSON value is always `{"type": <kind>, "data": <payload>}`, decoded once
//! at this boundary into a closed [`Message`] enum.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::dungeon::DungeonDocument;
use crate::game::player::{Block, PlayerRole, PlayerSnapshot};

/// Length-prefix size in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default cap on a declared frame length. A peer announcing more than this
/// is treated as desynchronized and disconnected.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 1024 * 1024;

/// Protocol errors.
///
/// [`ProtocolError::is_fatal`] separates errors that poison the stream from
/// ones local to a single message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Socket-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed mid-prefix or mid-payload; the stream cannot be
    /// resynchronized.
    #[error("peer closed inside a frame")]
    TruncatedFrame,

    /// Declared length exceeds the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared payload length.
        len: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Payload is not valid JSON for any message kind.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether the connection must be torn down. Malformed payloads are
    /// recoverable (the frame boundary is still intact); everything else
    /// desynchronizes or kills the stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Malformed(_))
    }
}

/// Discriminant-only view of [`Message`], used to key client handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    /// Player pose/health broadcast
    PlayerUpdate,
    /// Builder block placed
    BlockPlace,
    /// Builder block removed
    BlockRemove,
    /// Full dungeon push
    DungeonData,
    /// Player joined the session
    PlayerJoin,
    /// Player left the session
    PlayerLeave,
    /// Full session snapshot for a joiner
    GameState,
    /// Damage dealt to a player
    Damage,
    /// Chat line
    Chat,
}

/// Messages exchanged between client and server.
///
/// Exactly nine kinds; the serde tag is the wire `type` field and the
/// variant payload is the wire `data` field. A frame with any other tag or
/// a mismatched payload fails decoding, it never half-parses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Message {
    /// A player's current pose and health.
    PlayerUpdate(PlayerSnapshot),

    /// A builder placed a block. Upsert keyed by grid coordinate, so the
    /// server echoing it back to the placer is harmless.
    BlockPlace(Block),

    /// A builder removed a block.
    BlockRemove(BlockRemoveData),

    /// The full dungeon document, pushed by the server.
    DungeonData(DungeonDocument),

    /// Join handshake (client to server) or join notice (server to the
    /// other clients).
    PlayerJoin(PlayerJoinData),

    /// A player disconnected.
    PlayerLeave(PlayerLeaveData),

    /// Full session snapshot, sent to a joiner only.
    GameState(GameStateData),

    /// Damage applied to a player.
    Damage(DamageData),

    /// Chat line relayed through the server.
    Chat(ChatData),
}

impl Message {
    /// The message's kind tag.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PlayerUpdate(_) => MessageKind::PlayerUpdate,
            Message::BlockPlace(_) => MessageKind::BlockPlace,
            Message::BlockRemove(_) => MessageKind::BlockRemove,
            Message::DungeonData(_) => MessageKind::DungeonData,
            Message::PlayerJoin(_) => MessageKind::PlayerJoin,
            Message::PlayerLeave(_) => MessageKind::PlayerLeave,
            Message::GameState(_) => MessageKind::GameState,
            Message::Damage(_) => MessageKind::Damage,
            Message::Chat(_) => MessageKind::Chat,
        }
    }

    /// Serialize to the wire JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from wire JSON text.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Payload of [`Message::BlockRemove`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockRemoveData {
    /// Grid column
    pub x: i32,
    /// Grid row
    pub y: i32,
}

/// Payload of [`Message::PlayerJoin`]. The client omits `player_id`; the
/// server fills it in on the join notice it broadcasts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinData {
    /// Server-assigned id, absent on the client's handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    /// Chosen role
    pub role: PlayerRole,
}

/// Payload of [`Message::PlayerLeave`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeaveData {
    /// Id of the departed player
    pub player_id: String,
}

/// Payload of [`Message::GameState`]: the joiner's assigned id plus the
/// whole session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameStateData {
    /// The receiving client's server-assigned id
    pub player_id: String,
    /// Every connected player's latest snapshot, keyed by id
    pub players: BTreeMap<String, PlayerSnapshot>,
    /// Every placed builder block
    pub blocks: Vec<Block>,
    /// The active dungeon, if one is loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dungeon: Option<DungeonDocument>,
}

/// Payload of [`Message::Damage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DamageData {
    /// Player taking the damage
    pub player_id: String,
    /// Damage amount before any shield reduction
    pub amount: f32,
    /// Player (or entity) that dealt it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// Payload of [`Message::Chat`]. The server overwrites `player_id` and
/// stamps `timestamp` on relay, so clients cannot spoof either.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatData {
    /// Sending player, stamped by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    /// Chat text
    pub text: String,
    /// Server receive time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// FRAMING
// =============================================================================

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed cleanly between frames (zero
/// bytes read). A close inside the prefix or the payload is
/// [`ProtocolError::TruncatedFrame`]; a declared length above `max_len` is
/// [`ProtocolError::FrameTooLarge`]. Both are fatal.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                // Clean close on a frame boundary
                return Ok(None);
            }
            return Err(ProtocolError::TruncatedFrame);
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header);
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    if let Err(err) = reader.read_exact(&mut payload).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::TruncatedFrame);
        }
        return Err(err.into());
    }

    Ok(Some(payload))
}

/// Write one length-prefixed frame: prefix and payload leave in a single
/// write so a frame is never interleaved with another writer's bytes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one message. `Ok(None)` on clean close.
pub async fn read_message<R>(reader: &mut R, max_len: u32) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let payload = match read_frame(reader, max_len).await? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let message = serde_json::from_slice(&payload)?;
    Ok(Some(message))
}

/// Encode and write one message.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(message)?;
    write_frame(writer, &json).await
}
