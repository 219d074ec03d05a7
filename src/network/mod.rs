//! Network Layer
//!
//! Length-prefixed JSON over TCP. The server owns the authoritative
//! session; clients relay local events up and apply the broadcasts that
//! come back. Everything here is non-deterministic glue around the
//! deterministic `game` modules.

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{ClientError, GameClient};
pub use protocol::{Message, MessageKind, ProtocolError};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{ConnId, SessionState};
