//! # Dungeonlink Server
//!
//! Consistency core for a cooperative multiplayer dungeon game: keeps
//! several clients agreeing on one procedurally built, player-editable
//! world over plain TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DUNGEONLINK SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Xorshift128+ PRNG, world seed derivation  │
//! │  └── vec2.rs     - 2D float vector                           │
//! │                                                              │
//! │  game/           - World and simulation types                │
//! │  ├── aabb.rs     - Overlap test, registry, push-out          │
//! │  ├── dungeon.rs  - Seeded generator + JSON persistence       │
//! │  └── player.rs   - Roles, abilities, builder blocks          │
//! │                                                              │
//! │  network/        - Session hub (non-deterministic)           │
//! │  ├── protocol.rs - 9 message kinds + length-prefix framing   │
//! │  ├── session.rs  - Authoritative session state               │
//! │  ├── server.rs   - Accept loop, relays, cleanup              │
//! │  └── client.rs   - Join, receive loop, handler dispatch      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! The dungeon is generated once from a seed and read-only afterwards.
//! Player poses and builder blocks flow through the server, which applies
//! each event to the single session state under one lock and rebroadcasts
//! it; block placement is an upsert keyed by grid coordinate, so duplicate
//! delivery is harmless. Conflicting edits to the same cell resolve as
//! last write wins.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::{derive_world_seed, DeterministicRng};
pub use crate::core::vec2::Vec2;
pub use game::aabb::{overlap, resolve_pushout, Aabb, ColliderRegistry};
pub use game::dungeon::{DungeonGenerator, DungeonModel, GeneratorConfig};
pub use game::player::{Player, PlayerRole, PlayerSnapshot};
pub use network::{GameClient, GameServer, Message, ServerConfig, SessionState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// World-space edge length of one grid tile.
pub const TILE_SIZE: f32 = 32.0;

/// Default server port.
pub const DEFAULT_PORT: u16 = 5555;
