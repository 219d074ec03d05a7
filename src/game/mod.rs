//! Game Logic Module
//!
//! World building and the simulation pieces the network core keeps
//! consistent across clients.
//!
//! ## Module Structure
//!
//! - `aabb`: overlap testing, collider registry, push-out resolution
//! - `dungeon`: deterministic dungeon generation and persistence
//! - `player`: roles, the runtime player entity, builder blocks

pub mod aabb;
pub mod dungeon;
pub mod player;

// Re-export key types
pub use aabb::{overlap, resolve_pushout, Aabb, ColliderHandle, ColliderRegistry};
pub use dungeon::{DungeonDocument, DungeonGenerator, DungeonModel, GeneratorConfig, Room, TileType};
pub use player::{AbilityEvent, Block, Player, PlayerRole, PlayerSnapshot};
