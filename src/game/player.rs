//! Players, Roles, and Builder Blocks
//!
//! Role stat tables and the runtime player entity the rendering/input
//! collaborator drives. The collaborator owns the window and devices and
//! talks to this type only through `apply_input`, `update_physics`, the
//! read-only accessors, the block operations, and `use_special_ability`.

use serde::{Deserialize, Serialize};

use crate::core::vec2::Vec2;
use crate::game::aabb::Aabb;

/// Player size in world units.
pub const PLAYER_SIZE: f32 = 28.0;

/// Blocks a builder starts with.
pub const BUILDER_BLOCK_INVENTORY: u32 = 10;

/// The four playable roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    /// Fast movement, dash ability
    Scout,
    /// High health, damage-absorbing shield
    Tank,
    /// Ranged area damage
    Mage,
    /// Places and removes blocks that sync to every client
    Builder,
}

impl PlayerRole {
    /// Base movement speed in world units per tick.
    #[inline]
    pub fn speed(self) -> f32 {
        match self {
            PlayerRole::Scout => 6.0,
            PlayerRole::Tank => 3.0,
            PlayerRole::Mage => 4.0,
            PlayerRole::Builder => 4.5,
        }
    }

    /// Maximum health.
    #[inline]
    pub fn max_health(self) -> f32 {
        match self {
            PlayerRole::Scout => 80.0,
            PlayerRole::Tank => 150.0,
            PlayerRole::Mage => 70.0,
            PlayerRole::Builder => 100.0,
        }
    }

    /// Damage dealt by the role's basic attack.
    #[inline]
    pub fn damage(self) -> f32 {
        match self {
            PlayerRole::Scout => 15.0,
            PlayerRole::Tank => 20.0,
            PlayerRole::Mage => 30.0,
            PlayerRole::Builder => 10.0,
        }
    }
}

/// A builder-placed block, keyed in session state by its grid coordinate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Grid column
    pub x: i32,
    /// Grid row
    pub y: i32,
    /// Block material tag
    #[serde(rename = "type")]
    pub block_type: String,
}

impl Block {
    /// Default block material.
    pub const DEFAULT_TYPE: &'static str = "platform";

    /// Create a platform block at a grid coordinate.
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            block_type: Self::DEFAULT_TYPE.to_string(),
        }
    }

    /// World-space box for collision, given the tile size.
    pub fn world_aabb(&self, tile_size: f32) -> Aabb {
        Aabb::new(
            self.x as f32 * tile_size,
            self.y as f32 * tile_size,
            tile_size,
            tile_size,
        )
    }
}

/// Wire form of a player, as stored by the session and broadcast in
/// `player_update` messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Server-assigned identifier
    pub player_id: String,
    /// Role chosen at join
    pub role: PlayerRole,
    /// World X position
    pub x: f32,
    /// World Y position
    pub y: f32,
    /// Current health
    pub health: f32,
    /// Current velocity
    pub velocity: (f32, f32),
    /// Tank shield up
    #[serde(default)]
    pub shield_active: bool,
}

impl PlayerSnapshot {
    /// Fresh snapshot for a player that just joined, placed at the given
    /// world position with full health.
    pub fn joined(player_id: String, role: PlayerRole, x: f32, y: f32) -> Self {
        Self {
            player_id,
            role,
            x,
            y,
            health: role.max_health(),
            velocity: (0.0, 0.0),
            shield_active: false,
        }
    }
}

/// Event produced by [`Player::use_special_ability`], for the caller to act
/// on (spawn a projectile, play an effect) and forward over the network.
#[derive(Clone, Debug, PartialEq)]
pub enum AbilityEvent {
    /// Scout burst of speed along the current heading
    Dash {
        /// Normalized dash direction
        direction: Vec2,
    },
    /// Tank damage shield raised
    Shield,
    /// Mage projectile
    Fireball {
        /// Launch position (player center)
        position: Vec2,
        /// Damage carried by the projectile
        damage: f32,
    },
}

/// The locally simulated player entity.
pub struct Player {
    id: String,
    role: PlayerRole,
    position: Vec2,
    velocity: Vec2,
    health: f32,
    shield_active: bool,
    dash_cooldown: f32,
    shield_cooldown: f32,
    fireball_cooldown: f32,
    block_inventory: u32,
}

impl Player {
    /// Create a player with role stats applied.
    pub fn new(id: impl Into<String>, role: PlayerRole) -> Self {
        let block_inventory = if role == PlayerRole::Builder {
            BUILDER_BLOCK_INVENTORY
        } else {
            0
        };

        Self {
            id: id.into(),
            role,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            health: role.max_health(),
            shield_active: false,
            dash_cooldown: 0.0,
            shield_cooldown: 0.0,
            fireball_cooldown: 0.0,
            block_inventory,
        }
    }

    /// Identifier. Reassigned once the server's `game_state` snapshot
    /// reveals the server-side id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adopt the server-assigned identifier.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Current role.
    pub fn role(&self) -> PlayerRole {
        self.role
    }

    /// Current position.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Move the player, e.g. to the dungeon spawn point.
    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    /// Current health.
    pub fn health(&self) -> f32 {
        self.health
    }

    /// Whether the tank shield is up.
    pub fn shield_active(&self) -> bool {
        self.shield_active
    }

    /// Remaining builder blocks.
    pub fn block_inventory(&self) -> u32 {
        self.block_inventory
    }

    /// World-space collision box.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(self.position.x, self.position.y, PLAYER_SIZE, PLAYER_SIZE)
    }

    /// Overwrite the collision box position, after push-out resolution.
    pub fn set_aabb_position(&mut self, aabb: &Aabb) {
        self.position = Vec2::new(aabb.x, aabb.y);
    }

    /// Set velocity from a movement direction, normalized and scaled by
    /// role speed.
    pub fn apply_input(&mut self, direction: Vec2) {
        let dir = direction.normalize();
        self.velocity = dir.scale(self.role.speed());
    }

    /// Integrate velocity and decay ability cooldowns. `dt` is in ticks
    /// (1.0 = one fixed update).
    pub fn update_physics(&mut self, dt: f32) {
        self.position = self.position + self.velocity.scale(dt);

        self.dash_cooldown = (self.dash_cooldown - dt).max(0.0);
        self.shield_cooldown = (self.shield_cooldown - dt).max(0.0);
        self.fireball_cooldown = (self.fireball_cooldown - dt).max(0.0);
    }

    /// Trigger the role's special ability, if off cooldown.
    ///
    /// Builders have no active ability here; their special is block
    /// placement through [`Player::place_block`].
    pub fn use_special_ability(&mut self) -> Option<AbilityEvent> {
        match self.role {
            PlayerRole::Scout if self.dash_cooldown <= 0.0 => {
                if self.velocity.length_squared() > 0.0 {
                    let direction = self.velocity.normalize();
                    self.velocity = direction.scale(self.role.speed() * 3.0);
                    self.dash_cooldown = 180.0; // 3 s at 60 ticks/s
                    Some(AbilityEvent::Dash { direction })
                } else {
                    None
                }
            }
            PlayerRole::Tank if self.shield_cooldown <= 0.0 => {
                self.shield_active = true;
                self.shield_cooldown = 300.0; // 5 s
                Some(AbilityEvent::Shield)
            }
            PlayerRole::Mage if self.fireball_cooldown <= 0.0 => {
                self.fireball_cooldown = 120.0; // 2 s
                Some(AbilityEvent::Fireball {
                    position: Vec2::new(
                        self.position.x + PLAYER_SIZE / 2.0,
                        self.position.y + PLAYER_SIZE / 2.0,
                    ),
                    damage: self.role.damage(),
                })
            }
            _ => None,
        }
    }

    /// Place a block at a grid coordinate. Only builders with inventory
    /// left can place; the returned block is what gets sent to the server.
    pub fn place_block(&mut self, grid_x: i32, grid_y: i32) -> Option<Block> {
        if self.role != PlayerRole::Builder || self.block_inventory == 0 {
            return None;
        }
        self.block_inventory -= 1;
        Some(Block::new(grid_x, grid_y))
    }

    /// Remove a block at a grid coordinate, refunding inventory. Only
    /// builders can remove.
    pub fn remove_block(&mut self, grid_x: i32, grid_y: i32) -> Option<(i32, i32)> {
        if self.role != PlayerRole::Builder {
            return None;
        }
        self.block_inventory += 1;
        Some((grid_x, grid_y))
    }

    /// Apply incoming damage. An active tank shield absorbs 80%. Returns
    /// true when the player dies.
    pub fn take_damage(&mut self, amount: f32) -> bool {
        let applied = if self.shield_active {
            amount * 0.2
        } else {
            amount
        };
        self.health = (self.health - applied).max(0.0);
        self.health <= 0.0
    }

    /// Snapshot for a `player_update` broadcast.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.id.clone(),
            role: self.role,
            x: self.position.x,
            y: self.position.y,
            health: self.health,
            velocity: self.velocity.into(),
            shield_active: self.shield_active,
        }
    }

    /// Overwrite pose and health from a snapshot received off the network.
    pub fn apply_snapshot(&mut self, snapshot: &PlayerSnapshot) {
        self.position = Vec2::new(snapshot.x, snapshot.y);
        self.velocity = snapshot.velocity.into();
        self.health = snapshot.health;
        self.shield_active = snapshot.shield_active;
    }
}
