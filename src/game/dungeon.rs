//! Procedural Dungeon Generation
//!
//! Seeded rooms-and-corridors generator. All randomness comes from the
//! injected [`DeterministicRng`], so the same seed always yields the same
//! world; the server generates once and ships the result to every client.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::rng::DeterministicRng;
use crate::game::aabb::{overlap, Aabb};

/// One cell of the world grid.
///
/// The discriminants are the wire codes of the persisted document and must
/// never be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TileType {
    /// Void outside the playable area
    Empty = 0,
    /// Solid rock, blocks movement
    Wall = 1,
    /// Walkable ground
    Floor = 2,
    /// Doorway between areas
    Door = 3,
    /// Damages players who step on it
    Trap = 4,
    /// Lootable chest
    Chest = 5,
    /// Party spawn marker
    Spawn = 6,
    /// Boss encounter marker
    Boss = 7,
    /// Reserved for the builder-block overlay; never written by generation
    BuilderBlock = 8,
}

impl TileType {
    /// Wire code for the persisted document.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code back into a tile.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TileType::Empty),
            1 => Some(TileType::Wall),
            2 => Some(TileType::Floor),
            3 => Some(TileType::Door),
            4 => Some(TileType::Trap),
            5 => Some(TileType::Chest),
            6 => Some(TileType::Spawn),
            7 => Some(TileType::Boss),
            8 => Some(TileType::BuilderBlock),
            _ => None,
        }
    }
}

/// Role a room plays in the dungeon layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Plain room
    Normal,
    /// First accepted room, holds the spawn tile
    Spawn,
    /// Last accepted room, holds the boss tile
    Boss,
    /// Room that rolled a trap during feature placement
    Trap,
}

/// A rectangular room in grid coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Left column
    pub x: i32,
    /// Top row
    pub y: i32,
    /// Width in tiles
    pub width: i32,
    /// Height in tiles
    pub height: i32,
    /// Layout role
    #[serde(rename = "type")]
    pub kind: RoomKind,
}

impl Room {
    /// Create a plain room.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            kind: RoomKind::Normal,
        }
    }

    /// Center tile, rounded down.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Bounding box for overlap testing against other rooms.
    pub fn aabb(&self) -> Aabb {
        Aabb::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }

    /// Whether a grid coordinate lies inside the room's rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Tunable generation parameters.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Grid width in tiles.
    pub width: i32,
    /// Grid height in tiles.
    pub height: i32,
    /// Rooms to attempt; the accepted count may be lower.
    pub num_rooms: usize,
    /// Minimum room edge length.
    pub room_min: i32,
    /// Maximum room edge length.
    pub room_max: i32,
    /// Placement attempts per room before it is skipped.
    pub retries_per_room: u32,
    /// Probability that an interior room gets a trap.
    pub trap_chance: f64,
    /// Probability that an interior room gets a chest.
    pub chest_chance: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 60,
            num_rooms: 8,
            room_min: 5,
            room_max: 12,
            retries_per_room: 30,
            trap_chance: 0.4,
            chest_chance: 0.3,
        }
    }
}

/// Errors loading or decoding a persisted dungeon document.
#[derive(Debug, thiserror::Error)]
pub enum DungeonError {
    /// File read/write failed.
    #[error("dungeon file error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON for the expected schema.
    #[error("dungeon document error: {0}")]
    Json(#[from] serde_json::Error),

    /// Grid rows do not match the declared width/height.
    #[error("grid shape does not match declared {width}x{height}")]
    GridShape {
        /// Declared width.
        width: i32,
        /// Declared height.
        height: i32,
    },

    /// A grid cell holds a code outside 0..=8.
    #[error("invalid tile code {0}")]
    InvalidTileCode(u8),
}

/// Persisted form of a dungeon: grid as rows of tile codes, rooms as flat
/// records, spawn point as a coordinate pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DungeonDocument {
    /// Grid width in tiles.
    pub width: i32,
    /// Grid height in tiles.
    pub height: i32,
    /// Row-major tile codes, `height` rows of `width` cells.
    pub grid: Vec<Vec<u8>>,
    /// Rooms in acceptance order.
    pub rooms: Vec<Room>,
    /// Spawn coordinate, absent when no room was accepted.
    pub spawn_point: Option<(i32, i32)>,
}

/// A generated dungeon: the tile grid, the accepted rooms in order, and the
/// spawn coordinate. Read-only once generation returns; builder blocks are
/// an overlay in session state and are never written into this grid.
#[derive(Clone, Debug, PartialEq)]
pub struct DungeonModel {
    width: i32,
    height: i32,
    grid: Vec<TileType>,
    rooms: Vec<Room>,
    spawn_point: Option<(i32, i32)>,
}

impl DungeonModel {
    fn filled(width: i32, height: i32, tile: TileType) -> Self {
        Self {
            width,
            height,
            grid: vec![tile; (width * height) as usize],
            rooms: Vec::new(),
            spawn_point: None,
        }
    }

    /// Grid width in tiles.
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Grid height in tiles.
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Accepted rooms in acceptance order.
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Spawn tile coordinate, if any room was accepted.
    pub fn spawn_point(&self) -> Option<(i32, i32)> {
        self.spawn_point
    }

    /// Tile at a grid coordinate. None outside the grid.
    pub fn tile(&self, x: i32, y: i32) -> Option<TileType> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.grid[(y * self.width + x) as usize])
    }

    /// Write a tile, silently clipping writes outside the grid. Corridor
    /// carving relies on the clipping.
    fn set_tile(&mut self, x: i32, y: i32, tile: TileType) {
        if x >= 0 && y >= 0 && x < self.width && y < self.height {
            self.grid[(y * self.width + x) as usize] = tile;
        }
    }

    /// Convert to the persisted document form.
    pub fn to_document(&self) -> DungeonDocument {
        let grid = (0..self.height)
            .map(|y| {
                (0..self.width)
                    .map(|x| self.grid[(y * self.width + x) as usize].code())
                    .collect()
            })
            .collect();

        DungeonDocument {
            width: self.width,
            height: self.height,
            grid,
            rooms: self.rooms.clone(),
            spawn_point: self.spawn_point,
        }
    }

    /// Rebuild a model from its persisted document.
    ///
    /// The reconstructed grid and room list are identical to the ones the
    /// document was produced from.
    pub fn from_document(doc: &DungeonDocument) -> Result<Self, DungeonError> {
        if doc.width < 0
            || doc.height < 0
            || doc.grid.len() != doc.height as usize
            || doc.grid.iter().any(|row| row.len() != doc.width as usize)
        {
            return Err(DungeonError::GridShape {
                width: doc.width,
                height: doc.height,
            });
        }

        let mut grid = Vec::with_capacity((doc.width * doc.height) as usize);
        for row in &doc.grid {
            for &code in row {
                let tile = TileType::from_code(code).ok_or(DungeonError::InvalidTileCode(code))?;
                grid.push(tile);
            }
        }

        Ok(Self {
            width: doc.width,
            height: doc.height,
            grid,
            rooms: doc.rooms.clone(),
            spawn_point: doc.spawn_point,
        })
    }

    /// Save as a JSON document.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), DungeonError> {
        let json = serde_json::to_string(&self.to_document())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a JSON document saved by [`DungeonModel::save_to_file`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, DungeonError> {
        let json = fs::read_to_string(path)?;
        let doc: DungeonDocument = serde_json::from_str(&json)?;
        Self::from_document(&doc)
    }
}

/// Rooms-and-corridors dungeon generator.
pub struct DungeonGenerator {
    config: GeneratorConfig,
}

impl DungeonGenerator {
    /// Create a generator with the given parameters.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generation parameters.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Build a dungeon.
    ///
    /// Rooms that exhaust their retry budget are skipped, so the accepted
    /// count may be below `num_rooms`; that is a valid outcome, not an
    /// error. Zero accepted rooms yields an all-wall grid with no spawn.
    pub fn generate(&self, rng: &mut DeterministicRng) -> DungeonModel {
        let cfg = &self.config;
        let mut model = DungeonModel::filled(cfg.width, cfg.height, TileType::Wall);

        for _ in 0..cfg.num_rooms {
            if let Some(room) = self.try_place_room(&model, rng) {
                carve_room(&mut model, &room);
                model.rooms.push(room);
            }
        }

        self.connect_rooms(&mut model, rng);
        self.mark_spawn_and_boss(&mut model);
        self.add_features(&mut model, rng);

        model
    }

    /// Roll room rectangles until one fits without overlapping an accepted
    /// room, up to the retry budget.
    fn try_place_room(&self, model: &DungeonModel, rng: &mut DeterministicRng) -> Option<Room> {
        let cfg = &self.config;

        for _ in 0..cfg.retries_per_room {
            let width = rng.next_int_range(cfg.room_min, cfg.room_max);
            let height = rng.next_int_range(cfg.room_min, cfg.room_max);

            // One-tile wall border on every side
            if width + 2 > cfg.width || height + 2 > cfg.height {
                continue;
            }
            let x = rng.next_int_range(1, cfg.width - width - 1);
            let y = rng.next_int_range(1, cfg.height - height - 1);

            let candidate = Room::new(x, y, width, height);
            let overlaps = model
                .rooms
                .iter()
                .any(|room| overlap(&candidate.aabb(), &room.aabb()));

            if !overlaps {
                return Some(candidate);
            }
        }

        None
    }

    /// Connect consecutive rooms with L-shaped corridors, a coin flip
    /// picking the bend direction.
    ///
    /// A corridor between two centers may cut through an unrelated room
    /// that happens to lie between them; that is accepted layout behavior.
    fn connect_rooms(&self, model: &mut DungeonModel, rng: &mut DeterministicRng) {
        for i in 1..model.rooms.len() {
            let (cx1, cy1) = model.rooms[i - 1].center();
            let (cx2, cy2) = model.rooms[i].center();

            if rng.chance(0.5) {
                carve_h_corridor(model, cx1, cx2, cy1);
                carve_v_corridor(model, cy1, cy2, cx2);
            } else {
                carve_v_corridor(model, cy1, cy2, cx1);
                carve_h_corridor(model, cx1, cx2, cy2);
            }
        }
    }

    /// Tag the first room as spawn and the last as boss, marking their
    /// center tiles.
    fn mark_spawn_and_boss(&self, model: &mut DungeonModel) {
        if model.rooms.is_empty() {
            return;
        }

        model.rooms[0].kind = RoomKind::Spawn;
        let spawn = model.rooms[0].center();
        model.set_tile(spawn.0, spawn.1, TileType::Spawn);
        model.spawn_point = Some(spawn);

        let last = model.rooms.len() - 1;
        model.rooms[last].kind = RoomKind::Boss;
        let boss = model.rooms[last].center();
        model.set_tile(boss.0, boss.1, TileType::Boss);
    }

    /// Roll traps and chests for every room between spawn and boss.
    ///
    /// A trap overwrites whatever tile it lands on; a chest only replaces
    /// plain floor, so it never clobbers a trap or a corridor marker.
    fn add_features(&self, model: &mut DungeonModel, rng: &mut DeterministicRng) {
        let cfg = &self.config;
        let count = model.rooms.len();
        if count < 3 {
            return;
        }

        for i in 1..count - 1 {
            let room = model.rooms[i].clone();
            // Interior cells only, one tile in from the room edge
            let (x_min, x_max) = (room.x + 1, room.x + room.width - 2);
            let (y_min, y_max) = (room.y + 1, room.y + room.height - 2);
            if x_min > x_max || y_min > y_max {
                continue;
            }

            if rng.chance(cfg.trap_chance) {
                let tx = rng.next_int_range(x_min, x_max);
                let ty = rng.next_int_range(y_min, y_max);
                model.set_tile(tx, ty, TileType::Trap);
                model.rooms[i].kind = RoomKind::Trap;
            }

            if rng.chance(cfg.chest_chance) {
                let cx = rng.next_int_range(x_min, x_max);
                let cy = rng.next_int_range(y_min, y_max);
                if model.tile(cx, cy) == Some(TileType::Floor) {
                    model.set_tile(cx, cy, TileType::Chest);
                }
            }
        }
    }
}

fn carve_room(model: &mut DungeonModel, room: &Room) {
    for y in room.y..room.y + room.height {
        for x in room.x..room.x + room.width {
            model.set_tile(x, y, TileType::Floor);
        }
    }
}

fn carve_h_corridor(model: &mut DungeonModel, x1: i32, x2: i32, y: i32) {
    for x in x1.min(x2)..=x1.max(x2) {
        model.set_tile(x, y, TileType::Floor);
    }
}

fn carve_v_corridor(model: &mut DungeonModel, y1: i32, y2: i32, x: i32) {
    for y in y1.min(y2)..=y1.max(y2) {
        model.set_tile(x, y, TileType::Floor);
    }
}
