//! Session State
//!
//! The authoritative record of one game run: connected players, builder
//! blocks, and the active dungeon. Exactly one of these exists per server,
//! behind a single lock; every connection task mutates it through the
//! methods here and nothing else.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::game::dungeon::DungeonModel;
use crate::game::player::{Block, PlayerRole, PlayerSnapshot, PLAYER_SIZE};
use crate::network::protocol::{GameStateData, Message};
use crate::TILE_SIZE;

/// Server-local connection identifier.
pub type ConnId = u64;

/// Per-connection bookkeeping: the assigned player identity plus the
/// outbound queue owned by that connection's writer task.
#[derive(Debug)]
pub struct ClientHandle {
    /// Assigned on the player's join message; None until then.
    pub player_id: Option<String>,
    /// Role from the join message.
    pub role: Option<PlayerRole>,
    /// Outbound message queue. Enqueueing never blocks; a full queue means
    /// the peer has stalled and the connection gets dropped.
    pub sender: mpsc::Sender<Message>,
}

/// Authoritative in-memory session store.
#[derive(Debug)]
pub struct SessionState {
    players: BTreeMap<String, PlayerSnapshot>,
    blocks: BTreeMap<(i32, i32), Block>,
    dungeon: DungeonModel,
    connections: BTreeMap<ConnId, ClientHandle>,
    next_player_seq: u64,
}

impl SessionState {
    /// Create a session around a generated (or loaded) dungeon.
    pub fn new(dungeon: DungeonModel) -> Self {
        Self {
            players: BTreeMap::new(),
            blocks: BTreeMap::new(),
            dungeon,
            connections: BTreeMap::new(),
            next_player_seq: 0,
        }
    }

    /// The active dungeon.
    pub fn dungeon(&self) -> &DungeonModel {
        &self.dungeon
    }

    /// Connected players, keyed by id.
    pub fn players(&self) -> &BTreeMap<String, PlayerSnapshot> {
        &self.players
    }

    /// Placed builder blocks, keyed by grid coordinate.
    pub fn blocks(&self) -> &BTreeMap<(i32, i32), Block> {
        &self.blocks
    }

    /// Live connection count, joined or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a freshly accepted connection.
    pub fn register_connection(&mut self, conn_id: ConnId, sender: mpsc::Sender<Message>) {
        self.connections.insert(
            conn_id,
            ClientHandle {
                player_id: None,
                role: None,
                sender,
            },
        );
    }

    /// Handle a join: assign the next player id, remember the role, and
    /// create the player's snapshot at the dungeon spawn point.
    ///
    /// Returns None if the connection is unknown (already cleaned up) or
    /// has already joined; a second join must not orphan the first entry.
    pub fn join_player(&mut self, conn_id: ConnId, role: PlayerRole) -> Option<String> {
        let spawn = self.spawn_world_position();
        let handle = self.connections.get_mut(&conn_id)?;
        if handle.player_id.is_some() {
            return None;
        }

        let player_id = format!("player_{}", self.next_player_seq);
        self.next_player_seq += 1;

        handle.player_id = Some(player_id.clone());
        handle.role = Some(role);

        self.players.insert(
            player_id.clone(),
            PlayerSnapshot::joined(player_id.clone(), role, spawn.0, spawn.1),
        );

        Some(player_id)
    }

    /// Overwrite the sender's snapshot from a `player_update` payload.
    ///
    /// The stored id is always the server-assigned one for that connection,
    /// whatever the payload claimed. Updates from a connection that never
    /// joined are dropped.
    pub fn apply_player_update(
        &mut self,
        conn_id: ConnId,
        mut snapshot: PlayerSnapshot,
    ) -> Option<PlayerSnapshot> {
        let player_id = self.connections.get(&conn_id)?.player_id.clone()?;
        snapshot.player_id = player_id.clone();
        self.players.insert(player_id, snapshot.clone());
        Some(snapshot)
    }

    /// Upsert a block at its grid coordinate. Placing where a block already
    /// exists overwrites it, which makes the server's echo to the placing
    /// client safe to re-apply.
    pub fn place_block(&mut self, block: Block) {
        self.blocks.insert((block.x, block.y), block);
    }

    /// Remove a block. No-op (returns false) when nothing is there.
    pub fn remove_block(&mut self, x: i32, y: i32) -> bool {
        self.blocks.remove(&(x, y)).is_some()
    }

    /// Apply damage to a player's stored snapshot, clamping at zero.
    /// Returns the new health, or None for an unknown player.
    pub fn apply_damage(&mut self, player_id: &str, amount: f32) -> Option<f32> {
        let snapshot = self.players.get_mut(player_id)?;
        snapshot.health = (snapshot.health - amount).max(0.0);
        Some(snapshot.health)
    }

    /// Remove a connection and its player entry.
    ///
    /// Idempotent: removing an id that is already gone returns None and
    /// changes nothing. Returns the departed player id when the connection
    /// had joined, so the caller can announce the leave.
    pub fn remove_connection(&mut self, conn_id: ConnId) -> Option<String> {
        let handle = self.connections.remove(&conn_id)?;
        let player_id = handle.player_id?;
        self.players.remove(&player_id);
        Some(player_id)
    }

    /// The player id assigned to a connection, if it has joined.
    pub fn player_id_of(&self, conn_id: ConnId) -> Option<String> {
        self.connections.get(&conn_id)?.player_id.clone()
    }

    /// The outbound queue of one connection.
    pub fn sender_of(&self, conn_id: ConnId) -> Option<mpsc::Sender<Message>> {
        self.connections.get(&conn_id).map(|h| h.sender.clone())
    }

    /// Outbound queues for a broadcast, excluding at most one connection.
    pub fn broadcast_targets(
        &self,
        exclude: Option<ConnId>,
    ) -> Vec<(ConnId, mpsc::Sender<Message>)> {
        self.connections
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, handle)| (*id, handle.sender.clone()))
            .collect()
    }

    /// Full-session snapshot for a joiner.
    pub fn snapshot_for(&self, player_id: &str) -> GameStateData {
        GameStateData {
            player_id: player_id.to_string(),
            players: self.players.clone(),
            blocks: self.blocks.values().cloned().collect(),
            dungeon: Some(self.dungeon.to_document()),
        }
    }

    /// World position of the dungeon spawn tile, centered for a player box;
    /// the origin when the dungeon has no spawn.
    fn spawn_world_position(&self) -> (f32, f32) {
        match self.dungeon.spawn_point() {
            Some((sx, sy)) => {
                let offset = (TILE_SIZE - PLAYER_SIZE) / 2.0;
                (
                    sx as f32 * TILE_SIZE + offset,
                    sy as f32 * TILE_SIZE + offset,
                )
            }
            None => (0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::dungeon::{DungeonGenerator, GeneratorConfig};

    fn test_state() -> SessionState {
        let mut rng = DeterministicRng::new(77);
        let dungeon = DungeonGenerator::new(GeneratorConfig::default()).generate(&mut rng);
        SessionState::new(dungeon)
    }

    fn connect(state: &mut SessionState, conn_id: ConnId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(8);
        state.register_connection(conn_id, tx);
        rx
    }

    #[test]
    fn test_join_assigns_sequential_ids() {
        let mut state = test_state();
        let _rx1 = connect(&mut state, 1);
        let _rx2 = connect(&mut state, 2);

        let id1 = state.join_player(1, PlayerRole::Scout).unwrap();
        let id2 = state.join_player(2, PlayerRole::Tank).unwrap();
        assert_eq!(id1, "player_0");
        assert_eq!(id2, "player_1");
        assert_eq!(state.players().len(), 2);
    }

    #[test]
    fn test_second_join_refused() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);

        assert!(state.join_player(1, PlayerRole::Scout).is_some());
        assert!(state.join_player(1, PlayerRole::Tank).is_none());
        assert_eq!(state.players().len(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_disconnect() {
        let mut state = test_state();
        let _rx1 = connect(&mut state, 1);
        let id1 = state.join_player(1, PlayerRole::Scout).unwrap();
        state.remove_connection(1);

        let _rx2 = connect(&mut state, 2);
        let id2 = state.join_player(2, PlayerRole::Mage).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_join_spawns_at_dungeon_spawn() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);
        let id = state.join_player(1, PlayerRole::Scout).unwrap();

        let (sx, sy) = state.dungeon().spawn_point().unwrap();
        let snapshot = &state.players()[&id];
        let offset = (TILE_SIZE - PLAYER_SIZE) / 2.0;
        assert_eq!(snapshot.x, sx as f32 * TILE_SIZE + offset);
        assert_eq!(snapshot.y, sy as f32 * TILE_SIZE + offset);
        assert_eq!(snapshot.health, PlayerRole::Scout.max_health());
    }

    #[test]
    fn test_update_forces_assigned_id() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);
        let id = state.join_player(1, PlayerRole::Scout).unwrap();

        let mut forged = PlayerSnapshot::joined("imposter".into(), PlayerRole::Scout, 5.0, 6.0);
        forged.player_id = "imposter".into();
        let stored = state.apply_player_update(1, forged).unwrap();

        assert_eq!(stored.player_id, id);
        assert!(!state.players().contains_key("imposter"));
        assert_eq!(state.players()[&id].x, 5.0);
    }

    #[test]
    fn test_update_before_join_dropped() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);

        let snapshot = PlayerSnapshot::joined("x".into(), PlayerRole::Scout, 0.0, 0.0);
        assert!(state.apply_player_update(1, snapshot).is_none());
        assert!(state.players().is_empty());
    }

    #[test]
    fn test_block_place_is_upsert() {
        let mut state = test_state();

        let mut block = Block::new(3, 4);
        state.place_block(block.clone());
        // Echo or re-place at the same coordinate overwrites, never appends
        block.block_type = "stone".into();
        state.place_block(block.clone());

        assert_eq!(state.blocks().len(), 1);
        assert_eq!(state.blocks()[&(3, 4)].block_type, "stone");
    }

    #[test]
    fn test_block_remove_is_noop_when_absent() {
        let mut state = test_state();
        state.place_block(Block::new(1, 1));

        assert!(state.remove_block(1, 1));
        assert!(!state.remove_block(1, 1));
        assert!(state.blocks().is_empty());
    }

    #[test]
    fn test_damage_clamps_at_zero() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);
        let id = state.join_player(1, PlayerRole::Mage).unwrap();

        assert_eq!(state.apply_damage(&id, 30.0), Some(40.0));
        assert_eq!(state.apply_damage(&id, 500.0), Some(0.0));
        assert_eq!(state.apply_damage("nobody", 5.0), None);
    }

    #[test]
    fn test_remove_connection_idempotent() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);
        let id = state.join_player(1, PlayerRole::Tank).unwrap();

        assert_eq!(state.remove_connection(1), Some(id.clone()));
        assert_eq!(state.remove_connection(1), None);
        assert!(!state.players().contains_key(&id));
        assert_eq!(state.connection_count(), 0);
    }

    #[test]
    fn test_snapshot_contents() {
        let mut state = test_state();
        let _rx = connect(&mut state, 1);
        let id = state.join_player(1, PlayerRole::Builder).unwrap();
        state.place_block(Block::new(3, 4));

        let snapshot = state.snapshot_for(&id);
        assert_eq!(snapshot.player_id, id);
        assert!(snapshot.players.contains_key(&id));
        assert!(snapshot.blocks.iter().any(|b| b.x == 3 && b.y == 4));
        assert!(snapshot.dungeon.is_some());
    }

    #[test]
    fn test_broadcast_targets_exclude() {
        let mut state = test_state();
        let _rx1 = connect(&mut state, 1);
        let _rx2 = connect(&mut state, 2);
        let _rx3 = connect(&mut state, 3);

        let all = state.broadcast_targets(None);
        assert_eq!(all.len(), 3);

        let others = state.broadcast_targets(Some(2));
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|(id, _)| *id != 2));
    }
}
