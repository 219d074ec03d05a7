//! Game Session Server
//!
//! Accepts TCP connections, owns the session state, and relays every
//! player and world-edit event to the peers that need it. One reader task
//! and one writer task per connection plus the accept loop; all of them
//! mutate the shared [`SessionState`] under a single lock.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::game::dungeon::DungeonModel;
use crate::network::protocol::{
    read_message, write_message, Message, PlayerJoinData, PlayerLeaveData, DEFAULT_MAX_FRAME_LEN,
};
use crate::network::session::{ConnId, SessionState};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent player connections; connections beyond this are
    /// closed immediately.
    pub max_players: usize,
    /// Largest frame a peer may declare.
    pub max_frame_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5555".parse().expect("static address parses"),
            max_players: 4,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Outbound queue depth per connection. A peer that lets this many
/// messages pile up is treated as stalled and dropped.
const OUTBOUND_QUEUE_LEN: usize = 64;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to the configured address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The authoritative session server.
pub struct GameServer {
    config: ServerConfig,
    state: Arc<Mutex<SessionState>>,
    listener: TcpListener,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Bind the listening socket and wrap the dungeon in a fresh session.
    pub async fn bind(config: ServerConfig, dungeon: DungeonModel) -> Result<Self, GameServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(SessionState::new(dungeon))),
            listener,
            shutdown_tx,
        })
    }

    /// The actually bound address (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Run the accept loop until [`GameServer::shutdown`] is called.
    ///
    /// Transient accept errors are logged and the loop keeps going; only
    /// the shutdown signal stops it.
    pub async fn run(&self) {
        info!("session server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut next_conn_id: ConnId = 0;

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let conn_id = next_conn_id;
                            next_conn_id += 1;
                            self.handle_connection(stream, addr, conn_id).await;
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Register a new connection and spawn its reader and writer tasks, or
    /// close it on the spot when the session is full.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, conn_id: ConnId) {
        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_LEN);

        {
            let mut state = self.state.lock().await;
            if state.connection_count() >= self.config.max_players {
                // Dropping the stream closes it; no session entry is made
                // and nothing is announced to the other clients.
                warn!("session full, rejecting {}", addr);
                return;
            }
            state.register_connection(conn_id, msg_tx);
        }
        info!("new connection from {}", addr);

        let (mut read_half, mut write_half) = stream.into_split();

        // Writer task: sole owner of the write half. Each peer drains its
        // own queue, so one stalled socket never delays another peer's
        // frames.
        let mut writer_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = msg_rx.recv() => {
                        match maybe {
                            Some(msg) => {
                                if let Err(e) = write_message(&mut write_half, &msg).await {
                                    debug!("send to {} failed: {}", addr, e);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = writer_shutdown.recv() => break,
                }
            }
        });

        // Reader task: frames in, effects applied under the session lock.
        let state = self.state.clone();
        let max_frame_len = self.config.max_frame_len;
        let mut reader_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = read_message(&mut read_half, max_frame_len) => {
                        match result {
                            Ok(Some(msg)) => {
                                let mut state = state.lock().await;
                                handle_message(&mut state, conn_id, msg);
                            }
                            Ok(None) => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Err(e) if e.is_fatal() => {
                                warn!("tearing down {}: {}", addr, e);
                                break;
                            }
                            Err(e) => {
                                // Frame boundary intact: drop the message,
                                // keep the connection
                                warn!("dropping bad message from {}: {}", addr, e);
                            }
                        }
                    }
                    _ = reader_shutdown.recv() => break,
                }
            }

            let mut state = state.lock().await;
            if let Some(player_id) = state.remove_connection(conn_id) {
                info!("player {} left", player_id);
                broadcast(
                    &mut state,
                    Message::PlayerLeave(PlayerLeaveData { player_id }),
                    None,
                );
            }
        });
    }

    /// Signal every task to stop. Blocked accepts and reads return
    /// promptly; connection sockets close as their tasks exit.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live connection count.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connection_count()
    }
}

/// Apply one decoded message to the session and queue the required
/// broadcasts. Runs entirely under the session lock; nothing here awaits.
fn handle_message(state: &mut SessionState, conn_id: ConnId, msg: Message) {
    match msg {
        Message::PlayerUpdate(snapshot) => {
            match state.apply_player_update(conn_id, snapshot) {
                Some(stored) => {
                    broadcast(state, Message::PlayerUpdate(stored), Some(conn_id));
                }
                None => debug!("player_update from conn {} before join", conn_id),
            }
        }
        Message::BlockPlace(block) => {
            debug!("block placed at ({}, {})", block.x, block.y);
            state.place_block(block.clone());
            // Echoed to the placer too; placement is an upsert so the
            // double-apply is harmless
            broadcast(state, Message::BlockPlace(block), None);
        }
        Message::BlockRemove(data) => {
            state.remove_block(data.x, data.y);
            broadcast(state, Message::BlockRemove(data), None);
        }
        Message::PlayerJoin(join) => {
            let Some(player_id) = state.join_player(conn_id, join.role) else {
                debug!("duplicate or orphaned join from conn {}", conn_id);
                return;
            };
            info!("player {} joined as {:?}", player_id, join.role);

            let snapshot = state.snapshot_for(&player_id);
            send_to(state, conn_id, Message::GameState(snapshot));

            broadcast(
                state,
                Message::PlayerJoin(PlayerJoinData {
                    player_id: Some(player_id),
                    role: join.role,
                }),
                Some(conn_id),
            );
        }
        Message::Damage(damage) => match state.apply_damage(&damage.player_id, damage.amount) {
            Some(_health) => broadcast(state, Message::Damage(damage), None),
            None => debug!("damage for unknown player {}", damage.player_id),
        },
        Message::Chat(mut chat) => {
            let Some(player_id) = state.player_id_of(conn_id) else {
                debug!("chat from conn {} before join", conn_id);
                return;
            };
            chat.player_id = Some(player_id);
            chat.timestamp = Some(Utc::now());
            broadcast(state, Message::Chat(chat), Some(conn_id));
        }
        // Server-authoritative kinds; a client has no business sending them
        Message::DungeonData(_) | Message::GameState(_) | Message::PlayerLeave(_) => {
            debug!("ignoring server-owned message kind from conn {}", conn_id);
        }
    }
}

/// Queue a message on one connection. A failed enqueue means the writer is
/// gone or stalled; the connection is removed and its departure announced.
fn send_to(state: &mut SessionState, conn_id: ConnId, msg: Message) {
    let delivered = state
        .sender_of(conn_id)
        .map(|sender| sender.try_send(msg).is_ok())
        .unwrap_or(false);

    if !delivered {
        if let Some(player_id) = state.remove_connection(conn_id) {
            broadcast(
                state,
                Message::PlayerLeave(PlayerLeaveData { player_id }),
                None,
            );
        }
    }
}

/// Enqueue a message on every live connection except `exclude`.
///
/// An enqueue failure never aborts the pass: the dead connection is
/// removed afterwards and a leave notice for it joins the work queue, so
/// cascading failures settle in one call.
fn broadcast(state: &mut SessionState, message: Message, exclude: Option<ConnId>) {
    let mut queue: VecDeque<(Message, Option<ConnId>)> = VecDeque::new();
    queue.push_back((message, exclude));

    while let Some((msg, excl)) = queue.pop_front() {
        let mut dead: Vec<ConnId> = Vec::new();
        for (conn_id, sender) in state.broadcast_targets(excl) {
            if sender.try_send(msg.clone()).is_err() {
                dead.push(conn_id);
            }
        }

        for conn_id in dead {
            if let Some(player_id) = state.remove_connection(conn_id) {
                debug!("dropping stalled player {}", player_id);
                queue.push_back((
                    Message::PlayerLeave(PlayerLeaveData { player_id }),
                    None,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::time::sleep;

    use crate::core::rng::DeterministicRng;
    use crate::game::dungeon::{DungeonGenerator, GeneratorConfig};
    use crate::game::player::{Block, PlayerRole, PlayerSnapshot};
    use crate::network::client::GameClient;
    use crate::network::protocol::MessageKind;

    const SETTLE: Duration = Duration::from_millis(300);

    fn test_dungeon() -> DungeonModel {
        let mut rng = DeterministicRng::new(99);
        DungeonGenerator::new(GeneratorConfig::default()).generate(&mut rng)
    }

    async fn start_server(max_players: usize) -> (Arc<GameServer>, SocketAddr) {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_players,
            ..Default::default()
        };
        let server = Arc::new(GameServer::bind(config, test_dungeon()).await.unwrap());
        let addr = server.local_addr().unwrap();

        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });

        (server, addr)
    }

    /// Collects every dispatched message of one kind.
    fn collector(
        client: &GameClient,
        kind: MessageKind,
    ) -> Arc<StdMutex<Vec<Message>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        client.register_handler(kind, move |msg| {
            sink.lock().unwrap().push(msg);
        });
        seen
    }

    fn update_for(id: &str, x: f32) -> Message {
        Message::PlayerUpdate(PlayerSnapshot {
            player_id: id.to_string(),
            role: PlayerRole::Scout,
            x,
            y: 0.0,
            health: 80.0,
            velocity: (0.0, 0.0),
            shield_active: false,
        })
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_players, 4);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let (server, _addr) = start_server(4).await;
        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_update_reaches_others_not_sender() {
        let (server, addr) = start_server(4).await;

        let a = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        let a_updates = collector(&a, MessageKind::PlayerUpdate);
        sleep(SETTLE).await;
        let b = GameClient::connect(addr, PlayerRole::Tank).await.unwrap();
        let b_updates = collector(&b, MessageKind::PlayerUpdate);
        sleep(SETTLE).await;

        a.send(&update_for("ignored", 42.0)).await;
        sleep(SETTLE).await;

        let received = b_updates.lock().unwrap();
        assert_eq!(received.len(), 1);
        match &received[0] {
            Message::PlayerUpdate(snap) => {
                // Server rewrites the id to A's assigned one
                assert_eq!(snap.player_id, "player_0");
                assert_eq!(snap.x, 42.0);
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(a_updates.lock().unwrap().is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_block_place_visible_to_later_joiner() {
        let (server, addr) = start_server(4).await;

        let a = GameClient::connect(addr, PlayerRole::Builder).await.unwrap();
        let a_blocks = collector(&a, MessageKind::BlockPlace);
        sleep(SETTLE).await;

        a.send(&Message::BlockPlace(Block::new(3, 4))).await;
        sleep(SETTLE).await;

        // The placer gets the echo too
        assert_eq!(a_blocks.lock().unwrap().len(), 1);

        let c = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        let c_states = collector(&c, MessageKind::GameState);
        sleep(SETTLE).await;

        let states = c_states.lock().unwrap();
        assert_eq!(states.len(), 1);
        match &states[0] {
            Message::GameState(data) => {
                assert!(data.blocks.iter().any(|b| b.x == 3 && b.y == 4));
                assert!(data.dungeon.is_some());
                assert!(data.players.contains_key("player_0"));
            }
            other => panic!("unexpected message {:?}", other),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_leave() {
        let (server, addr) = start_server(4).await;

        let a = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        sleep(SETTLE).await;
        let b = GameClient::connect(addr, PlayerRole::Mage).await.unwrap();
        let b_leaves = collector(&b, MessageKind::PlayerLeave);
        sleep(SETTLE).await;

        a.disconnect().await;
        sleep(SETTLE).await;

        let leaves = b_leaves.lock().unwrap();
        assert_eq!(leaves.len(), 1);
        match &leaves[0] {
            Message::PlayerLeave(data) => assert_eq!(data.player_id, "player_0"),
            other => panic!("unexpected message {:?}", other),
        }
        drop(leaves);

        // A later joiner's snapshot no longer contains A
        let c = GameClient::connect(addr, PlayerRole::Tank).await.unwrap();
        let c_states = collector(&c, MessageKind::GameState);
        sleep(SETTLE).await;

        let states = c_states.lock().unwrap();
        assert_eq!(states.len(), 1);
        match &states[0] {
            Message::GameState(data) => {
                assert!(!data.players.contains_key("player_0"));
                assert!(data.players.contains_key("player_1"));
            }
            other => panic!("unexpected message {:?}", other),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn test_capacity_rejects_third_connection() {
        let (server, addr) = start_server(2).await;

        let a = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        let b = GameClient::connect(addr, PlayerRole::Tank).await.unwrap();
        let b_updates = collector(&b, MessageKind::PlayerUpdate);
        sleep(SETTLE).await;

        // Third connection is closed without any session entry
        let mut rejected = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), rejected.read(&mut buf))
            .await
            .expect("server closes the extra connection")
            .unwrap();
        assert_eq!(n, 0);

        assert_eq!(server.connection_count().await, 2);

        // The existing pair is unaffected
        a.send(&update_for("x", 7.0)).await;
        sleep(SETTLE).await;
        assert_eq!(b_updates.lock().unwrap().len(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_chat_stamped_and_relayed() {
        let (server, addr) = start_server(4).await;

        let a = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        sleep(SETTLE).await;
        let b = GameClient::connect(addr, PlayerRole::Mage).await.unwrap();
        let b_chats = collector(&b, MessageKind::Chat);
        sleep(SETTLE).await;

        a.send(&Message::Chat(crate::network::protocol::ChatData {
            player_id: Some("forged".into()),
            text: "onwards".into(),
            timestamp: None,
        }))
        .await;
        sleep(SETTLE).await;

        let chats = b_chats.lock().unwrap();
        assert_eq!(chats.len(), 1);
        match &chats[0] {
            Message::Chat(data) => {
                assert_eq!(data.player_id.as_deref(), Some("player_0"));
                assert_eq!(data.text, "onwards");
                assert!(data.timestamp.is_some());
            }
            other => panic!("unexpected message {:?}", other),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_connection() {
        let (server, addr) = start_server(4).await;

        let a = GameClient::connect(addr, PlayerRole::Scout).await.unwrap();
        sleep(SETTLE).await;
        let b = GameClient::connect(addr, PlayerRole::Tank).await.unwrap();
        let b_updates = collector(&b, MessageKind::PlayerUpdate);
        sleep(SETTLE).await;

        // Well-framed garbage: valid frame, unknown kind
        a.send_raw(br#"{"type":"teleport","data":{}}"#).await;
        sleep(SETTLE).await;
        assert_eq!(server.connection_count().await, 2);

        // The connection still works afterwards
        a.send(&update_for("x", 1.0)).await;
        sleep(SETTLE).await;
        assert_eq!(b_updates.lock().unwrap().len(), 1);

        server.shutdown();
    }
}
