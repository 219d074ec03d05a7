//! Game Session Client
//!
//! Connects to a session server, announces its role, and dispatches every
//! received message to a caller-registered handler keyed by message kind.
//! The rendering collaborator drives the update loop and calls
//! [`GameClient::send`]; this type owns only the socket and the receive
//! task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::game::player::PlayerRole;
use crate::network::protocol::{
    read_message, write_frame, write_message, Message, MessageKind, PlayerJoinData,
    DEFAULT_MAX_FRAME_LEN,
};

/// Client connection errors. Only connecting can fail loudly; after that,
/// transport loss is reported through [`GameClient::is_connected`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect or the initial join write failed.
    #[error("connection failed: {0}")]
    ConnectFailed(#[from] std::io::Error),

    /// The initial join message could not be framed and written.
    #[error("join handshake failed: {0}")]
    JoinFailed(#[from] crate::network::protocol::ProtocolError),
}

/// Handler invoked for one message kind.
///
/// Handlers run synchronously on the receive task: a slow handler delays
/// later messages on this connection. That is an accepted simplification
/// for a game client with cheap handlers, not a defect.
pub type MessageHandler = Box<dyn Fn(Message) + Send + 'static>;

type HandlerMap = Arc<StdMutex<HashMap<MessageKind, MessageHandler>>>;

/// Client side of a game session.
pub struct GameClient {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
}

impl GameClient {
    /// Connect to a server and immediately announce the chosen role.
    ///
    /// The receive task starts before this returns, so a handler
    /// registered right after connecting still sees the server's
    /// `game_state` reply to the join.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        role: PlayerRole,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        let (read_half, mut write_half) = stream.into_split();

        let join = Message::PlayerJoin(PlayerJoinData {
            player_id: None,
            role,
        });
        write_message(&mut write_half, &join).await?;

        let handlers: HandlerMap = Arc::new(StdMutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(receive_loop(
            read_half,
            handlers.clone(),
            connected.clone(),
        ));

        info!("connected to server at {}", peer);
        Ok(Self {
            writer: Arc::new(Mutex::new(write_half)),
            handlers,
            connected,
        })
    }

    /// Register the handler for a message kind, replacing any previous
    /// one. Kinds without a handler are dropped silently on receive.
    pub fn register_handler<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(Message) + Send + 'static,
    {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .insert(kind, Box::new(handler));
    }

    /// Frame and send a message.
    ///
    /// A transport failure does not surface here: the connectivity flag
    /// flips instead, and callers poll [`GameClient::is_connected`] from
    /// their update loop to notice the loss.
    pub async fn send(&self, message: &Message) {
        if !self.is_connected() {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_message(&mut *writer, message).await {
            warn!("send failed: {}", e);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Send a pre-encoded payload in one frame. Intended for tests and
    /// tooling that need to put arbitrary bytes on the wire.
    pub async fn send_raw(&self, payload: &[u8]) {
        if !self.is_connected() {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_frame(&mut *writer, payload).await {
            warn!("send failed: {}", e);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Whether the transport is still believed healthy. Flips false on the
    /// first failed send, a server-side close, or after `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the connection. Shutting the write half signals the server,
    /// whose close of the other direction ends the receive task.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await {
            debug!("shutdown after close: {}", e);
        }
    }
}

/// Read frames until the server goes away, dispatching each message to its
/// registered handler.
async fn receive_loop(
    mut read_half: OwnedReadHalf,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
) {
    loop {
        match read_message(&mut read_half, DEFAULT_MAX_FRAME_LEN).await {
            Ok(Some(msg)) => {
                let kind = msg.kind();
                let handlers = handlers.lock().expect("handler registry poisoned");
                match handlers.get(&kind) {
                    Some(handler) => handler(msg),
                    None => debug!("no handler for {:?}, dropping", kind),
                }
            }
            Ok(None) => {
                info!("server closed the connection");
                break;
            }
            Err(e) if e.is_fatal() => {
                warn!("receive failed: {}", e);
                break;
            }
            Err(e) => {
                warn!("dropping bad message from server: {}", e);
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}
