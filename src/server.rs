use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::config::{Origin, RelayConfig};
use crate::messages::{ClientEvent, ServerEvent};
use crate::persistence::{HttpMessageStore, MessageStore, PersistError};
use crate::room::Room;
use crate::tls;

/// Opaque session id assigned to each websocket on accept.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Rooms = Arc<RwLock<HashMap<String, Room>>>;
type Connections = Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>>;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Persistence(#[from] PersistError),
    #[error("failed to bind relay: {0}")]
    Bind(#[from] warp::Error),
    #[error("cannot listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Routes chat events between connections sharing a room and mirrors every
/// message to a [`MessageStore`].
///
/// Lock order is rooms before connections; no other nesting exists.
#[derive(Clone)]
pub struct Relay {
    rooms: Rooms,
    connections: Connections,
    store: Arc<dyn MessageStore>,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Relay {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            store,
        }
    }

    pub async fn register(&self, outbound: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), outbound);
        connection_id
    }

    pub async fn handle_connection(&self, ws: WebSocket) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = self.register(tx).await;
        info!("Connection {connection_id} opened");

        self.send_to_connection(
            &connection_id,
            &ServerEvent::Connection {
                socket_id: connection_id.to_string(),
            },
        )
        .await;

        let writer_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    warn!("Failed to write to connection {writer_id}: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => {
                    if let Ok(text) = msg.to_str() {
                        self.handle_frame(&connection_id, text).await;
                    }
                }
                Err(e) => {
                    warn!("WebSocket error on connection {connection_id}: {e}");
                    break;
                }
            }
        }

        self.handle_disconnect(&connection_id).await;
        info!("Connection {connection_id} closed");
    }

    async fn handle_frame(&self, connection_id: &ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(ClientEvent::JoinRoom(room_key)) => {
                self.join(connection_id, &room_key).await;
            }
            Ok(ClientEvent::SendMessage(payload)) => {
                self.relay(payload).await;
            }
            Err(e) => warn!("Ignoring malformed frame from {connection_id}: {e}"),
        }
    }

    /// Adds the connection to `room_key`. Returns `false` if it was already
    /// a member or is not a live connection.
    pub async fn join(&self, connection_id: &ConnectionId, room_key: &str) -> bool {
        let registered = self.connections.read().await.contains_key(connection_id);
        if !registered {
            warn!("Join of {room_key:?} from unknown connection {connection_id}");
            return false;
        }

        let mut rooms = self.rooms.write().await;
        let joined = rooms
            .entry(room_key.to_string())
            .or_insert_with(|| Room::new(room_key))
            .join(connection_id.clone());
        if joined {
            info!("Connection {connection_id} joined room {room_key:?}");
        }
        joined
    }

    /// Broadcasts `payload` to its room, then persists it in the background.
    ///
    /// Returns the number of connections the broadcast was queued for. The
    /// persistence outcome is only logged.
    pub async fn relay(&self, payload: Value) -> usize {
        let delivered = match payload.get("room_id").and_then(Value::as_str) {
            Some(room_key) => {
                let event = ServerEvent::ReceiveMessage(payload.clone());
                self.broadcast_to_room(room_key, &event).await
            }
            None => {
                warn!("Message without a string room_id reaches no room");
                0
            }
        };

        self.persist(payload);
        delivered
    }

    fn persist(&self, payload: Value) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.save(&payload).await {
                Ok(()) => debug!("Persisted message for room {}", payload["room_id"]),
                Err(e) => error!("Failed to persist message for room {}: {e}", payload["room_id"]),
            }
        });
    }

    /// Drops the connection's outbound queue, then its memberships. Empty
    /// rooms are removed.
    pub async fn handle_disconnect(&self, connection_id: &ConnectionId) {
        self.connections.write().await.remove(connection_id);

        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, room| {
            if room.leave(connection_id) {
                debug!("Connection {connection_id} left room {:?}", room.key());
            }
            !room.is_empty()
        });
    }

    async fn broadcast_to_room(&self, room_key: &str, event: &ServerEvent) -> usize {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode event for room {room_key:?}: {e}");
                return 0;
            }
        };

        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_key) else {
            debug!("Room {room_key:?} has no members");
            return 0;
        };

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for connection_id in room.members() {
            if let Some(sender) = connections.get(connection_id) {
                if sender.send(Message::text(text.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!("Broadcast to {delivered}/{} members of {room_key:?}", room.len());
        delivered
    }

    async fn send_to_connection(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        if let Ok(text) = serde_json::to_string(event) {
            let connections = self.connections.read().await;
            if let Some(sender) = connections.get(connection_id) {
                let _ = sender.send(Message::text(text));
            }
        }
    }

    pub async fn room_members(&self, room_key: &str) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(room_key)
            .map(|room| room.members().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// The websocket endpoint at `/ws`, behind CORS for the page origin.
pub fn routes(
    relay: Relay,
    cors_origin: &Origin,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let relay = relay.clone();
            ws.on_upgrade(move |socket| async move {
                relay.handle_connection(socket).await;
            })
        });

    ws_route.with(
        warp::cors()
            .allow_origin(cors_origin.as_str())
            .allow_methods(vec!["GET", "POST"]),
    )
}

/// Serves the relay until `shutdown` resolves.
pub async fn run<F>(config: RelayConfig, shutdown: F) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = HttpMessageStore::new(&config.api_url)?;
    info!("Persisting messages to {}", store.base_url());
    let relay = Relay::new(Arc::new(store));
    let routes = routes(relay, &config.cors_origin);

    let tls_paths = match &config.tls {
        Some(paths) => match tls::load_server_config(paths) {
            Ok(_) => Some(paths),
            Err(e) => {
                error!("Invalid TLS configuration, falling back to plain ws: {e}");
                None
            }
        },
        None => None,
    };

    if let Some(paths) = tls_paths {
        // warp's TLS server panics when it cannot bind.
        drop(
            TcpListener::bind(config.bind_addr)
                .await
                .map_err(|source| ServeError::Listen {
                    addr: config.bind_addr,
                    source,
                })?,
        );
        let (addr, server) = warp::serve(routes)
            .tls()
            .cert_path(&paths.cert)
            .key_path(&paths.key)
            .bind_with_graceful_shutdown(config.bind_addr, shutdown);
        info!("Chat relay listening on wss://{addr}/ws");
        server.await;
    } else {
        let (addr, server) =
            warp::serve(routes).try_bind_with_graceful_shutdown(config.bind_addr, shutdown)?;
        info!("Chat relay listening on ws://{addr}/ws");
        server.await;
    }

    info!("Chat relay stopped");
    Ok(())
}
