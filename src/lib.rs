//! Realtime chat relay for the marketplace's one-to-one conversations.
//!
//! Browsers join a room keyed by [`room::room_key`] and every `send_message`
//! is fanned out to the room's current members, then mirrored to the
//! backend's message store without waiting for it.

pub mod client;
pub mod config;
pub mod messages;
pub mod persistence;
pub mod room;
pub mod server;
pub mod tls;

pub use config::RelayConfig;
pub use messages::{ChatMessage, ClientEvent, ServerEvent};
pub use persistence::{HttpMessageStore, MessageStore, PersistError};
pub use room::room_key;
pub use server::{routes, run, ConnectionId, Relay, ServeError};
