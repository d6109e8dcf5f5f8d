//! Websocket client for the relay.
//!
//! [`Conversation`] pairs with the relay the way the chat page does: it
//! derives the room key from both participants, joins it, shows its own
//! messages optimistically and skips their echoes when they come back.

use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::messages::{ChatMessage, ClientEvent, ServerEvent};
use crate::room::room_key;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("relay closed the connection")]
    Closed,
    #[error("expected a connection event, got {0:?}")]
    Handshake(ServerEvent),
}

pub struct ChatClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    socket_id: String,
}

impl ChatClient {
    /// Connects and waits for the relay to announce the session id.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url).await?;
        let mut client = ChatClient {
            stream,
            socket_id: String::new(),
        };

        match client.recv().await? {
            Some(ServerEvent::Connection { socket_id }) => {
                debug!("Connected to {url} as {socket_id}");
                client.socket_id = socket_id;
                Ok(client)
            }
            Some(other) => Err(ClientError::Handshake(other)),
            None => Err(ClientError::Closed),
        }
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn emit(&mut self, event: &ClientEvent) -> Result<(), ClientError> {
        let text = serde_json::to_string(event)?;
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    pub async fn join_room(&mut self, room_key: &str) -> Result<(), ClientError> {
        self.emit(&ClientEvent::JoinRoom(room_key.to_string())).await
    }

    pub async fn send_message(&mut self, message: &ChatMessage) -> Result<(), ClientError> {
        let payload = serde_json::to_value(message)?;
        self.emit(&ClientEvent::SendMessage(payload)).await
    }

    /// Next event from the relay, `None` once the connection is closed.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(text.as_str())?)),
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

/// One participant's side of a two-party chat.
pub struct Conversation {
    client: ChatClient,
    me: String,
    room_id: String,
}

impl Conversation {
    pub async fn open(mut client: ChatClient, me: &str, other: &str) -> Result<Self, ClientError> {
        let room_id = room_key(me, other);
        client.join_room(&room_id).await?;
        Ok(Conversation {
            client,
            me: me.trim().to_string(),
            room_id,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Sends `text` and returns the message for immediate local display.
    pub async fn say(&mut self, text: &str) -> Result<ChatMessage, ClientError> {
        let message = ChatMessage {
            room_id: self.room_id.clone(),
            message: text.to_string(),
            sender: self.me.clone(),
            created_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        };
        self.client.send_message(&message).await?;
        Ok(message)
    }

    /// Next message from the other participant. Own echoes are skipped.
    pub async fn next_from_peer(&mut self) -> Result<Option<ChatMessage>, ClientError> {
        while let Some(event) = self.client.recv().await? {
            let ServerEvent::ReceiveMessage(payload) = event else {
                continue;
            };
            let Ok(message) = serde_json::from_value::<ChatMessage>(payload) else {
                debug!("Skipping unreadable message in {}", self.room_id);
                continue;
            };
            if message.room_id == self.room_id && message.sender != self.me {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}
