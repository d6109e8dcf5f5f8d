use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent by browsers, framed as `{"event": ..., "data": ...}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom(String),
    /// Payload is relayed and persisted verbatim, never inspected beyond
    /// its `room_id`.
    #[serde(rename = "send_message")]
    SendMessage(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection")]
    Connection {
        #[serde(rename = "socketId")]
        socket_id: String,
    },
    #[serde(rename = "receive_message")]
    ReceiveMessage(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub room_id: String,
    pub message: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
