use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::messages::ChatMessage;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("invalid persistence base url {0:?}")]
    InvalidBaseUrl(String),
    #[error("request to persistence backend failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("persistence backend answered {0}")]
    Status(StatusCode),
}

/// Durable store the relay mirrors every chat payload to.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, payload: &Value) -> Result<(), PersistError>;
}

#[derive(Deserialize)]
struct HistoryResponse {
    messages: Vec<ChatMessage>,
}

/// Client for the backend's `/messages` endpoints.
#[derive(Clone, Debug)]
pub struct HttpMessageStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpMessageStore {
    pub fn new(base_url: &str) -> Result<Self, PersistError> {
        let parsed =
            Url::parse(base_url).map_err(|_| PersistError::InvalidBaseUrl(base_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(PersistError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(HttpMessageStore {
            client: reqwest::Client::new(),
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PersistError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PersistError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("messages")
            .extend(segments);
        Ok(url)
    }

    /// Persisted messages of a room, oldest first.
    pub async fn history(&self, room_id: &str) -> Result<Vec<ChatMessage>, PersistError> {
        let response = self.client.get(self.endpoint(&[room_id])?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PersistError::Status(status));
        }

        let body: HistoryResponse = response.json().await?;
        Ok(body.messages)
    }
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn save(&self, payload: &Value) -> Result<(), PersistError> {
        let response = self
            .client
            .post(self.endpoint(&[])?)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PersistError::Status(status))
        }
    }
}
