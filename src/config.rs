use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::Url;
use thiserror::Error;

use crate::tls::TlsPaths;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Realtime port, kept apart from the page server on 3000.
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    PartialTls,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid origin {0:?}, expected http(s)://host[:port]")]
pub struct InvalidOrigin(String);

/// A web origin in its `scheme://host[:port]` serialization, safe to hand
/// to `warp::cors`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin(String);

impl Origin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Origin {
    type Err = InvalidOrigin;

    fn from_str(origin: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidOrigin(origin.to_string());
        let url = Url::parse(origin).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(invalid());
        }
        Ok(Origin(url.origin().ascii_serialization()))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub api_url: String,
    pub cors_origin: Origin,
    pub tls: Option<TlsPaths>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_url: DEFAULT_API_URL.to_string(),
            cors_origin: Origin(DEFAULT_CORS_ORIGIN.to_string()),
            tls: None,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("RELAY_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let host: IpAddr = host.parse().map_err(|_| ConfigError::Invalid {
            name: "RELAY_HOST",
            value: host.clone(),
        })?;

        let port = match lookup("RELAY_PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::Invalid {
                name: "RELAY_PORT",
                value: port.clone(),
            })?,
            None => DEFAULT_PORT,
        };

        let api_url = lookup("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let origin = lookup("CORS_ORIGIN").unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());
        let cors_origin = origin.parse().map_err(|_| ConfigError::Invalid {
            name: "CORS_ORIGIN",
            value: origin.clone(),
        })?;

        let tls = match (lookup("TLS_CERT_PATH"), lookup("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::PartialTls),
        };

        Ok(RelayConfig {
            bind_addr: SocketAddr::new(host, port),
            api_url,
            cors_origin,
            tls,
        })
    }
}
