//! Socket.IO transport to the chat backend
//!
//! A [`Connector`] turns an [`Endpoint`] into a [`Link`]: a pair of channels
//! carrying typed client events out and typed server events in. The
//! production connector speaks Socket.IO v4 over WebSocket, falling back to
//! HTTP long-polling; tests plug in their own connector.

pub mod events;
pub mod packet;
mod polling;
mod session;
mod websocket;

pub use events::{BotResponse, ClientEvent, ServerEvent, UserMessage};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::mpsc;

use crate::config::TransportKind;
use crate::error::{Error, Result};
use packet::EnginePacket;

/// Engine.IO protocol revision spoken by the client.
const ENGINE_IO_VERSION: &str = "4";

/// Where the Socket.IO server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// http(s) base URL
    base: Url,
    path: String,
}

impl Endpoint {
    /// Accepts http, https, ws and wss URLs.
    pub fn parse(url: &str, socketio_path: &str) -> Result<Self> {
        let mut base = Url::parse(url.trim())
            .map_err(|e| Error::Config(format!("invalid server url {:?}: {}", url, e)))?;

        let scheme = match base.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => {
                return Err(Error::Config(format!(
                    "unsupported server url scheme {:?} (expected http, https, ws or wss)",
                    other
                )))
            }
        };
        if base.host_str().is_none() {
            return Err(Error::Config(format!("server url {:?} has no host", url)));
        }
        base.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("cannot use scheme {} for {:?}", scheme, url)))?;

        let path = socketio_path.trim_matches('/');
        if path.is_empty() {
            return Err(Error::Config("server.socketio_path must not be empty".to_string()));
        }

        Ok(Self {
            base,
            path: path.to_string(),
        })
    }

    fn url(&self, transport: TransportKind, sid: Option<&str>) -> Url {
        let mut url = self.base.clone();
        url.set_path(&format!("/{}/", self.path));
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("EIO", ENGINE_IO_VERSION);
            query.append_pair("transport", transport.as_str());
            if let Some(sid) = sid {
                query.append_pair("sid", sid);
            }
        }
        url
    }

    pub fn websocket_url(&self) -> Url {
        let mut url = self.url(TransportKind::Websocket, None);
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        // Switching between special schemes never fails.
        let _ = url.set_scheme(scheme);
        url
    }

    pub fn polling_url(&self, sid: Option<&str>) -> Url {
        self.url(TransportKind::Polling, sid)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.as_str().trim_end_matches('/'))
    }
}

/// Engine.IO packets in both directions over one transport.
pub(crate) struct Pipe {
    pub outgoing: mpsc::UnboundedSender<EnginePacket>,
    pub incoming: mpsc::UnboundedReceiver<Result<EnginePacket>>,
}

/// What a live link reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Event(ServerEvent),
    /// The link is gone; no further events follow.
    Closed { reason: String },
}

/// An established Socket.IO connection.
///
/// Dropping the link closes the connection.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<ClientEvent>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    pub fn new(
        outgoing: mpsc::UnboundedSender<ClientEvent>,
        incoming: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// Queue an event for transmission. `false` once the link is closed.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.outgoing.send(event).is_ok()
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection and complete the namespace handshake.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link>;
}

/// Socket.IO client trying each configured transport in order.
pub struct SocketIoConnector {
    transports: Vec<TransportKind>,
    http_client: reqwest::Client,
}

impl SocketIoConnector {
    pub fn new(transports: Vec<TransportKind>) -> Result<Self> {
        if transports.is_empty() {
            return Err(Error::Config(
                "at least one transport is required".to_string(),
            ));
        }

        // Long-poll GETs are held open up to the server ping interval.
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            transports,
            http_client,
        })
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Link> {
        let mut last_error = None;

        for transport in &self.transports {
            let pipe = match transport {
                TransportKind::Websocket => websocket::open(endpoint).await,
                TransportKind::Polling => polling::open(&self.http_client, endpoint).await,
            };
            let attempt = match pipe {
                Ok(pipe) => session::establish(pipe).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(link) => {
                    tracing::info!(transport = transport.as_str(), %endpoint, "Socket.IO connected");
                    return Ok(link);
                }
                Err(e) => {
                    tracing::warn!(transport = transport.as_str(), error = %e, "Transport failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Transport("no transport configured".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint::parse("http://localhost:5000", "socket.io").unwrap();
        assert_eq!(
            endpoint.websocket_url().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            endpoint.polling_url(None).as_str(),
            "http://localhost:5000/socket.io/?EIO=4&transport=polling"
        );
        assert_eq!(
            endpoint.polling_url(Some("abc")).as_str(),
            "http://localhost:5000/socket.io/?EIO=4&transport=polling&sid=abc"
        );
        assert_eq!(endpoint.to_string(), "http://localhost:5000");
    }

    #[test]
    fn test_endpoint_secure_schemes() {
        let endpoint = Endpoint::parse("wss://chat.example.org/", "/socket.io/").unwrap();
        assert!(endpoint.websocket_url().as_str().starts_with("wss://chat.example.org/socket.io/"));
        assert!(endpoint.polling_url(None).as_str().starts_with("https://"));
    }

    #[test]
    fn test_endpoint_rejects_bad_urls() {
        assert!(Endpoint::parse("ftp://localhost", "socket.io").is_err());
        assert!(Endpoint::parse("not a url", "socket.io").is_err());
        assert!(Endpoint::parse("http://localhost:5000", "/").is_err());
    }

    #[test]
    fn test_connector_requires_transport() {
        assert!(SocketIoConnector::new(Vec::new()).is_err());
    }
}
