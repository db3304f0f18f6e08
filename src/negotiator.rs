use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{ClientConfig, JuError, JuResult, api::KernelSpec, host::tunnel_url};

/// Kernel provisioned by the remote server for the negotiated session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub id: String,
    pub name: String,
}

#[derive(Serialize)]
struct ProxyRequest<'a> {
    message_id: String,
    method: &'a str,
    path: &'a str,
    body: String,
}

#[derive(Serialize)]
struct SessionSpec<'a> {
    name: &'a str,
    path: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    kernel: KernelSpec,
}

#[derive(Deserialize, Debug)]
struct ProxyReply {
    status: Option<u16>,
    data: Option<String>,
}

/// The decoded reply body is either a bare kernel model or a session model
/// wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyPayload {
    Session { kernel: SessionDescriptor },
    Kernel(SessionDescriptor),
}

/// HTTP-over-WebSocket connection to the proxy.
struct Tunnel {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_message_id: u64,
}

impl Tunnel {
    async fn open(url: &Url) -> JuResult<Self> {
        let (ws, _) = connect_async(url.as_str()).await?;
        debug!("Opened proxy tunnel: {}", url);

        Ok(Self { ws, next_message_id: 1 })
    }

    async fn send(&mut self, method: &str, path: &str, body: String) -> JuResult<()> {
        let request = ProxyRequest {
            message_id: self.next_message_id.to_string(),
            method,
            path,
            body,
        };
        self.next_message_id += 1;

        let frame = serde_json::to_string(&request)?;
        debug!("Sending tunnel frame: {}", frame);
        self.ws.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> JuResult<ProxyReply> {
        while let Some(msg) = self.ws.next().await {
            let reply = match msg? {
                Message::Text(text) => serde_json::from_str(&text)?,
                Message::Binary(data) => serde_json::from_slice(&data)?,
                Message::Close(frame) => {
                    debug!("Tunnel closed by peer: {:?}", frame);
                    break;
                }
                other => {
                    trace!("Ignoring tunnel frame: {:?}", other);
                    continue;
                }
            };
            return Ok(reply);
        }

        Err(JuError::TunnelClosed)
    }

    async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Error closing tunnel: {:?}", e);
        }
    }
}

/// Provisions a session on a remote server through its proxy tunnel.
#[derive(Debug, Clone)]
pub struct SessionNegotiator {
    kernel_name: String,
    session_name: String,
    session_path: String,
    min_version: String,
    timeout: Option<Duration>,
}

impl SessionNegotiator {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            kernel_name: config.kernel_name.clone(),
            session_name: config.session_name.clone(),
            session_path: config.session_path.clone(),
            min_version: config.min_version.clone(),
            timeout: config.negotiate_timeout(),
        }
    }

    pub async fn create_session(&self, host: &Url) -> JuResult<SessionDescriptor> {
        let url = tunnel_url(host, &self.min_version)?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.negotiate(&url))
                .await
                .map_err(|_| JuError::Timeout)?,
            None => self.negotiate(&url).await,
        }
    }

    async fn negotiate(&self, url: &Url) -> JuResult<SessionDescriptor> {
        let mut tunnel = Tunnel::open(url).await?;
        tunnel.send("POST", "/api/sessions", self.session_body()?).await?;

        let reply = tunnel.recv().await;
        tunnel.close().await;

        let descriptor = decode_reply(reply?)?;
        info!("Negotiated remote kernel: {:?}", descriptor);
        Ok(descriptor)
    }

    fn session_body(&self) -> JuResult<String> {
        let spec = SessionSpec {
            name: &self.session_name,
            path: &self.session_path,
            kind: "notebook",
            kernel: KernelSpec {
                name: self.kernel_name.clone(),
            },
        };
        Ok(serde_json::to_string(&spec)?)
    }
}

fn decode_reply(reply: ProxyReply) -> JuResult<SessionDescriptor> {
    if let Some(status) = reply.status.filter(|s| *s >= 400) {
        warn!("Remote server refused the session: {}", status);
        return Err(JuError::SessionRejected(status));
    }

    let data = reply
        .data
        .ok_or(JuError::MalformedReply("no data field".into()))?;
    let payload: ReplyPayload = serde_json::from_slice(&STANDARD.decode(data)?)?;

    Ok(match payload {
        ReplyPayload::Session { kernel } => kernel,
        ReplyPayload::Kernel(kernel) => kernel,
    })
}
