pub mod api;
pub mod binder;
pub mod config;
pub mod console;
pub mod dialog;
pub mod host;
pub mod jupyter;
pub mod manager;
pub mod negotiator;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{Dialog, KernelApi, NotebookSession};
pub use binder::{BindOutcome, KernelBinder};
pub use config::{ClientConfig, DeadKernelPolicy};
pub use host::RemoteSettings;
pub use manager::{AttemptOutcome, ConnectOutcome, ConnectionLost, ConnectionManager, ConnectionState};
pub use negotiator::{SessionDescriptor, SessionNegotiator};

#[derive(Debug, thiserror::Error)]
pub enum JuError {
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("WebSocket Error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Tunnel closed before a reply was received")]
    TunnelClosed,

    #[error("Timed out waiting for the tunnel")]
    Timeout,

    #[error("Session creation rejected with status {0}")]
    SessionRejected(u16),

    #[error("Malformed tunnel reply: {0}")]
    MalformedReply(String),

    #[error("Base64 Error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Url Error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Http Error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type JuResult<T> = std::result::Result<T, JuError>;

/// Kernel spec requested for both the negotiated session and the placeholder.
pub const DEFAULT_KERNEL_NAME: &str = "python3";
