//! Collaborators backed by a running Jupyter server.
//!
//! [`JupyterKernels`] talks to the REST API of the server hosting the
//! notebook. [`ProxiedSession`] binds to a kernel by holding its channels
//! WebSocket open, which is how a frontend's kernel connection behaves.

use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use tokio::{
    net::TcpStream,
    sync::{Mutex, broadcast},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    JuError, JuResult,
    api::{ChangedKernel, KernelApi, KernelChanged, KernelModel, KernelRef, KernelSpec, KernelStatus, NotebookSession},
    host::RemoteSettings,
};

/// Location and credentials of a Jupyter server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub base_url: Url,
    pub token: Option<String>,
}

impl ServerSettings {
    /// Splits a server URL such as `http://localhost:8888/?token=abc` into
    /// its base URL and token.
    pub fn from_url(url: &Url) -> Self {
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .filter(|t| !t.is_empty());

        let mut base_url = url.clone();
        base_url.set_query(None);
        base_url.set_fragment(None);
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self { base_url, token }
    }

    fn endpoint(&self, path: &str) -> JuResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Channels URL of a kernel running on this server.
    pub fn channels_url(&self, kernel_id: &str) -> JuResult<Url> {
        let mut url = self.endpoint(&format!("api/kernels/{kernel_id}/channels"))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| JuError::InvalidHost(url.to_string()))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct JupyterKernels {
    client: reqwest::Client,
    server: ServerSettings,
}

impl JupyterKernels {
    pub fn new(server: ServerSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            server,
        }
    }
}

impl KernelApi for JupyterKernels {
    async fn start_new(&self, spec: &KernelSpec) -> JuResult<KernelModel> {
        let url = self.server.endpoint("api/kernels")?;
        debug!("Starting kernel {:?} at {}", spec, url);

        let mut request = self.client.post(url).json(spec);
        if let Some(token) = &self.server.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let model = request.send().await?.error_for_status()?.json::<KernelModel>().await?;
        Ok(model)
    }
}

type Channels = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open kernel connection; closing it is a kernel change.
struct Binding {
    kernel_id: String,
    supervisor: JoinHandle<()>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// A notebook session whose kernel can be routed through a proxy.
pub struct ProxiedSession {
    kernels: JupyterKernels,
    kernel_name: String,
    current: Mutex<Option<Binding>>,
    events: broadcast::Sender<KernelChanged>,
}

impl ProxiedSession {
    pub fn new(kernels: JupyterKernels, kernel_name: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            kernels,
            kernel_name: kernel_name.to_owned(),
            current: Mutex::new(None),
            events,
        }
    }

    /// Opens the channels of `kernel_id` and makes them the current binding.
    async fn bind(&self, kernel_id: &str, url: &Url) -> JuResult<()> {
        let (channels, _) = connect_async(url.as_str()).await?;
        info!("Connected kernel channels for {}", kernel_id);

        let supervisor = tokio::spawn(supervise(channels, kernel_id.to_owned(), self.events.clone()));
        self.replace(Some(Binding {
            kernel_id: kernel_id.to_owned(),
            supervisor,
        }))
        .await;
        Ok(())
    }

    /// Makes `binding` current, reporting the kernel it replaces.
    async fn replace(&self, binding: Option<Binding>) {
        let new_id = binding.as_ref().map(|b| b.kernel_id.clone());
        let previous = std::mem::replace(&mut *self.current.lock().await, binding);

        if let Some(previous) = previous {
            if Some(&previous.kernel_id) != new_id.as_ref() {
                let _ = self.events.send(KernelChanged {
                    kernel_id: previous.kernel_id.clone(),
                });
            }
        }
    }
}

/// Channels URL of `kernel` behind the proxy described by `settings`.
fn channels_url(kernel: &KernelRef, settings: &RemoteSettings) -> JuResult<Url> {
    let mut url = Url::parse(&format!("{}/api/kernels/{}/channels", settings.ws_url, kernel.id))?;
    if settings.append_token {
        if let Some(token) = &settings.token {
            url.query_pairs_mut().append_pair("token", token);
        }
    }
    Ok(url)
}

async fn supervise(mut channels: Channels, kernel_id: String, events: broadcast::Sender<KernelChanged>) {
    while let Some(msg) = channels.next().await {
        match msg {
            Ok(Message::Close(frame)) => {
                debug!("Kernel {} closed its channels: {:?}", kernel_id, frame);
                break;
            }
            Ok(msg) => trace!("Kernel {} message: {:?}", kernel_id, msg),
            Err(e) => {
                warn!("Kernel {} channels failed: {}", kernel_id, e);
                break;
            }
        }
    }

    info!("Lost connection to kernel {}", kernel_id);
    let _ = events.send(KernelChanged { kernel_id });
}

impl NotebookSession for ProxiedSession {
    async fn change_kernel(&self, kernel: &KernelRef, settings: &RemoteSettings) -> JuResult<ChangedKernel> {
        let url = channels_url(kernel, settings)?;

        let status = match self.bind(&kernel.id, &url).await {
            Ok(()) => KernelStatus::Idle,
            Err(e) => {
                debug!("Kernel channels for {} unreachable: {}", kernel.id, e);
                KernelStatus::Dead
            }
        };

        Ok(ChangedKernel {
            id: kernel.id.clone(),
            name: self.kernel_name.clone(),
            status,
        })
    }

    async fn change_to_default(&self) -> JuResult<ChangedKernel> {
        let spec = KernelSpec {
            name: self.kernel_name.clone(),
        };
        let model = self.kernels.start_new(&spec).await?;
        let url = self.kernels.server.channels_url(&model.id)?;

        // The remote binding is released either way; a local kernel whose
        // channels cannot be opened is reported dead.
        let status = match self.bind(&model.id, &url).await {
            Ok(()) => KernelStatus::Idle,
            Err(e) => {
                warn!("Local kernel {} channels unreachable: {}", model.id, e);
                self.replace(None).await;
                KernelStatus::Dead
            }
        };

        Ok(ChangedKernel {
            id: model.id,
            name: model.name,
            status,
        })
    }

    fn kernel_changed(&self) -> broadcast::Receiver<KernelChanged> {
        self.events.subscribe()
    }
}
