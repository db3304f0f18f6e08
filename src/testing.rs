use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

use crate::{
    JuError, JuResult,
    api::{ChangedKernel, Dialog, KernelApi, KernelChanged, KernelModel, KernelRef, KernelSpec, KernelStatus, NotebookSession},
    dialog::{Button, DialogBody, DialogResult, DialogSpec},
    host::RemoteSettings,
};

pub(crate) enum TunnelReply {
    Text(String),
    Close,
    Silent,
}

/// What the mock tunnel saw from the client.
pub(crate) struct SeenTunnel {
    pub path: String,
    pub query: String,
    pub frames: Vec<String>,
}

pub(crate) struct MockTunnel {
    pub addr: SocketAddr,
    handle: JoinHandle<SeenTunnel>,
}

impl MockTunnel {
    pub async fn finish(self) -> SeenTunnel {
        self.handle.await.unwrap()
    }
}

/// Accepts one WebSocket client and answers its first frame with `reply`.
pub(crate) async fn spawn_tunnel(reply: TunnelReply) -> MockTunnel {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();

        let mut path = String::new();
        let mut query = String::new();
        let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_owned();
            query = req.uri().query().unwrap_or_default().to_owned();
            Ok(resp)
        })
        .await
        .unwrap();

        let mut frames = Vec::new();
        if let Some(Ok(Message::Text(frame))) = ws.next().await {
            frames.push(frame);
        }

        match reply {
            TunnelReply::Text(text) => {
                let _ = ws.send(Message::Text(text)).await;
            }
            TunnelReply::Close => {
                let _ = ws.close(None).await;
            }
            TunnelReply::Silent => {}
        }

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(frame) = msg {
                frames.push(frame);
            }
        }

        SeenTunnel { path, query, frames }
    });

    MockTunnel { addr, handle }
}

/// An address nothing listens on.
pub(crate) async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Answers dialogs from a script, then dismisses everything.
pub(crate) struct ScriptedDialog {
    script: Mutex<VecDeque<DialogResult>>,
    shown: Mutex<Vec<DialogSpec>>,
}

impl ScriptedDialog {
    pub fn new(script: Vec<DialogResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn host(value: &str) -> DialogResult {
        DialogResult {
            button: Button::accept("Connect"),
            value: Some(value.to_owned()),
        }
    }

    pub fn ok() -> DialogResult {
        DialogResult {
            button: Button::ok(),
            value: None,
        }
    }

    pub fn press(label: &str) -> DialogResult {
        DialogResult {
            button: Button::accept(label),
            value: None,
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.shown.lock().unwrap().iter().map(|d| d.title.clone()).collect()
    }

    /// Prefilled values of every host prompt shown.
    pub fn host_values(&self) -> Vec<String> {
        self.shown
            .lock()
            .unwrap()
            .iter()
            .filter_map(|d| match &d.body {
                DialogBody::HostInput { value, .. } => Some(value.clone()),
                DialogBody::Text(_) => None,
            })
            .collect()
    }
}

impl Dialog for ScriptedDialog {
    async fn show(&self, spec: DialogSpec) -> DialogResult {
        self.shown.lock().unwrap().push(spec);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(DialogResult::dismissed)
    }
}

#[derive(Default)]
struct KernelsInner {
    /// Ids handed out in order; the last one repeats.
    ids: Vec<String>,
    started: Mutex<Vec<String>>,
}

#[derive(Clone)]
pub(crate) struct MockKernels {
    inner: Arc<KernelsInner>,
}

impl MockKernels {
    pub fn new(id: &str) -> Self {
        Self::sequence(&[id])
    }

    pub fn sequence(ids: &[&str]) -> Self {
        Self {
            inner: Arc::new(KernelsInner {
                ids: ids.iter().map(|id| (*id).to_owned()).collect(),
                ..KernelsInner::default()
            }),
        }
    }

    pub fn failing() -> Self {
        Self {
            inner: Arc::new(KernelsInner::default()),
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.inner.started.lock().unwrap().clone()
    }
}

impl KernelApi for MockKernels {
    async fn start_new(&self, spec: &KernelSpec) -> JuResult<KernelModel> {
        let mut started = self.inner.started.lock().unwrap();
        let index = started.len().min(self.inner.ids.len().saturating_sub(1));
        started.push(spec.name.clone());

        match self.inner.ids.get(index) {
            Some(id) => Ok(KernelModel {
                id: id.clone(),
                name: spec.name.clone(),
            }),
            None => Err(JuError::Io(std::io::Error::other("kernel server unavailable"))),
        }
    }
}

struct SessionInner {
    statuses: Mutex<VecDeque<KernelStatus>>,
    fallback: KernelStatus,
    bound: Mutex<Vec<(KernelRef, RemoteSettings)>>,
    default_calls: Mutex<u32>,
    default_fails: AtomicBool,
    drops_on_bind: AtomicBool,
    events: broadcast::Sender<KernelChanged>,
}

/// Notebook session whose rebinds report scripted statuses, then `fallback`.
#[derive(Clone)]
pub(crate) struct MockSession {
    inner: Arc<SessionInner>,
}

impl MockSession {
    pub fn new(statuses: Vec<KernelStatus>, fallback: KernelStatus) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(SessionInner {
                statuses: Mutex::new(statuses.into()),
                fallback,
                bound: Mutex::new(Vec::new()),
                default_calls: Mutex::new(0),
                default_fails: AtomicBool::new(false),
                drops_on_bind: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Makes `change_to_default` fail without touching the binding.
    pub fn fail_default(&self, fail: bool) {
        self.inner.default_fails.store(fail, Ordering::SeqCst);
    }

    /// Makes every rebind report the kernel as changed before it returns.
    pub fn drop_on_bind(&self) {
        self.inner.drops_on_bind.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, kernel_id: &str) {
        let _ = self.inner.events.send(KernelChanged {
            kernel_id: kernel_id.to_owned(),
        });
    }

    pub fn bound(&self) -> Vec<(KernelRef, RemoteSettings)> {
        self.inner.bound.lock().unwrap().clone()
    }

    pub fn change_calls(&self) -> usize {
        self.inner.bound.lock().unwrap().len()
    }

    pub fn default_calls(&self) -> u32 {
        *self.inner.default_calls.lock().unwrap()
    }
}

impl NotebookSession for MockSession {
    async fn change_kernel(&self, kernel: &KernelRef, settings: &RemoteSettings) -> JuResult<ChangedKernel> {
        self.inner
            .bound
            .lock()
            .unwrap()
            .push((kernel.clone(), settings.clone()));
        let status = self
            .inner
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.inner.fallback);
        if self.inner.drops_on_bind.load(Ordering::SeqCst) {
            self.emit(&kernel.id);
        }

        Ok(ChangedKernel {
            id: kernel.id.clone(),
            name: "python3".into(),
            status,
        })
    }

    async fn change_to_default(&self) -> JuResult<ChangedKernel> {
        *self.inner.default_calls.lock().unwrap() += 1;
        if self.inner.default_fails.load(Ordering::SeqCst) {
            return Err(JuError::Io(std::io::Error::other("local kernel unavailable")));
        }
        let previous = self.inner.bound.lock().unwrap().last().map(|(k, _)| k.id.clone());
        if let Some(id) = previous {
            self.emit(&id);
        }

        Ok(ChangedKernel {
            id: "local".into(),
            name: "python3".into(),
            status: KernelStatus::Idle,
        })
    }

    fn kernel_changed(&self) -> broadcast::Receiver<KernelChanged> {
        self.inner.events.subscribe()
    }
}
