use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    ClientConfig, DeadKernelPolicy,
    api::{Dialog, KernelApi, KernelChanged, NotebookSession},
    binder::{BindOutcome, KernelBinder},
    dialog::{DialogSpec, RECONNECT_LABEL},
    host::{RemoteSettings, validate_host},
    negotiator::SessionNegotiator,
};

/// Connection of one notebook session to a remote kernel.
///
/// `current_kernel_id` and `connected_at` are set exactly when `is_connected` is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub current_kernel_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    fn connected(kernel_id: String) -> Self {
        Self {
            is_connected: true,
            current_kernel_id: Some(kernel_id),
            connected_at: Some(Utc::now()),
        }
    }

    /// Drops the connection if `event` concerns the tracked kernel. Returns
    /// whether anything changed, so repeated events are harmless.
    pub fn observe_kernel_changed(&mut self, event: &KernelChanged) -> bool {
        match &self.current_kernel_id {
            Some(id) if *id == event.kernel_id => {
                *self = Self::default();
                true
            }
            _ => false,
        }
    }
}

/// Result of a single connect attempt against a validated host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Bound(String),
    /// Bound although the kernel never stopped reporting dead.
    StillDead(String),
    /// The tunnel failed; the user has dismissed the error notice.
    Abandoned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected { kernel_id: String, still_dead: bool },
    Failed,
    Cancelled,
}

/// Reported once the tracked kernel went away and the user dismissed the
/// disconnection notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLost {
    pub kernel_id: String,
    /// Host to connect to again, when the user chose to reconnect.
    pub reconnect: Option<String>,
}

/// Subscription to the session's kernel-changed notifications. Dropping it
/// stops the watcher.
struct KernelWatch {
    kernel_id: String,
    host: String,
    task: JoinHandle<()>,
}

impl Drop for KernelWatch {
    fn drop(&mut self) {
        debug!("Disposing kernel watcher for {}", self.kernel_id);
        self.task.abort();
    }
}

pub struct ConnectionManager<S, K, D> {
    session: S,
    kernels: K,
    dialog: Arc<D>,
    negotiator: SessionNegotiator,
    binder: KernelBinder,
    dead_policy: DeadKernelPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    watch: Option<KernelWatch>,
    events_tx: mpsc::UnboundedSender<ConnectionLost>,
    events_rx: mpsc::UnboundedReceiver<ConnectionLost>,
}

impl<S: NotebookSession, K: KernelApi, D: Dialog> ConnectionManager<S, K, D> {
    pub fn new(session: S, kernels: K, dialog: Arc<D>, config: &ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            session,
            kernels,
            dialog,
            negotiator: SessionNegotiator::new(config),
            binder: KernelBinder::new(config),
            dead_policy: config.dead_policy,
            state: Arc::new(state),
            watch: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Next notification produced by the kernel watcher.
    pub async fn next_event(&mut self) -> Option<ConnectionLost> {
        self.events_rx.recv().await
    }

    /// Runs the interactive connect flow, starting with `host` in the input
    /// field. Invalid input and tunnel failures return to the host prompt
    /// with the last value preserved.
    pub async fn connect(&mut self, host: &str) -> ConnectOutcome {
        let mut host = host.to_owned();

        loop {
            let result = self.dialog.show(DialogSpec::host_input(&host)).await;
            if !result.button.accept {
                info!("Connect dialog dismissed");
                return ConnectOutcome::Cancelled;
            }
            host = result.value.unwrap_or_default();

            let url = match validate_host(&host) {
                Ok(url) => url,
                Err(e) => {
                    warn!("{}", e);
                    self.dialog.show(DialogSpec::invalid_host()).await;
                    continue;
                }
            };

            match self.connect_to(&url).await {
                AttemptOutcome::Bound(kernel_id) => {
                    return ConnectOutcome::Connected {
                        kernel_id,
                        still_dead: false,
                    };
                }
                AttemptOutcome::StillDead(kernel_id) => {
                    return ConnectOutcome::Connected {
                        kernel_id,
                        still_dead: true,
                    };
                }
                AttemptOutcome::Abandoned => continue,
                AttemptOutcome::Failed => return ConnectOutcome::Failed,
            }
        }
    }

    /// One negotiate, derive, bind sequence against an already validated host.
    pub async fn connect_to(&mut self, host: &Url) -> AttemptOutcome {
        let span = info_span!("connect", attempt = %Uuid::new_v4(), host = %host.origin().ascii_serialization());
        self.attempt(host).instrument(span).await
    }

    async fn attempt(&mut self, host: &Url) -> AttemptOutcome {
        let descriptor = match self.negotiator.create_session(host).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Session negotiation failed: {}", e);
                self.dialog.show(DialogSpec::transport_error()).await;
                return AttemptOutcome::Abandoned;
            }
        };

        let settings = RemoteSettings::derive(host);
        debug!("Remote settings: {:?}", settings);

        // Subscribe before binding so a loss reported while binding is not missed.
        let events = self.session.kernel_changed();

        let outcome = match self.binder.bind(&self.kernels, &self.session, &settings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Binding the remote kernel failed: {}", e);
                self.dialog.show(DialogSpec::bind_failed(&e)).await;
                return AttemptOutcome::Failed;
            }
        };

        let still_dead = matches!(outcome, BindOutcome::StillDead { .. });
        if still_dead && self.dead_policy == DeadKernelPolicy::TreatAsFailed {
            self.dialog
                .show(DialogSpec::bind_failed(format!(
                    "kernel still dead after {} attempts",
                    outcome.attempts()
                )))
                .await;
            return AttemptOutcome::Failed;
        }

        let kernel_id = outcome.kernel().id.clone();
        self.state.send_replace(ConnectionState::connected(kernel_id.clone()));
        self.install_watch(kernel_id.clone(), host.as_str().to_owned(), events);

        info!(
            "Connected to {}/api/kernels/{} as {} after {} attempt(s)",
            settings.base_url,
            descriptor.id,
            kernel_id,
            outcome.attempts()
        );
        self.dialog.show(DialogSpec::connected(&settings.base_url)).await;

        if still_dead {
            AttemptOutcome::StillDead(kernel_id)
        } else {
            AttemptOutcome::Bound(kernel_id)
        }
    }

    /// Switches the session back to a local kernel after confirmation.
    pub async fn disconnect(&mut self) -> bool {
        let connected = self.state.borrow().is_connected;
        if !connected {
            debug!("Disconnect requested while not connected");
            return false;
        }

        let confirm = self.dialog.show(DialogSpec::confirm_disconnect()).await;
        if !confirm.button.accept {
            return false;
        }

        self.release().await
    }

    /// Switches the session back to a local kernel without asking. On failure
    /// the connection and its watcher are kept.
    pub async fn release(&mut self) -> bool {
        let Some(kernel_id) = self.state.borrow().current_kernel_id.clone() else {
            debug!("Release requested while not connected");
            return false;
        };

        // Our own rebind fires a kernel-changed event; it must not count as a loss.
        let events = self.session.kernel_changed();
        let host = self.watch.take().map(|w| w.host.clone()).unwrap_or_default();

        match self.session.change_to_default().await {
            Ok(kernel) => {
                info!("Switched back to local kernel {}", kernel.id);
                self.state.send_replace(ConnectionState::default());
                true
            }
            Err(e) => {
                error!("Failed to switch to a local kernel: {}", e);
                self.install_watch(kernel_id, host, events);
                self.dialog.show(DialogSpec::disconnect_failed(&e)).await;
                false
            }
        }
    }

    fn install_watch(&mut self, kernel_id: String, host: String, events: broadcast::Receiver<KernelChanged>) {
        let task = tokio::spawn(watch_kernel(
            events,
            self.state.clone(),
            self.dialog.clone(),
            self.events_tx.clone(),
            host.clone(),
        ));

        debug!("Watching kernel {}", kernel_id);
        if self.watch.replace(KernelWatch { kernel_id, host, task }).is_some() {
            debug!("Replaced previous kernel watcher");
        }
    }
}

async fn watch_kernel<D: Dialog>(
    mut events: broadcast::Receiver<KernelChanged>,
    state: Arc<watch::Sender<ConnectionState>>,
    dialog: Arc<D>,
    notify: mpsc::UnboundedSender<ConnectionLost>,
    host: String,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Kernel watcher skipped {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Kernel-changed channel closed");
                return;
            }
        };

        if !state.send_if_modified(|s| s.observe_kernel_changed(&event)) {
            trace!("Ignoring change of kernel {}", event.kernel_id);
            continue;
        }

        warn!("Remote kernel {} has been disconnected", event.kernel_id);
        let result = dialog.show(DialogSpec::disconnected()).await;
        let reconnect = (result.button.label == RECONNECT_LABEL).then(|| host.clone());

        let _ = notify.send(ConnectionLost {
            kernel_id: event.kernel_id,
            reconnect,
        });
    }
}
