use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{JuResult, dialog::{DialogResult, DialogSpec}, host::RemoteSettings};

/// Kernel-management API of the server hosting the notebook.
pub trait KernelApi: Send + Sync {
    fn start_new(&self, spec: &KernelSpec) -> impl std::future::Future<Output = JuResult<KernelModel>> + Send;
}

/// The live notebook session whose kernel gets rebound.
pub trait NotebookSession: Send + Sync {
    fn change_kernel(
        &self,
        kernel: &KernelRef,
        settings: &RemoteSettings,
    ) -> impl std::future::Future<Output = JuResult<ChangedKernel>> + Send;

    /// Switches back to a plain kernel on the notebook's own server.
    fn change_to_default(&self) -> impl std::future::Future<Output = JuResult<ChangedKernel>> + Send;

    /// Fires whenever the kernel backing the session changes, for any reason.
    fn kernel_changed(&self) -> broadcast::Receiver<KernelChanged>;
}

pub trait Dialog: Send + Sync + 'static {
    fn show(&self, spec: DialogSpec) -> impl std::future::Future<Output = DialogResult> + Send;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KernelModel {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KernelRef {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    Unknown,
    Starting,
    Idle,
    Busy,
    Restarting,
    Autorestarting,
    Dead,
}

/// Result of rebinding a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChangedKernel {
    pub id: String,
    pub name: String,
    pub status: KernelStatus,
}

impl ChangedKernel {
    pub fn is_dead(&self) -> bool {
        self.status == KernelStatus::Dead
    }
}

/// Notification that `kernel_id` no longer backs the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelChanged {
    pub kernel_id: String,
}
