use std::{fs::File, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{DEFAULT_KERNEL_NAME, JuResult};

/// What to do when every bind attempt still reports a dead kernel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeadKernelPolicy {
    /// Proceed as though the bind succeeded.
    #[default]
    TreatAsConnected,
    TreatAsFailed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub kernel_name: String,
    pub session_name: String,
    pub session_path: String,
    pub min_version: String,
    pub bind_attempts: u32,
    pub dead_policy: DeadKernelPolicy,
    /// No timeout when absent.
    pub negotiate_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            kernel_name: DEFAULT_KERNEL_NAME.into(),
            session_name: "platiagro".into(),
            session_path: "Experiment.ipynb".into(),
            min_version: "0.0.7".into(),
            bind_attempts: 20,
            dead_policy: DeadKernelPolicy::default(),
            negotiate_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> JuResult<Self> {
        let f = File::open(path)?;
        let config: ClientConfig = serde_json::from_reader(f)?;
        info!("Loaded client config from {:?}: {:?}", path, config);
        Ok(config)
    }

    pub fn negotiate_timeout(&self) -> Option<Duration> {
        self.negotiate_timeout_secs.map(Duration::from_secs)
    }
}
