use tracing::{debug, info, warn};

use crate::{
    ClientConfig, JuResult,
    api::{ChangedKernel, KernelApi, KernelRef, KernelSpec, NotebookSession},
    host::RemoteSettings,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound { kernel: ChangedKernel, attempts: u32 },
    /// Every attempt reported a dead kernel; carries the last result.
    StillDead { kernel: ChangedKernel, attempts: u32 },
}

impl BindOutcome {
    pub fn kernel(&self) -> &ChangedKernel {
        match self {
            BindOutcome::Bound { kernel, .. } | BindOutcome::StillDead { kernel, .. } => kernel,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            BindOutcome::Bound { attempts, .. } | BindOutcome::StillDead { attempts, .. } => *attempts,
        }
    }
}

/// Points a notebook session at a fresh placeholder kernel routed through the
/// proxy, retrying while the kernel reports dead.
#[derive(Debug, Clone)]
pub struct KernelBinder {
    kernel_name: String,
    max_attempts: u32,
}

impl KernelBinder {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            kernel_name: config.kernel_name.clone(),
            max_attempts: config.bind_attempts.max(1),
        }
    }

    pub async fn bind<K: KernelApi, S: NotebookSession>(
        &self,
        kernels: &K,
        session: &S,
        settings: &RemoteSettings,
    ) -> JuResult<BindOutcome> {
        let spec = KernelSpec {
            name: self.kernel_name.clone(),
        };
        let placeholder = kernels.start_new(&spec).await?;
        info!("Started placeholder kernel: {:?}", placeholder);

        let kernel_ref = KernelRef { id: placeholder.id };
        let mut attempts = 0;

        loop {
            attempts += 1;
            let kernel = session.change_kernel(&kernel_ref, settings).await?;
            debug!("Bind attempt {}/{}: {:?}", attempts, self.max_attempts, kernel.status);

            if !kernel.is_dead() {
                return Ok(BindOutcome::Bound { kernel, attempts });
            }
            if attempts >= self.max_attempts {
                warn!("Kernel {} still dead after {} attempts", kernel.id, attempts);
                return Ok(BindOutcome::StillDead { kernel, attempts });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::KernelStatus,
        host::validate_host,
        testing::{MockKernels, MockSession},
    };

    fn settings() -> RemoteSettings {
        RemoteSettings::derive(&validate_host("http://localhost:8888/?token=abc123").unwrap())
    }

    #[tokio::test]
    async fn retries_until_alive() {
        let kernels = MockKernels::new("p1");
        let mut script = vec![KernelStatus::Dead; 5];
        script.push(KernelStatus::Idle);
        let session = MockSession::new(script, KernelStatus::Dead);

        let outcome = KernelBinder::new(&ClientConfig::default())
            .bind(&kernels, &session, &settings())
            .await
            .unwrap();

        assert!(matches!(outcome, BindOutcome::Bound { attempts: 6, .. }));
        assert_eq!(outcome.kernel().status, KernelStatus::Idle);
        assert_eq!(outcome.kernel().id, "p1");
        assert_eq!(session.change_calls(), 6);
        assert_eq!(kernels.started(), vec!["python3".to_owned()]);
    }

    #[tokio::test]
    async fn binds_placeholder_with_remote_settings() {
        let kernels = MockKernels::new("p1");
        let session = MockSession::new(vec![], KernelStatus::Idle);

        KernelBinder::new(&ClientConfig::default())
            .bind(&kernels, &session, &settings())
            .await
            .unwrap();

        let calls = session.bound();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, KernelRef { id: "p1".into() });
        assert_eq!(calls[0].1, settings());
    }

    #[tokio::test]
    async fn persistent_dead_still_resolves_after_limit() {
        let kernels = MockKernels::new("p1");
        let session = MockSession::new(vec![], KernelStatus::Dead);

        let outcome = KernelBinder::new(&ClientConfig::default())
            .bind(&kernels, &session, &settings())
            .await
            .unwrap();

        assert!(matches!(outcome, BindOutcome::StillDead { attempts: 20, .. }));
        assert!(outcome.kernel().is_dead());
        assert_eq!(session.change_calls(), 20);
    }

    #[tokio::test]
    async fn attempt_limit_follows_config() {
        let config = ClientConfig {
            bind_attempts: 3,
            ..ClientConfig::default()
        };
        let kernels = MockKernels::new("p1");
        let session = MockSession::new(vec![], KernelStatus::Dead);

        let outcome = KernelBinder::new(&config).bind(&kernels, &session, &settings()).await.unwrap();

        assert_eq!(outcome.attempts(), 3);
        assert_eq!(session.change_calls(), 3);
    }

    #[tokio::test]
    async fn placeholder_failure_skips_binding() {
        let kernels = MockKernels::failing();
        let session = MockSession::new(vec![], KernelStatus::Idle);

        let res = KernelBinder::new(&ClientConfig::default())
            .bind(&kernels, &session, &settings())
            .await;

        assert!(res.is_err());
        assert_eq!(session.change_calls(), 0);
    }
}
