use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use jurek::{
    AttemptOutcome, ClientConfig, ConnectOutcome, ConnectionManager, RemoteSettings, SessionNegotiator,
    console::ConsoleDialog,
    host::validate_host,
    jupyter::{JupyterKernels, ProxiedSession, ServerSettings},
};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct JurekApplication {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
    #[command(subcommand)]
    command: JurekCommand,
}

#[derive(Subcommand)]
enum JurekCommand {
    /// Print the proxy settings derived from a backend URL
    Settings { host: String },
    /// Provision a session on a remote server and print its kernel
    Negotiate { host: String },
    /// Bind a local notebook session to a remote kernel and supervise it
    Connect {
        /// Backend URL to prefill, e.g. http://localhost:8888/?token=abc123
        #[arg(long, default_value = "")]
        host: String,
        /// Jupyter server hosting the notebook
        #[arg(long)]
        server: String,
    },
}

impl JurekApplication {
    fn level(&self) -> LevelFilter {
        match self.debug {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        debug!("Client config: {:?}", config);

        match &self.command {
            JurekCommand::Settings { host } => {
                let settings = RemoteSettings::derive(&validate_host(host)?);
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            JurekCommand::Negotiate { host } => {
                let descriptor = SessionNegotiator::new(&config)
                    .create_session(&validate_host(host)?)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&descriptor)?);
            }
            JurekCommand::Connect { host, server } => {
                connect(&config, host, server).await?;
            }
        }

        Ok(())
    }
}

async fn connect(config: &ClientConfig, host: &str, server: &str) -> Result<()> {
    let server = ServerSettings::from_url(&validate_host(server)?);
    info!("Using notebook server at {}", server.base_url);

    let kernels = JupyterKernels::new(server);
    let session = ProxiedSession::new(kernels.clone(), &config.kernel_name);
    let mut manager = ConnectionManager::new(session, kernels, Arc::new(ConsoleDialog::default()), config);

    match manager.connect(host).await {
        ConnectOutcome::Connected { kernel_id, still_dead } => {
            if still_dead {
                warn!("Kernel {} never reported alive", kernel_id);
            }
        }
        ConnectOutcome::Failed => bail!("Could not connect to a remote kernel"),
        ConnectOutcome::Cancelled => return Ok(()),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, switching back to a local kernel");
                if manager.state().is_connected && !manager.release().await {
                    bail!("Could not switch back to a local kernel");
                }
                return Ok(());
            }
            lost = manager.next_event() => {
                let Some(lost) = lost else {
                    return Ok(());
                };
                let Some(host) = lost.reconnect else {
                    info!("Kernel {} lost, not reconnecting", lost.kernel_id);
                    return Ok(());
                };

                info!("Reconnecting to {}", host);
                let outcome = match validate_host(&host) {
                    Ok(url) => manager.connect_to(&url).await,
                    Err(_) => AttemptOutcome::Abandoned,
                };
                if matches!(outcome, AttemptOutcome::Abandoned) {
                    if !matches!(manager.connect(&host).await, ConnectOutcome::Connected { .. }) {
                        return Ok(());
                    }
                } else if outcome == AttemptOutcome::Failed {
                    bail!("Could not reconnect to {}", host);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = JurekApplication::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(app.level().into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        // Use a more compact, abbreviated log format
        .compact()
        // Display source code file paths
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let res = app.run().await;
    if let Err(e) = &res {
        error!("Application error: {:?}, bt:\n{:?}", e, e.backtrace());
    }

    res
}
