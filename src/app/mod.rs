use crate::adapters::Collaborators;
use crate::api::{ApiServer, AppState};
use crate::approval::{ApprovalPoller, DownstreamCommitter, ReactionResolver};
use crate::config::Config;
use crate::global;
use crate::ingress::IngressGuard;
use crate::session::SessionManager;
use crate::store;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Everything the service and the CLI commands operate on, wired from one
/// config.
pub struct Components {
    pub config: Config,
    pub sessions: SessionManager,
    pub collaborators: Collaborators,
    pub ingress: IngressGuard,
    pub poller: ApprovalPoller,
}

impl Components {
    pub fn build(config: Config) -> Result<Self> {
        let store = store::open_store(&config.state)?;
        let sessions = SessionManager::new(store);
        let collaborators = Collaborators::open(&config)?;

        if config.approval.team_id.is_empty() || config.approval.channel_id.is_empty() {
            warn!("approval.team_id / approval.channel_id are not set; posting will fail");
        }

        let ingress = IngressGuard::new(
            sessions.clone(),
            collaborators.clone(),
            config.approval.channel_ref(),
        );
        let poller = ApprovalPoller::new(
            sessions.clone(),
            ReactionResolver::new(
                sessions.clone(),
                &collaborators,
                config.approval.approve_reaction.clone(),
            ),
            DownstreamCommitter::new(sessions.clone(), &collaborators),
            poll_lock_path(&config)?,
        );

        Ok(Self {
            config,
            sessions,
            collaborators,
            ingress,
            poller,
        })
    }

    pub fn shutdown(self) {
        self.collaborators.close();
    }
}

/// The poll lock lives next to the state so that every process sharing a
/// state directory also shares the lock.
fn poll_lock_path(config: &Config) -> Result<PathBuf> {
    match &config.state.dir {
        Some(dir) => Ok(Path::new(dir).join("poll.lock")),
        None => global::poll_lock_file(),
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

pub async fn run_service(config: Config) -> Result<()> {
    info!("Starting meetbridge service");

    let components = Components::build(config)?;
    let poll_interval = components.config.approval.poll_interval();

    let poller_handle = components.poller.clone().spawn_background(poll_interval);

    let state = AppState {
        ingress: components.ingress.clone(),
        sessions: components.sessions.clone(),
        poller: components.poller.clone(),
    };
    let api_server = ApiServer::new(state, &components.config.server);

    info!("meetbridge is ready!");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    let served = api_server.start(shutdown).await;

    poller_handle.abort();
    components.shutdown();

    if let Err(e) = &served {
        error!("API server failed: {}", e);
    }
    served
}
