use crate::global;
use crate::session::ChannelRef;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub approval: ApprovalConfig,
    pub adapters: AdaptersConfig,
    pub transcripts: TranscriptsConfig,
    pub extraction: ExtractionConfig,
    pub planning: PlanningConfig,
    pub messaging: MessagingConfig,
    pub board: BoardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// Defaults to `<data dir>/meetbridge/state`.
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Compared literally against what the messaging platform returns.
    pub approve_reaction: String,
    pub team_id: String,
    pub channel_id: String,
    /// How often the background poller resolves and commits open sessions.
    pub poll_interval_seconds: u64,
    /// Upper bound for any single external call.
    pub call_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterMode {
    #[default]
    Http,
    /// In-process fakes; nothing leaves the machine.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub mode: AdapterMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptsConfig {
    pub endpoint: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub endpoint: String,
    pub token: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    pub endpoint: String,
    pub token: String,
    pub plan_id: String,
    pub bucket_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub endpoint: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub endpoint: String,
    pub token: String,
    pub list_id: String,
}

const GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3838,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            approve_reaction: "👍".to_string(),
            team_id: String::new(),
            channel_id: String::new(),
            poll_interval_seconds: 300,
            call_timeout_seconds: 30,
        }
    }
}

impl Default for TranscriptsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.fireflies.ai/graphql".to_string(),
            token: String::new(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            token: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            endpoint: GRAPH_ENDPOINT.to_string(),
            token: String::new(),
            plan_id: String::new(),
            bucket_id: None,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            endpoint: GRAPH_ENDPOINT.to_string(),
            token: String::new(),
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.clickup.com/api/v2".to_string(),
            token: String::new(),
            list_id: String::new(),
        }
    }
}

impl ApprovalConfig {
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(&self.team_id, &self.channel_id)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path, writing defaults there if it is missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let mut config = Self::default();
            config.save_to(config_path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let mut config: Self = toml::from_str(&content).context("Failed to parse config file")?;
        config.apply_env_overrides();

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Tokens can be kept out of the config file via
    /// `MEETBRIDGE_<SECTION>_TOKEN`.
    fn apply_env_overrides(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(token) = read("MEETBRIDGE_TRANSCRIPTS_TOKEN") {
            self.transcripts.token = token;
        }
        if let Some(token) = read("MEETBRIDGE_EXTRACTION_TOKEN") {
            self.extraction.token = token;
        }
        if let Some(token) = read("MEETBRIDGE_PLANNING_TOKEN") {
            self.planning.token = token;
        }
        if let Some(token) = read("MEETBRIDGE_MESSAGING_TOKEN") {
            self.messaging.token = token;
        }
        if let Some(token) = read("MEETBRIDGE_BOARD_TOKEN") {
            self.board.token = token;
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
