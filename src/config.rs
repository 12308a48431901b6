//! Configuration loading and validation.
//!
//! zapdesk reads a single human-owned `config.toml` from the config
//! directory (`~/.zapdesk/` by default). Every section has defaults, so an
//! empty file is a valid configuration. Secrets never live in the file: the
//! `[nlu]` section names the environment variable that holds the API key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Messaging bridge and reconnect policy.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,

    /// Intent/entity extraction backend.
    #[serde(default)]
    pub nlu: NluConfig,

    /// SQLite storage location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Channel sizing for the conversation router.
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// Messaging bridge connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    /// Base URL of the local messaging bridge.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Path of the persisted credential file, relative to the config dir
    /// unless absolute.
    #[serde(default = "default_auth_path")]
    pub auth_path: String,

    /// Fixed delay before a reconnect attempt after a transient close.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Maximum consecutive reconnect attempts. `0` means unbounded.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

impl WhatsAppConfig {
    /// Reconnect backoff as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Attempt cap, `None` when retries are unbounded.
    pub fn reconnect_limit(&self) -> Option<u32> {
        (self.max_reconnect_attempts > 0).then_some(self.max_reconnect_attempts)
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            auth_path: default_auth_path(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: 0,
        }
    }
}

/// Which NLU backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NluProviderKind {
    /// Offline keyword and regex rules.
    #[default]
    Rules,
    /// OpenAI-compatible chat completions API.
    OpenAi,
}

/// NLU backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NluConfig {
    /// Backend selector.
    #[serde(default)]
    pub provider: NluProviderKind,

    /// Model name passed to the chat API.
    #[serde(default = "default_nlu_model")]
    pub model: String,

    /// Base URL of the chat API.
    #[serde(default = "default_nlu_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_nlu_api_key_env")]
    pub api_key_env: String,

    /// Upper bound on a single NLU call.
    #[serde(default = "default_nlu_timeout_secs")]
    pub timeout_secs: u64,
}

impl NluConfig {
    /// NLU call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            provider: NluProviderKind::default(),
            model: default_nlu_model(),
            base_url: default_nlu_base_url(),
            api_key_env: default_nlu_api_key_env(),
            timeout_secs: default_nlu_timeout_secs(),
        }
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Database file, relative to the config dir unless absolute.
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

/// Conversation router channel sizing and worker lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Capacity of the classified-message channel fed by the connection.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Capacity of each per-contact session channel.
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,

    /// Seconds a per-contact worker waits for a message before exiting.
    #[serde(default = "default_worker_idle_secs")]
    pub worker_idle_secs: u64,
}

impl ConversationConfig {
    /// Per-contact worker idle period as a [`Duration`].
    pub fn worker_idle(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            inbound_buffer: default_inbound_buffer(),
            session_buffer: default_session_buffer(),
            worker_idle_secs: default_worker_idle_secs(),
        }
    }
}

// Default value functions for serde

fn default_bridge_url() -> String {
    "http://127.0.0.1:3001".to_owned()
}
fn default_auth_path() -> String {
    "auth/creds.json".to_owned()
}
fn default_reconnect_delay_secs() -> u64 {
    3
}
fn default_nlu_model() -> String {
    "gpt-4o-mini".to_owned()
}
fn default_nlu_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}
fn default_nlu_api_key_env() -> String {
    "ZAPDESK_NLU_API_KEY".to_owned()
}
fn default_nlu_timeout_secs() -> u64 {
    20
}
fn default_database() -> String {
    "zapdesk.db".to_owned()
}
fn default_inbound_buffer() -> usize {
    256
}
fn default_session_buffer() -> usize {
    32
}
fn default_worker_idle_secs() -> u64 {
    1800
}

impl Config {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.whatsapp.bridge_url).map_err(|e| {
            anyhow::anyhow!("invalid whatsapp.bridge_url {:?}: {e}", self.whatsapp.bridge_url)
        })?;
        if self.nlu.provider == NluProviderKind::OpenAi {
            url::Url::parse(&self.nlu.base_url)
                .map_err(|e| anyhow::anyhow!("invalid nlu.base_url {:?}: {e}", self.nlu.base_url))?;
        }
        if self.nlu.timeout_secs == 0 {
            anyhow::bail!("nlu.timeout_secs must be greater than zero");
        }
        if self.conversation.inbound_buffer == 0 || self.conversation.session_buffer == 0 {
            anyhow::bail!("conversation buffers must be greater than zero");
        }
        if self.conversation.worker_idle_secs == 0 {
            anyhow::bail!("conversation.worker_idle_secs must be greater than zero");
        }
        Ok(())
    }

    /// Resolve the auth credential file against the config directory.
    pub fn auth_path(&self, config_dir: &Path) -> PathBuf {
        resolve_relative(config_dir, &self.whatsapp.auth_path)
    }

    /// Resolve the database file against the config directory.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        resolve_relative(config_dir, &self.storage.database)
    }
}

fn resolve_relative(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load the configuration from a TOML file.
///
/// A missing file yields the default configuration.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    Config::from_toml(&contents)
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))
}

/// Resolve the default config directory (`~/.zapdesk/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".zapdesk"))
}
