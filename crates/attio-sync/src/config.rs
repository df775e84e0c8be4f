//! # Sync Configuration
//!
//! Process-wide configuration and the lazily built remote client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     ATTIO_API_KEY=sk_live_...                                          │
//! │     ATTIO_BACKGROUND_SYNC=true                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/attio-sync/attio.toml (Linux)                            │
//! │     ~/Library/Application Support/com.attio.attio-sync/attio.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     sync enabled, inline execution, batches of 100                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # attio.toml
//! [api]
//! api_key = "sk_live_..."
//! workspace_id = "ws_123"
//! base_url = "https://api.attio.com/v2"
//! rate_limit_retries = true
//!
//! [sync]
//! sync_enabled = true
//! background_mode = false
//! batch_size = 100
//! max_retries = 3
//! upsert_match_field = "email"
//! execution_mode = "lenient"
//! ```
//!
//! ## Registry Lifecycle
//! ```text
//! configure(|c| ...) ──► validate ──► drop cached client
//!                                            │
//! client() ──► cached? ──yes──► return       │
//!                 │                          │
//!                 no ──► api_key? ──no──► MissingApiKey
//!                           │
//!                          yes ──► factory.build ──► RateLimitedClient ──► cache
//!
//! client_unguarded() returns the same build without the RateLimitedClient
//! wrapper; batches use it and handle rate limits per batch.
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use attio_core::{SyncSettings, DEFAULT_RETRY_AFTER_SECS};

use crate::client::{ClientFactory, RemoteClient};
use crate::error::{SyncError, SyncResult};
use crate::guard::{RateLimitGuard, RateLimitedClient};

// =============================================================================
// API Settings
// =============================================================================

/// Credentials and client behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    /// CRM API key. Without one no client can be built.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub workspace_id: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Wrap the client so rate-limited calls are retried.
    #[serde(default = "default_true")]
    pub rate_limit_retries: bool,

    /// Backoff used when a rate-limit error has no retry-after hint.
    #[serde(default = "default_retry_after")]
    pub default_retry_after_secs: u64,
}

fn default_base_url() -> String {
    "https://api.attio.com/v2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retry_after() -> u64 {
    DEFAULT_RETRY_AFTER_SECS
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            api_key: None,
            workspace_id: None,
            base_url: default_base_url(),
            rate_limit_retries: true,
            default_retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        }
    }
}

impl ApiSettings {
    /// The configured key, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

// =============================================================================
// Attio Config
// =============================================================================

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttioConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl AttioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (attio.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading attio config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load attio config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Attio config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.upsert_match_field.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "upsert_match_field must not be empty".into(),
            ));
        }

        let url = url::Url::parse(&self.api.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ATTIO_API_KEY") {
            debug!("Overriding API key from environment");
            self.api.api_key = Some(key);
        }

        if let Some(id) = lookup("ATTIO_WORKSPACE_ID") {
            self.api.workspace_id = Some(id);
        }

        if let Some(url) = lookup("ATTIO_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.api.base_url = url;
        }

        if let Some(value) = lookup("ATTIO_SYNC_ENABLED") {
            match parse_flag(&value) {
                Some(flag) => self.sync.sync_enabled = flag,
                None => warn!(value = %value, "Invalid ATTIO_SYNC_ENABLED in environment"),
            }
        }

        if let Some(value) = lookup("ATTIO_BACKGROUND_SYNC") {
            match parse_flag(&value) {
                Some(flag) => self.sync.background_mode = flag,
                None => warn!(value = %value, "Invalid ATTIO_BACKGROUND_SYNC in environment"),
            }
        }

        if let Some(value) = lookup("ATTIO_BATCH_SIZE") {
            if let Ok(size) = value.parse::<usize>() {
                self.sync.batch_size = size;
            }
        }

        if let Some(value) = lookup("ATTIO_MAX_RETRIES") {
            if let Ok(retries) = value.parse::<u32>() {
                self.sync.max_retries = retries;
            }
        }

        if let Some(field) = lookup("ATTIO_UPSERT_MATCH_FIELD") {
            self.sync.upsert_match_field = field;
        }

        if let Some(mode) = lookup("ATTIO_EXECUTION_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding execution mode from environment");
                    self.sync.execution_mode = parsed;
                }
                Err(e) => warn!("{}", e),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "attio", "attio-sync")
            .map(|dirs| dirs.config_dir().join("attio.toml"))
    }

    /// The rate-limit guard these settings describe.
    pub fn guard(&self) -> RateLimitGuard {
        RateLimitGuard::new(
            self.sync.max_retries,
            Duration::from_secs(self.api.default_retry_after_secs),
        )
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// Configuration Registry
// =============================================================================

/// Shared configuration plus the memoized clients built from it.
pub struct ConfigurationRegistry {
    config: RwLock<AttioConfig>,
    clients: Mutex<Option<Clients>>,
    factory: Arc<dyn ClientFactory>,
}

/// The factory's client and the one handed to single-record calls, which
/// wraps it in a `RateLimitedClient` when `rate_limit_retries` is on.
#[derive(Clone)]
struct Clients {
    plain: Arc<dyn RemoteClient>,
    guarded: Arc<dyn RemoteClient>,
}

impl ConfigurationRegistry {
    pub fn new(config: AttioConfig, factory: Arc<dyn ClientFactory>) -> Self {
        ConfigurationRegistry {
            config: RwLock::new(config),
            clients: Mutex::new(None),
            factory,
        }
    }

    /// Applies `mutator` to the configuration and invalidates the cached
    /// client. The change is rolled back when validation fails.
    pub fn configure<F>(&self, mutator: F) -> SyncResult<()>
    where
        F: FnOnce(&mut AttioConfig),
    {
        {
            let mut config = self.config.write().map_err(poisoned)?;

            let mut updated = config.clone();
            mutator(&mut updated);
            updated.validate()?;
            *config = updated;
        }

        // The config lock must be released first: `clients()` takes the
        // client lock before reading the config.
        self.reset_client()?;
        info!("Attio configuration updated");
        Ok(())
    }

    /// Returns the memoized client, building it on first use.
    pub fn client(&self) -> SyncResult<Arc<dyn RemoteClient>> {
        Ok(self.clients()?.guarded)
    }

    /// The factory's client without per-call rate-limit retries, for callers
    /// that handle rate limits themselves (batches).
    pub fn client_unguarded(&self) -> SyncResult<Arc<dyn RemoteClient>> {
        Ok(self.clients()?.plain)
    }

    fn clients(&self) -> SyncResult<Clients> {
        let mut cached = self.clients.lock().map_err(poisoned)?;
        if let Some(clients) = cached.as_ref() {
            return Ok(clients.clone());
        }

        let config = self.snapshot()?;
        if config.api.api_key().is_none() {
            return Err(SyncError::MissingApiKey);
        }

        let plain = self.factory.build(&config.api)?;
        let guarded: Arc<dyn RemoteClient> = if config.api.rate_limit_retries {
            Arc::new(RateLimitedClient::new(Arc::clone(&plain), config.guard()))
        } else {
            Arc::clone(&plain)
        };

        debug!(rate_limited = config.api.rate_limit_retries, "Remote client built");
        let clients = Clients { plain, guarded };
        *cached = Some(clients.clone());
        Ok(clients)
    }

    /// Drops the memoized client so the next `client()` rebuilds it.
    pub fn reset_client(&self) -> SyncResult<()> {
        let mut cached = self.clients.lock().map_err(poisoned)?;
        *cached = None;
        Ok(())
    }

    /// Current sync behaviour settings.
    pub fn settings(&self) -> SyncResult<SyncSettings> {
        Ok(self.config.read().map_err(poisoned)?.sync.clone())
    }

    /// Copy of the full configuration.
    pub fn snapshot(&self) -> SyncResult<AttioConfig> {
        Ok(self.config.read().map_err(poisoned)?.clone())
    }
}

impl std::fmt::Debug for ConfigurationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SyncError {
    SyncError::Internal("configuration lock poisoned".into())
}
