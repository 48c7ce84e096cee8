use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::fingerprint::FingerprintPolicy;
use crate::models::{
    DEFAULT_AUTH_SESSION_TTL_SECS, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_LIFETIME_SECS,
    DEFAULT_REFRESH_SKEW_SECS,
};
use crate::store::redis::RedisStoreConfig;

/// Name of the settings file looked up in the working directory and in
/// `AUTHSESSION_SECRETS_DIR`
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub handshake: HandshakeSettings,
    #[serde(default)]
    pub fingerprint: FingerprintSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

/// Which [`SessionStore`](crate::store::SessionStore) implementation to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-process" | "inprocess" => Ok(Self::Memory),
            other => Err(format!("unknown session store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis: RedisStoreConfig,
    /// Per-operation deadline for store calls made by the managers
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Interval of the in-process expiry sweeper; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// When set, stored payloads are sealed with a key derived from it
    #[serde(default)]
    pub payload_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Sliding idle timeout; also the TTL of a freshly created session
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Hard cap on a session's total life, measured from creation
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
    /// How close to expiry an access token is refreshed
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default = "default_token_exchange_timeout_secs")]
    pub token_exchange_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeSettings {
    #[serde(default = "default_handshake_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintSettings {
    /// HMAC key for client fingerprints; generated at start-up when empty
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub include_client_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub token_endpoint: Option<String>,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Helper functions for serde defaults
fn default_true() -> bool { true }
fn default_store_timeout_ms() -> u64 { 5_000 }
fn default_sweep_interval_secs() -> u64 { 60 }
fn default_idle_timeout_secs() -> u64 { DEFAULT_IDLE_TIMEOUT_SECS }
fn default_max_lifetime_secs() -> u64 { DEFAULT_MAX_LIFETIME_SECS }
fn default_refresh_skew_secs() -> u64 { DEFAULT_REFRESH_SKEW_SECS }
fn default_token_exchange_timeout_secs() -> u64 { 10 }
fn default_handshake_ttl_secs() -> u64 { DEFAULT_AUTH_SESSION_TTL_SECS }
fn default_log_level() -> String { "info".to_string() }

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisStoreConfig::default(),
            store_timeout_ms: default_store_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            payload_secret: String::new(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            refresh_skew_secs: default_refresh_skew_secs(),
            token_exchange_timeout_secs: default_token_exchange_timeout_secs(),
        }
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_handshake_ttl_secs(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingSettings {
    /// Logger filtered by `level` (`env_logger` directive syntax)
    #[must_use]
    pub fn logger(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&self.level);
        builder
    }

    /// Install [`logger`](Self::logger) unless the host already installed one
    pub fn init_logger(&self) {
        if self.logger().try_init().is_err() {
            log::debug!("A logger is already installed, keeping it");
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            token_endpoint: None,
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            enabled: true,
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file exists but cannot be read or parsed
    pub fn load() -> anyhow::Result<Self> {
        Self::load_env_file();

        let (mut settings, source) = Self::load_base_settings()?;
        Self::apply_logging_env_override(&mut settings.logging);
        settings.logging.init_logger();
        match source {
            Some(path) => log::info!("Loaded base settings from {}", path.display()),
            None => log::info!("No {SETTINGS_FILE} found, using default settings"),
        }

        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `AUTHSESSION_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed
    fn load_base_settings() -> anyhow::Result<(Self, Option<PathBuf>)> {
        let mut loaded = (Self::default(), None);

        if let Some(from_cwd) = Self::from_file(Path::new(SETTINGS_FILE))? {
            loaded = (from_cwd, Some(PathBuf::from(SETTINGS_FILE)));
        }

        if let Ok(secrets_dir) = std::env::var("AUTHSESSION_SECRETS_DIR") {
            let secrets_path = Path::new(&secrets_dir).join(SETTINGS_FILE);
            if let Some(from_secrets) = Self::from_file(&secrets_path)? {
                loaded = (from_secrets, Some(secrets_path));
            }
        }

        Ok(loaded)
    }

    /// Parse a settings file, or `None` when it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn from_file(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = basic_toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(settings))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_store_env_overrides(&mut settings.store);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_numeric_env_override("AUTH_SESSION_TTL_SECS", &mut settings.handshake.ttl_secs);
        Self::apply_fingerprint_env_overrides(&mut settings.fingerprint);
        Self::apply_logging_env_override(&mut settings.logging);
    }

    /// `RUST_LOG` replaces the configured log filter
    pub fn apply_logging_env_override(logging: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            if !log_level.is_empty() {
                logging.level = log_level;
            }
        }
    }

    fn apply_store_env_overrides(store: &mut StoreSettings) {
        if let Ok(backend) = std::env::var("SESSION_STORE_BACKEND") {
            match backend.parse() {
                Ok(parsed) => store.backend = parsed,
                Err(e) => log::warn!("Ignoring SESSION_STORE_BACKEND: {e}"),
            }
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            store.redis.url = url;
        }
        if let Ok(prefix) = std::env::var("REDIS_KEY_PREFIX") {
            store.redis.key_prefix = prefix;
        }
        Self::apply_numeric_env_override("SESSION_STORE_TIMEOUT_MS", &mut store.store_timeout_ms);
        if let Ok(secret) = std::env::var("SESSION_PAYLOAD_SECRET") {
            store.payload_secret = secret;
        }
    }

    /// Apply environment overrides for session lifetime settings
    pub fn apply_session_env_overrides(session: &mut SessionSettings) {
        Self::apply_numeric_env_override("SESSION_IDLE_TIMEOUT_SECS", &mut session.idle_timeout_secs);
        Self::apply_numeric_env_override("SESSION_MAX_LIFETIME_SECS", &mut session.max_lifetime_secs);
        Self::apply_numeric_env_override("SESSION_REFRESH_SKEW_SECS", &mut session.refresh_skew_secs);
    }

    /// Apply fingerprint overrides, generating a secret if none is configured
    pub fn apply_fingerprint_env_overrides(fingerprint: &mut FingerprintSettings) {
        let env_secret_set = std::env::var("FINGERPRINT_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                fingerprint.secret = secret;
                true
            }
        });

        if !env_secret_set && fingerprint.secret.is_empty() {
            fingerprint.secret = Self::generate_random_secret();
            log::warn!(
                "Using an auto-generated fingerprint secret; sessions will not survive a restart. \
                 Set FINGERPRINT_SECRET or fingerprint.secret in {SETTINGS_FILE}"
            );
        }

        if let Ok(value) = std::env::var("FINGERPRINT_INCLUDE_CLIENT_IP") {
            if let Ok(include) = value.parse::<bool>() {
                fingerprint.include_client_ip = include;
            }
        }
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// 32 bytes from the OS-seeded CSPRNG, base64 encoded
    fn generate_random_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                if line.trim_start().starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get provider by name
    #[must_use]
    pub fn get_provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.enabled && p.name == name)
    }
}

impl FingerprintSettings {
    #[must_use]
    pub const fn policy(&self) -> FingerprintPolicy {
        FingerprintPolicy {
            include_client_ip: self.include_client_ip,
        }
    }
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        if let Some(env_var) = &self.client_id_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_id.clone()
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        if let Some(env_var) = &self.client_secret_env {
            if let Ok(value) = std::env::var(env_var) {
                return Some(value);
            }
        }
        self.client_secret.clone()
    }
}
