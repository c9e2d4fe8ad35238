//! Configuration management for blame-court
//!
//! Stores settings in ~/.config/blame-court/config.json. API keys never live in
//! this file: they come from the environment or the system keychain.

use crate::keyring;
use crate::llm::client::{ANALYSIS_MAX_TOKENS, MESSAGE_MAX_TOKENS};
use crate::llm::parse::SumPolicy;
use crate::llm::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::llm::ProviderKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "blame-court";
const CONFIG_FILE_NAME: &str = "config.json";
const STORE_FILE_NAME: &str = "store.json";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which LLM provider answers analysis and message prompts
    pub provider: ProviderKind,
    /// Model id override; the provider default is used when unset
    pub model: Option<String>,
    pub request_timeout_secs: u64,
    pub analysis_max_tokens: u32,
    pub message_max_tokens: u32,
    /// Attempts per model call, including the first
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub sum_policy: SumPolicy,
    pub github_api_url: String,
    /// JSON store location for the CLI; defaults to the user data dir
    pub store_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            request_timeout_secs: 120,
            analysis_max_tokens: ANALYSIS_MAX_TOKENS,
            message_max_tokens: MESSAGE_MAX_TOKENS,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 1000,
            sum_policy: SumPolicy::default(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            store_path: None,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load config from disk (or defaults), then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_stored();
        config.apply_env_overrides();
        config
    }

    /// The settings file as written, without environment overrides. Edit this
    /// one before calling [`Config::save`].
    pub fn load_stored() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load a config file. A missing file yields defaults; a corrupt one is
    /// moved aside and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("BLAME_COURT_PROVIDER") {
            match value.parse() {
                Ok(kind) => self.provider = kind,
                Err(err) => tracing::warn!(%err, "ignoring BLAME_COURT_PROVIDER"),
            }
        }
        if let Ok(model) = std::env::var("BLAME_COURT_MODEL") {
            if !model.trim().is_empty() {
                self.model = Some(model.trim().to_string());
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir()
            .ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&dir.join(CONFIG_FILE_NAME))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    pub fn model_for(&self, kind: ProviderKind) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| kind.default_model().to_string())
    }

    /// Provider API key from the environment, then the keychain.
    pub fn api_key(&self, kind: ProviderKind) -> Option<String> {
        if let Some(key) = non_empty_env(kind.api_key_env()) {
            return Some(key);
        }
        match keyring::get_provider_key(kind) {
            Ok(key) => key,
            Err(err) => {
                keyring::warn_keychain_error_once(kind.name(), &err);
                None
            }
        }
    }

    /// GitHub token from `GITHUB_TOKEN`, then the keychain.
    pub fn github_token(&self) -> Option<String> {
        if let Some(token) = non_empty_env("GITHUB_TOKEN") {
            return Some(token);
        }
        match keyring::get_github_token() {
            Ok(token) => token,
            Err(err) => {
                keyring::warn_keychain_error_once("GitHub token", &err);
                None
            }
        }
    }

    /// Where the CLI keeps judgments
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store_path.clone().or_else(|| {
            dirs::data_dir().map(|p| p.join(CONFIG_DIR_NAME).join(STORE_FILE_NAME))
        })
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("~/.config/{}/{}", CONFIG_DIR_NAME, CONFIG_FILE_NAME))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
