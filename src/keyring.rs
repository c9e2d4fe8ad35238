//! Keychain storage for provider API keys and the GitHub token
//!
//! All credentials share one keychain entry, stored as JSON, so the OS prompts
//! at most once per session.

use crate::llm::ProviderKind;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

const KEYRING_SERVICE: &str = "blame-court-credentials";
const KEYRING_USERNAME: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gemini_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    openrouter_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    github_token: Option<String>,
}

impl StoredCredentials {
    fn provider_key(&self, kind: ProviderKind) -> Option<&String> {
        match kind {
            ProviderKind::Anthropic => self.anthropic_api_key.as_ref(),
            ProviderKind::Gemini => self.gemini_api_key.as_ref(),
            ProviderKind::OpenRouter => self.openrouter_api_key.as_ref(),
        }
    }

    fn set_provider_key(&mut self, kind: ProviderKind, key: String) {
        let slot = match kind {
            ProviderKind::Anthropic => &mut self.anthropic_api_key,
            ProviderKind::Gemini => &mut self.gemini_api_key,
            ProviderKind::OpenRouter => &mut self.openrouter_api_key,
        };
        *slot = Some(key);
    }
}

type KeyringResult<T> = Result<T, String>;

static CREDENTIALS_CACHE: OnceLock<Mutex<Option<StoredCredentials>>> = OnceLock::new();
static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn credentials_cache() -> &'static Mutex<Option<StoredCredentials>> {
    CREDENTIALS_CACHE.get_or_init(|| Mutex::new(None))
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("BLAME_COURT_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keychain errors only once per process
pub fn warn_keychain_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    tracing::warn!(
        context,
        error = err,
        "couldn't access the system keychain; set the provider API key or GITHUB_TOKEN env vars to bypass it"
    );
}

fn read_credentials_uncached() -> KeyringResult<StoredCredentials> {
    if keyring_disabled() {
        return Ok(StoredCredentials::default());
    }
    let entry = keyring_entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(json) => {
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
        }
        Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
        Err(err) => Err(err.to_string()),
    }
}

fn write_credentials(creds: &StoredCredentials) -> KeyringResult<()> {
    if keyring_disabled() {
        return Err("keychain access is disabled".to_string());
    }
    let json = serde_json::to_string(creds).map_err(|e| e.to_string())?;
    keyring_entry()
        .and_then(|entry| entry.set_password(&json))
        .map_err(|e| e.to_string())
}

fn read_credentials_cached() -> KeyringResult<StoredCredentials> {
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(creds) = guard.as_ref() {
        return Ok(creds.clone());
    }
    let creds = read_credentials_uncached()?;
    *guard = Some(creds.clone());
    Ok(creds)
}

/// Read, modify and write back the shared record. An unreadable record is
/// never replaced, since that would drop the other stored keys.
fn merge_credentials(
    read: impl FnOnce() -> KeyringResult<StoredCredentials>,
    update: impl FnOnce(&mut StoredCredentials),
    write: impl FnOnce(&StoredCredentials) -> KeyringResult<()>,
) -> KeyringResult<StoredCredentials> {
    let mut creds =
        read().map_err(|e| format!("Couldn't read existing credentials, nothing saved: {}", e))?;
    update(&mut creds);
    write(&creds)?;
    Ok(creds)
}

fn update_credentials(update: impl FnOnce(&mut StoredCredentials)) -> KeyringResult<()> {
    let creds = merge_credentials(read_credentials_cached, update, write_credentials)?;
    let mut guard = match credentials_cache().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(creds);
    Ok(())
}

// ============================================================================
// Public API
// ============================================================================

pub fn get_provider_key(kind: ProviderKind) -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.provider_key(kind).cloned())
}

pub fn set_provider_key(kind: ProviderKind, key: &str) -> KeyringResult<()> {
    let key = key.trim().to_string();
    update_credentials(|creds| creds.set_provider_key(kind, key))
}

pub fn get_github_token() -> KeyringResult<Option<String>> {
    Ok(read_credentials_cached()?.github_token)
}

pub fn set_github_token(token: &str) -> KeyringResult<()> {
    let token = token.trim().to_string();
    update_credentials(|creds| creds.github_token = Some(token))
}
