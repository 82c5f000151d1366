use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const APP_NAME: &str = "PharmaReceipt";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PRIMARY_KEY_VAR: &str = "GEMINI_API_KEY";
/// Fallback keys are `GEMINI_API_KEY_2` through `GEMINI_API_KEY_10`.
pub const MAX_FALLBACK_SUFFIX: usize = 10;
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DATABASE_FILE: &str = "pharma_receipt.db";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    /// OAuth client id for Drive sync; cloud history is offered only when set.
    pub google_client_id: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self> {
        load_env(None);
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Fails when no API key is present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = collect_api_keys(&lookup);
        if api_keys.is_empty() {
            return Err(Error::Config(format!(
                "No {} found in environment variables.",
                PRIMARY_KEY_VAR
            )));
        }
        let model = non_blank(lookup("GEMINI_MODEL")).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let google_client_id = non_blank(lookup("GOOGLE_CLIENT_ID"));
        Ok(Self {
            api_keys,
            model,
            google_client_id,
        })
    }

    pub fn cloud_sync_available(&self) -> bool {
        self.google_client_id.is_some()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Primary key first, then `_2` .. `_10`, skipping unset or blank values.
pub fn collect_api_keys<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut keys = Vec::new();
    if let Some(primary) = non_blank(lookup(PRIMARY_KEY_VAR)) {
        keys.push(primary);
    }
    for suffix in 2..=MAX_FALLBACK_SUFFIX {
        if let Some(key) = non_blank(lookup(&format!("{}_{}", PRIMARY_KEY_VAR, suffix))) {
            keys.push(key);
        }
    }
    keys
}

/// Load `.env` from the working directory and, if given, from the app data dir
/// so packaged installs can keep credentials next to the database.
pub fn load_env(app_data_dir: Option<&Path>) {
    let _ = dotenvy::dotenv();
    if let Some(dir) = app_data_dir {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
    }
}

/// Data directory used when no desktop shell supplies one.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pharma-receipt")
}

pub fn default_database_path() -> PathBuf {
    default_data_dir().join(DATABASE_FILE)
}

pub fn default_log_filter() -> &'static str {
    "pharma_receipt_lib=info,scan_invoice=info,warn"
}
