//! Runtime configuration.
//!
//! Every setting has a default suitable for a single-user local install and
//! can be overridden through the environment (a `.env` file is loaded by
//! `main` before this runs).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_BIND: &str = "127.0.0.1:5004";
pub const DB_PATH: &str = ".papershelf_db";
pub const LIBRARY_DIR: &str = "MyPapers";
pub const UPLOADS_DIR: &str = "uploads";
pub const FRONTEND_DIR: &str = "frontend/dist";

pub const CROSSREF_API_URL: &str = "https://api.crossref.org";
pub const ZOTERO_API_URL: &str = "https://api.zotero.org";
pub const OLLAMA_URL: &str = "http://localhost:11434";
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

pub const AUTOSAVE_DEBOUNCE_MS: u64 = 1000;

/// Upload limits in bytes.
pub const MAX_PDF_BYTES: usize = 50 * 1024 * 1024;
pub const MAX_COVER_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_NOTE_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub library_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub crossref_url: String,
    pub zotero_url: String,
    pub ollama_url: String,
    pub groq_url: String,
    pub autosave_debounce: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5004)),
            db_path: PathBuf::from(DB_PATH),
            library_dir: PathBuf::from(LIBRARY_DIR),
            uploads_dir: PathBuf::from(UPLOADS_DIR),
            frontend_dir: PathBuf::from(FRONTEND_DIR),
            crossref_url: CROSSREF_API_URL.to_string(),
            zotero_url: ZOTERO_API_URL.to_string(),
            ollama_url: OLLAMA_URL.to_string(),
            groq_url: GROQ_API_URL.to_string(),
            autosave_debounce: Duration::from_millis(AUTOSAVE_DEBOUNCE_MS),
        }
    }
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unset or blank
    /// keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(bind) = get("PAPERSHELF_BIND") {
            config.bind = bind
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid PAPERSHELF_BIND: {}", bind)))?;
        }
        if let Some(path) = get("PAPERSHELF_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = get("PAPERSHELF_LIBRARY_DIR") {
            config.library_dir = PathBuf::from(path);
        }
        if let Some(path) = get("PAPERSHELF_UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(path);
        }
        if let Some(path) = get("PAPERSHELF_FRONTEND_DIR") {
            config.frontend_dir = PathBuf::from(path);
        }
        if let Some(url) = get("CROSSREF_API_URL") {
            config.crossref_url = trim_base_url(&url);
        }
        if let Some(url) = get("ZOTERO_API_URL") {
            config.zotero_url = trim_base_url(&url);
        }
        if let Some(url) = get("OLLAMA_URL") {
            config.ollama_url = trim_base_url(&url);
        }
        if let Some(url) = get("GROQ_API_URL") {
            config.groq_url = trim_base_url(&url);
        }
        if let Some(ms) = get("AUTOSAVE_DEBOUNCE_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                AppError::Validation(format!("Invalid AUTOSAVE_DEBOUNCE_MS: {}", ms))
            })?;
            config.autosave_debounce = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Configuration rooted in a scratch directory, used by tests.
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            db_path: root.join("db"),
            library_dir: root.join(LIBRARY_DIR),
            uploads_dir: root.join(UPLOADS_DIR),
            frontend_dir: root.join("frontend"),
            autosave_debounce: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

pub fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.crossref_url, CROSSREF_API_URL);
        assert_eq!(config.autosave_debounce, Duration::from_millis(1000));
        assert_eq!(config.library_dir, PathBuf::from(LIBRARY_DIR));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("PAPERSHELF_BIND", "0.0.0.0:8080"),
            ("OLLAMA_URL", "http://gpu-box:11434/"),
            ("AUTOSAVE_DEBOUNCE_MS", "250"),
            ("PAPERSHELF_LIBRARY_DIR", "/data/papers"),
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.autosave_debounce, Duration::from_millis(250));
        assert_eq!(config.library_dir, PathBuf::from("/data/papers"));
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[("ZOTERO_API_URL", "   ")])).unwrap();
        assert_eq!(config.zotero_url, ZOTERO_API_URL);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("PAPERSHELF_BIND", "nope")])).is_err());
        assert!(
            AppConfig::from_lookup(lookup_from(&[("AUTOSAVE_DEBOUNCE_MS", "soon")])).is_err()
        );
    }
}
