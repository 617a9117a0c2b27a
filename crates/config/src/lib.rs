use std::path::{Path, PathBuf};
use serde::Deserialize;

/// All configuration for the box office service.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub db_url: String,

    // Server
    pub port: u16,

    // Logging
    pub log_level: String,
    pub utc: bool,

    // Auth
    pub jwt_secret: String,
    pub token_ttl_hours: u64,

    // Cache: "memory", "none", or a redis:// URL
    pub cache_url: String,
    pub cache_ttl_secs: u64,

    // Tickets
    pub tickets_dir: PathBuf,
    pub mail_relay_url: Option<String>,
    pub notify_timeout_secs: u64,
    pub notify_retries: u32,
    pub notify_queue_size: usize,
}

/// Config file layout (~/.boxoffice/config.toml). All fields are optional and
/// layer on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_url: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    utc: Option<bool>,
    jwt_secret: Option<String>,
    token_ttl_hours: Option<u64>,
    cache_url: Option<String>,
    cache_ttl_secs: Option<u64>,
    tickets_dir: Option<PathBuf>,
    mail_relay_url: Option<String>,
    notify_timeout_secs: Option<u64>,
    notify_retries: Option<u32>,
    notify_queue_size: Option<usize>,
}

impl Config {
    /// Config directory: ~/.boxoffice/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".boxoffice")
    }

    /// Config file path: ~/.boxoffice/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        Self::load_from(&Self::file_path())
    }

    /// Same as `load`, reading the config file from `path`. A missing or
    /// unparsable file leaves the defaults in place.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Self::defaults();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env();

        config
    }

    // --- Private helpers ---

    fn defaults() -> Self {
        Self {
            db_url: "sqlite:boxoffice.db".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            utc: false,
            jwt_secret: "change-me".to_string(),
            token_ttl_hours: 1,
            cache_url: "memory".to_string(),
            cache_ttl_secs: 900,
            tickets_dir: PathBuf::from("tickets"),
            mail_relay_url: None,
            notify_timeout_secs: 10,
            notify_retries: 2,
            notify_queue_size: 256,
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
        if let Some(v) = file.jwt_secret { self.jwt_secret = v; }
        if let Some(v) = file.token_ttl_hours { self.token_ttl_hours = v; }
        if let Some(v) = file.cache_url { self.cache_url = v; }
        if let Some(v) = file.cache_ttl_secs { self.cache_ttl_secs = v; }
        if let Some(v) = file.tickets_dir { self.tickets_dir = v; }
        if let Some(v) = file.mail_relay_url { self.mail_relay_url = Some(v); }
        if let Some(v) = file.notify_timeout_secs { self.notify_timeout_secs = v; }
        if let Some(v) = file.notify_retries { self.notify_retries = v; }
        if let Some(v) = file.notify_queue_size { self.notify_queue_size = v; }
    }

    fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("BOXOFFICE_DB_URL") { self.db_url = v; }
        if let Some(v) = var("BOXOFFICE_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Some(v) = var("BOXOFFICE_LOG_LEVEL") { self.log_level = v; }
        if let Some(v) = var("BOXOFFICE_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = var("BOXOFFICE_JWT_SECRET") { self.jwt_secret = v; }
        if let Some(v) = var("BOXOFFICE_TOKEN_TTL_HOURS") {
            if let Ok(h) = v.parse() { self.token_ttl_hours = h; }
        }
        if let Some(v) = var("BOXOFFICE_CACHE_URL") { self.cache_url = v; }
        if let Some(v) = var("BOXOFFICE_CACHE_TTL_SECS") {
            if let Ok(s) = v.parse() { self.cache_ttl_secs = s; }
        }
        if let Some(v) = var("BOXOFFICE_TICKETS_DIR") { self.tickets_dir = PathBuf::from(v); }
        if let Some(v) = var("BOXOFFICE_MAIL_RELAY_URL") { self.mail_relay_url = Some(v); }
        if let Some(v) = var("BOXOFFICE_NOTIFY_TIMEOUT_SECS") {
            if let Ok(s) = v.parse() { self.notify_timeout_secs = s; }
        }
        if let Some(v) = var("BOXOFFICE_NOTIFY_RETRIES") {
            if let Ok(n) = v.parse() { self.notify_retries = n; }
        }
        if let Some(v) = var("BOXOFFICE_NOTIFY_QUEUE_SIZE") {
            if let Ok(n) = v.parse() { self.notify_queue_size = n; }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut config = Config::defaults();
        let file: FileConfig = toml::from_str(
            r#"
            port = 8080
            cache_url = "none"
            mail_relay_url = "http://localhost:9000/send"
            notify_retries = 5
            "#,
        )
        .unwrap();
        config.apply_file(file);

        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_url, "none");
        assert_eq!(config.mail_relay_url.as_deref(), Some("http://localhost:9000/send"));
        assert_eq!(config.notify_retries, 5);
        // untouched
        assert_eq!(config.db_url, "sqlite:boxoffice.db");
        assert_eq!(config.cache_ttl_secs, 900);
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/boxoffice.toml"));
        assert_eq!(config.tickets_dir, PathBuf::from("tickets"));
    }

    #[test]
    fn env_values_override_file_values() {
        let mut config = Config::defaults();
        config.apply_file(toml::from_str("notify_queue_size = 32\nport = 8080").unwrap());
        let env = std::collections::HashMap::from([
            ("BOXOFFICE_NOTIFY_QUEUE_SIZE", "1024"),
            ("BOXOFFICE_NOTIFY_RETRIES", "7"),
            ("BOXOFFICE_PORT", "not-a-port"),
        ]);
        config.apply_vars(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.notify_queue_size, 1024);
        assert_eq!(config.notify_retries, 7);
        // unparsable values are ignored
        assert_eq!(config.port, 8080);
    }
}
