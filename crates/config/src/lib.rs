use std::path::PathBuf;
use serde::Deserialize;

/// All configuration for the billet service.
///
/// Precedence (lowest to highest): defaults → config file → env var → CLI arg.
/// CLI arg merging is done by the caller after `Config::load()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // Database
    pub db_url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,

    // Server
    pub port: u16,
    pub cors_origin: Option<String>,

    // Logging
    pub log_level: String,
    pub utc: bool,
}

/// Config file layout (~/.billet/config.toml). All fields optional; they layer
/// on top of compiled-in defaults.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    db_url: Option<String>,
    max_connections: Option<u32>,
    busy_timeout_ms: Option<u64>,
    port: Option<u16>,
    cors_origin: Option<String>,
    log_level: Option<String>,
    utc: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: "sqlite:billet.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            port: 3000,
            cors_origin: None,
            log_level: "info".to_string(),
            utc: false,
        }
    }
}

impl Config {
    /// Config directory: ~/.billet/
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".billet")
    }

    /// Config file path: ~/.billet/config.toml
    pub fn file_path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load config: defaults → config file → env vars.
    /// CLI args should be merged by the caller afterward.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Layer 2: config file
        if let Ok(contents) = std::fs::read_to_string(Self::file_path()) {
            if let Ok(file) = toml::from_str::<FileConfig>(&contents) {
                config.apply_file(file);
            }
        }

        // Layer 3: environment variables
        config.apply_env(|key| std::env::var(key).ok());

        config
    }

    // --- Private helpers ---

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.db_url { self.db_url = v; }
        if let Some(v) = file.max_connections { self.max_connections = v; }
        if let Some(v) = file.busy_timeout_ms { self.busy_timeout_ms = v; }
        if let Some(v) = file.port { self.port = v; }
        if let Some(v) = file.cors_origin { self.cors_origin = Some(v); }
        if let Some(v) = file.log_level { self.log_level = v; }
        if let Some(v) = file.utc { self.utc = v; }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("BILLET_DB_URL") { self.db_url = v; }
        if let Some(v) = var("BILLET_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() { self.max_connections = n; }
        }
        if let Some(v) = var("BILLET_BUSY_TIMEOUT_MS") {
            if let Ok(n) = v.parse() { self.busy_timeout_ms = n; }
        }
        if let Some(v) = var("BILLET_PORT") {
            if let Ok(p) = v.parse() { self.port = p; }
        }
        if let Some(v) = var("BILLET_CORS_ORIGIN") { self.cors_origin = Some(v); }
        if let Some(v) = var("BILLET_LOG_LEVEL") { self.log_level = v; }
        if let Some(v) = var("BILLET_UTC") {
            self.utc = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn file_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            db_url = "sqlite:/var/lib/billet/billet.db"
            port = 8080
            utc = true
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        config.apply_file(file);

        assert_eq!(config.db_url, "sqlite:/var/lib/billet/billet.db");
        assert_eq!(config.port, 8080);
        assert!(config.utc);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::default();
        config.apply_file(FileConfig {
            port: Some(8080),
            log_level: Some("warn".into()),
            ..FileConfig::default()
        });

        let env: HashMap<&str, &str> = HashMap::from([
            ("BILLET_PORT", "9090"),
            ("BILLET_BUSY_TIMEOUT_MS", "250"),
            ("BILLET_UTC", "TRUE"),
        ]);
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.port, 9090);
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(config.utc);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "BILLET_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.port, 3000);
    }
}
