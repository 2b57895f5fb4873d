//! Server Configuration
//!
//! This module resolves which configuration file the server runs with.

use metric_store::Config;
use std::path::Path;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "METRIC_STORE_CONFIG";

/// Configuration file looked up in the working directory
pub const LOCAL_CONFIG: &str = "metric-store.toml";

/// Load configuration from file or environment
///
/// Priority:
/// 1. `--config` argument
/// 2. `METRIC_STORE_CONFIG` environment variable
/// 3. `./metric-store.toml`
/// 4. Default configuration
///
/// `METRIC_STORE_*` overrides apply in every case.
pub fn load_config(cli_path: Option<&Path>) -> Config {
    let explicit = cli_path
        .map(|p| p.to_string_lossy().into_owned())
        .or_else(|| std::env::var(CONFIG_ENV).ok());

    if let Some(path) = explicit {
        match Config::from_file_with_env(&path) {
            Ok(config) => {
                eprintln!("[config] Loaded configuration from: {}", path);
                return config;
            },
            Err(e) => {
                eprintln!("[config] {}. Trying {}.", e, LOCAL_CONFIG);
            },
        }
    }

    if Path::new(LOCAL_CONFIG).exists() {
        match Config::from_file_with_env(LOCAL_CONFIG) {
            Ok(config) => {
                eprintln!("[config] Loaded configuration from {}", LOCAL_CONFIG);
                return config;
            },
            Err(e) => {
                eprintln!("[config] {}. Using defaults.", e);
            },
        }
    }

    eprintln!("[config] Using default configuration");
    Config::from_env()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[catalog]\ndefault_retention_days = 3").unwrap();

        let config = load_config(Some(file.path()));
        assert_eq!(config.catalog.default_retention_days, 3);
    }

    #[test]
    fn test_unreadable_path_falls_back() {
        let config = load_config(Some(Path::new("/nonexistent/metric-store.toml")));
        assert_eq!(config.catalog.default_retention_days, 30);
    }
}
