//! Configuration loader for Palaver.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`PalaverConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::Path;

use palaver_types::config::PalaverConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`PalaverConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_config(data_dir: &Path) -> PalaverConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return PalaverConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return PalaverConfig::default();
        }
    };

    match toml::from_str::<PalaverConfig>(&content) {
        Ok(config) => {
            tracing::info!(
                path = %config_path.display(),
                providers = config.providers.len(),
                models = config.models.len(),
                agents = config.agents.len(),
                "Loaded configuration"
            );
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            PalaverConfig::default()
        }
    }
}
