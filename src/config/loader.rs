//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/chainsift/config.toml)
//! 3. Project config (.chainsift/config.toml)
//! 4. Environment variables (CHAINSIFT_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{ChainsiftError, Result};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. CHAINSIFT_PRICING__REFRESH_INTERVAL_SECS -> pricing.refresh_interval_secs
        figment = figment.merge(Env::prefixed("CHAINSIFT_").split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| ChainsiftError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ChainsiftError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/chainsift/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("chainsift"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".chainsift/config.toml")
    }

    /// Render the effective configuration as JSON or TOML
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| ChainsiftError::Config(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, "1.0");
        assert_eq!(config.resolver.context_capacity_ratio, 0.8);
        assert_eq!(config.discovery.max_depth, 3);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pricing]
refresh_interval_secs = 60
refresh_cooldown_secs = 5

[discovery]
max_pages = 25

[[chains.tiers.pro]]
provider = "anthropic"
model = "claude-3-5-sonnet-latest"
max_output_tokens = 8192
"#
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.pricing.refresh_interval_secs, 60);
        assert_eq!(config.pricing.refresh_cooldown(), Duration::from_secs(5));
        assert_eq!(config.discovery.max_pages, 25);

        let pro = &config.chains.tiers["pro"];
        assert_eq!(pro.len(), 1);
        assert_eq!(pro[0].model, "claude-3-5-sonnet-latest");
        assert_eq!(pro[0].max_output_tokens, Some(8192));
        // Untouched defaults survive the merge
        assert!(config.chains.tiers.contains_key("free"));
    }

    #[test]
    fn test_load_from_file_rejects_invalid_ratio() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[resolver]\ncontext_capacity_ratio = 1.5").unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ChainsiftError::Config(_)));
    }

    #[test]
    fn test_render_round_trips_through_toml() {
        let config = Config::default();
        let rendered = ConfigLoader::render(&config, false).unwrap();
        assert!(rendered.contains("[pricing]"));

        let json = ConfigLoader::render(&config, true).unwrap();
        assert!(json.contains("\"refresh_interval_secs\": 3600"));
    }
}
