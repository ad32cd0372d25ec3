//! Configuration structures and loading logic

use crate::runtime::LoadConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    /// Directory holding downloaded artifacts and the registry file
    pub models_dir: PathBuf,
    /// Registry file location; defaults to `<models_dir>/registry.toml`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_file: Option<PathBuf>,
    /// Cap on simultaneously resident models (None = unlimited)
    pub max_resident_models: Option<usize>,
    /// Context window size passed to the inference runtime
    pub context_length: u32,
    /// Generation worker threads (0 = auto-detect)
    pub n_threads: u32,
    /// Layers offloaded to an accelerator (0 = CPU unless Metal)
    pub n_gpu_layers: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            models_dir: default_models_dir(),
            registry_file: None,
            max_resident_models: None,
            context_length: default_context_length(),
            n_threads: 0,
            n_gpu_layers: 0,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("LLM_MANAGER_API_PORT") {
            config.api_port = port.parse().context("Invalid LLM_MANAGER_API_PORT value")?;
        }
        if let Ok(models_dir) = std::env::var("LLM_MANAGER_MODELS_DIR") {
            config.models_dir = PathBuf::from(models_dir);
        }
        if let Ok(ctx) = std::env::var("LLM_MANAGER_CONTEXT_LENGTH") {
            config.context_length = ctx
                .parse()
                .context("Invalid LLM_MANAGER_CONTEXT_LENGTH value")?;
        }
        if let Ok(layers) = std::env::var("LLM_MANAGER_GPU_LAYERS") {
            config.n_gpu_layers = layers
                .parse()
                .context("Invalid LLM_MANAGER_GPU_LAYERS value")?;
        }
        if let Ok(max) = std::env::var("LLM_MANAGER_MAX_RESIDENT") {
            config.max_resident_models = Some(
                max.parse()
                    .context("Invalid LLM_MANAGER_MAX_RESIDENT value")?,
            );
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.context_length == 0 {
            anyhow::bail!("context_length must be positive");
        }

        if self.max_resident_models == Some(0) {
            anyhow::bail!("max_resident_models must be positive when set");
        }

        // Ensure the models directory exists or can be created
        if !self.models_dir.exists() {
            std::fs::create_dir_all(&self.models_dir)
                .with_context(|| format!("Cannot create models directory: {:?}", self.models_dir))?;
        }

        Ok(())
    }

    /// Resolved registry file location
    pub fn registry_file(&self) -> PathBuf {
        self.registry_file
            .clone()
            .unwrap_or_else(|| self.models_dir.join("registry.toml"))
    }

    /// Runtime load parameters derived from this config
    pub fn load_config(&self) -> LoadConfig {
        LoadConfig {
            context_length: self.context_length,
            n_threads: self.n_threads,
            n_gpu_layers: self.n_gpu_layers,
        }
    }
}

// Default functions
fn default_api_port() -> u16 {
    8000
}
fn default_context_length() -> u32 {
    2048
}
fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("llm-manager/models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("LLM_MANAGER_API_PORT");
            std::env::remove_var("LLM_MANAGER_MODELS_DIR");
            std::env::remove_var("LLM_MANAGER_CONTEXT_LENGTH");
            std::env::remove_var("LLM_MANAGER_GPU_LAYERS");
            std::env::remove_var("LLM_MANAGER_MAX_RESIDENT");
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = ManagerConfig::load(None).unwrap();
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.context_length, 2048);
        assert_eq!(config.n_threads, 0);
        assert!(config.max_resident_models.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("LLM_MANAGER_API_PORT", "9100");
            std::env::set_var("LLM_MANAGER_CONTEXT_LENGTH", "4096");
        }
        let config = ManagerConfig::load(None).unwrap();
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.context_length, 4096);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_rejected() {
        clear_env();
        unsafe {
            std::env::set_var("LLM_MANAGER_API_PORT", "not-a-port");
        }
        assert!(ManagerConfig::load(None).is_err());
        clear_env();
    }

    #[test]
    fn test_port_validation() {
        let config = ManagerConfig {
            api_port: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_context_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            context_length: 0,
            models_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_file_defaults_into_models_dir() {
        let config = ManagerConfig {
            models_dir: PathBuf::from("/data/models"),
            ..Default::default()
        };
        assert_eq!(
            config.registry_file(),
            PathBuf::from("/data/models/registry.toml")
        );

        let explicit = ManagerConfig {
            registry_file: Some(PathBuf::from("/etc/llm/registry.toml")),
            ..config
        };
        assert_eq!(
            explicit.registry_file(),
            PathBuf::from("/etc/llm/registry.toml")
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ManagerConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: ManagerConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.api_port, config.api_port);
        assert_eq!(parsed.models_dir, config.models_dir);
    }
}
