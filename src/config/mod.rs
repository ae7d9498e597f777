pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::protocol::app::{AppInfo, ModelInfo, VendorInfo};
use crate::protocol::canonical::VendorId;

/// Environment variable naming the config file to load.
pub const CONFIG_PATH_ENV: &str = "MUGIN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Project whose key decides whether a vendor is enabled.
pub const DEFAULT_PROJECT: &str = "DEFAULT";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_body_size_limit_bytes")]
    pub body_size_limit_bytes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_body_size_limit_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            base_path: String::new(),
            body_size_limit_bytes: default_body_size_limit_bytes(),
            runtime_worker_threads: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
}

fn default_app_name() -> String {
    "Mugin".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

/// One vendor: where it lives, which projects hold API keys, which models
/// can be chatted with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    /// Project name to API key.
    #[serde(default)]
    pub projects: BTreeMap<String, String>,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

impl VendorConfig {
    fn with_defaults(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            projects: BTreeMap::new(),
            models: Vec::new(),
        }
    }

    /// A vendor is usable once its default project has a key.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.api_key(DEFAULT_PROJECT).is_some()
    }

    #[must_use]
    pub fn api_key(&self, project: &str) -> Option<&str> {
        self.projects
            .get(project)
            .map(String::as_str)
            .filter(|key| !key.trim().is_empty())
    }

    #[must_use]
    pub fn model(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|model| model.id == model_id)
    }
}

fn default_mistral() -> VendorConfig {
    VendorConfig::with_defaults("Mistral", "https://api.mistral.ai/v1")
}
fn default_openai() -> VendorConfig {
    VendorConfig::with_defaults("OpenAI", "https://api.openai.com/v1")
}
fn default_ollama() -> VendorConfig {
    VendorConfig::with_defaults("Ollama", "http://localhost:11434")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorsConfig {
    #[serde(default = "default_mistral")]
    pub mistral: VendorConfig,
    #[serde(default = "default_openai")]
    pub openai: VendorConfig,
    #[serde(default = "default_ollama")]
    pub ollama: VendorConfig,
}

impl Default for VendorsConfig {
    fn default() -> Self {
        Self {
            mistral: default_mistral(),
            openai: default_openai(),
            ollama: default_ollama(),
        }
    }
}

impl VendorsConfig {
    #[must_use]
    pub fn get(&self, vendor: VendorId) -> &VendorConfig {
        match vendor {
            VendorId::Mistral => &self.mistral,
            VendorId::OpenAi => &self.openai,
            VendorId::Ollama => &self.ollama,
        }
    }

    fn get_mut(&mut self, vendor: VendorId) -> &mut VendorConfig {
        match vendor {
            VendorId::Mistral => &mut self.mistral,
            VendorId::OpenAi => &mut self.openai,
            VendorId::Ollama => &mut self.ollama,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub vendors: VendorsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl AppConfig {
    /// Public summary served to chat clients. API keys are never included.
    #[must_use]
    pub fn app_info(&self) -> AppInfo {
        let vendors = VendorId::ALL
            .into_iter()
            .map(|vendor| {
                let cfg = self.vendors.get(vendor);
                let info = VendorInfo {
                    name: cfg.name.clone(),
                    enabled: cfg.enabled(),
                    projects: cfg.projects.keys().cloned().collect(),
                    models: cfg.models.clone(),
                };
                (vendor, info)
            })
            .collect();
        AppInfo {
            name: self.app.name.clone(),
            body_size_limit_bytes: self.server.body_size_limit_bytes,
            vendors,
        }
    }

    /// Merge project keys given as `<VENDOR>_API_KEY_PROJECT_<PROJECT>`
    /// variables. Variables override keys from the file.
    pub fn apply_env_keys<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            for vendor in VendorId::ALL {
                let prefix = format!("{}_API_KEY_PROJECT_", vendor.as_str());
                if let Some(project) = name.strip_prefix(&prefix) {
                    if !project.is_empty() && !value.trim().is_empty() {
                        self.vendors
                            .get_mut(vendor)
                            .projects
                            .insert(project.to_string(), value.clone());
                    }
                }
            }
        }
    }
}

/// Path of the config file: `$MUGIN_CONFIG`, else `config.yaml`.
#[must_use]
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration from a YAML file, merge environment keys and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let mut config: AppConfig = serde_yaml::from_str(&contents)?;
    config.apply_env_keys(std::env::vars());
    validate_config(&config)?;
    Ok(config)
}
