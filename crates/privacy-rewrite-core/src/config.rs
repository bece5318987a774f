//! Configuration management for privacy-rewrite

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub llm: LlmConfig,
    pub rewrite: RewriteConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub name_heuristic: bool,
    #[serde(default)]
    pub extra_name_denylist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    pub endpoint: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub prompt_template: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            name_heuristic: true,
            extra_name_denylist: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "llama3.2:3b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            timeout_seconds: 60,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        // Low temperature keeps the model close to the placeholder instructions
        Self {
            temperature: 0.3,
            max_output_tokens: 2000,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_output_tokens: 1000,
            prompt_template: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            llm: LlmConfig::default(),
            rewrite: RewriteConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "privacy-rewrite", "privacy-rewrite")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("privacy-rewrite.toml"))
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (section, temperature) in [
            ("rewrite", self.rewrite.temperature),
            ("scan", self.scan.temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow::anyhow!(
                    "[{}] temperature must be between 0.0 and 2.0, got {}",
                    section,
                    temperature
                ));
            }
        }

        if self.rewrite.max_output_tokens == 0 || self.scan.max_output_tokens == 0 {
            return Err(anyhow::anyhow!("max_output_tokens must be greater than zero"));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("[llm] timeout_seconds must be greater than zero"));
        }

        if self.llm.enabled {
            if self.llm.endpoint.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "[llm] endpoint must be set when the backend is enabled"
                ));
            }
            if self.llm.model.trim().is_empty() {
                return Err(anyhow::anyhow!("[llm] model must be set when the backend is enabled"));
            }
        }

        Ok(())
    }
}
