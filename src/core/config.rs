use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_remote_base_url")]
    pub base_url: String,

    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    pub api_key: Option<String>,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_debounce_draft_ms")]
    pub debounce_draft_ms: u64,

    #[serde(default = "default_debounce_review_ms")]
    pub debounce_review_ms: u64,

    #[serde(default = "default_debounce_final_ms")]
    pub debounce_final_ms: u64,

    #[serde(default = "default_max_save_attempts")]
    pub max_save_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    #[serde(default = "default_pause_cooldown_ms")]
    pub pause_cooldown_ms: u64,

    #[serde(default = "default_final_states")]
    pub final_states: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_backup_root")]
    pub root: String,
}

fn default_provider() -> String {
    "http".to_string()
}
fn default_remote_base_url() -> String {
    "http://localhost:3000/api".to_string()
}
fn default_generator_base_url() -> String {
    "http://localhost:3000/api".to_string()
}
fn default_max_concurrency() -> usize {
    5
}
fn default_debounce_draft_ms() -> u64 {
    1000
}
fn default_debounce_review_ms() -> u64 {
    2500
}
fn default_debounce_final_ms() -> u64 {
    6000
}
fn default_max_save_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_jitter_ms() -> u64 {
    250
}
fn default_pause_cooldown_ms() -> u64 {
    5000
}
fn default_final_states() -> Vec<String> {
    vec![crate::core::state::STATUS_COMPLETED.to_string()]
}
fn default_backup_root() -> String {
    ".storyforge/backups".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            provider: default_provider(),
            base_url: default_remote_base_url(),
            api_key: None,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            provider: default_provider(),
            base_url: default_generator_base_url(),
            api_key: None,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            debounce_draft_ms: default_debounce_draft_ms(),
            debounce_review_ms: default_debounce_review_ms(),
            debounce_final_ms: default_debounce_final_ms(),
            max_save_attempts: default_max_save_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            pause_cooldown_ms: default_pause_cooldown_ms(),
            final_states: default_final_states(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            root: default_backup_root(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            log::info!("Created default config at {}", path.display());
            return Ok(config);
        }
        Config::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
