use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub output_dir: Option<String>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub concurrency: Option<usize>,
    pub rate_limit_ms: Option<u64>,
    pub memory_budget_mb: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_sec: Option<u64>,
    pub timeout_sec: Option<u64>,
    pub save_metadata: Option<bool>,
    pub include_nsfw: Option<bool>,
    pub ffprobe_path: Option<String>,

    // Extension lists used for declared-category inclusion checks
    pub image_extensions: Option<Vec<String>>,
    pub video_extensions: Option<Vec<String>>,

    // Creators to mirror
    pub creators: Option<Vec<CreatorConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CreatorConfig {
    pub name: String,
    pub images: Option<bool>,
    pub videos: Option<bool>,
    pub other: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
