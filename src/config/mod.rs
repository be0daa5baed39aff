mod file_config;

pub use file_config::{CreatorConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::mirror::orchestrator::CategorySelection;
use crate::mirror::processor::CreatorProfile;

const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".heic"];
const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".avi"];

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub output_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub concurrency: usize,
    pub rate_limit_ms: u64,
    pub memory_budget_mb: u64,
    pub max_retries: u32,
    pub retry_backoff_sec: u64,
    pub timeout_sec: u64,
    pub creators: Vec<String>,
    pub save_metadata: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            api_key: None,
            concurrency: 4,
            rate_limit_ms: 250,
            memory_budget_mb: 2048,
            max_retries: 3,
            retry_backoff_sec: 2,
            timeout_sec: 300,
            creators: Vec::new(),
            save_metadata: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    pub api_base: String,
    pub api_key: Option<String>,
    pub concurrency: usize,
    pub rate_limit_ms: u64,
    pub memory_budget_mb: u64,
    pub max_retries: u32,
    pub retry_backoff_sec: u64,
    pub timeout_sec: u64,
    pub save_metadata: bool,
    pub include_nsfw: bool,
    pub ffprobe_path: String,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub creators: Vec<CreatorProfile>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("output_dir must be specified via --output-dir or in config file")
            })?;

        let api_base = file
            .api_base
            .unwrap_or_else(|| crate::catalog::client::DEFAULT_API_BASE.to_string());
        let api_key = file.api_key.or_else(|| cli.api_key.clone());

        let concurrency = file.concurrency.unwrap_or(cli.concurrency);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        let rate_limit_ms = file.rate_limit_ms.unwrap_or(cli.rate_limit_ms);
        let memory_budget_mb = file.memory_budget_mb.unwrap_or(cli.memory_budget_mb);
        if memory_budget_mb == 0 {
            bail!("memory_budget_mb must be at least 1");
        }
        let max_retries = file.max_retries.unwrap_or(cli.max_retries);
        let retry_backoff_sec = file.retry_backoff_sec.unwrap_or(cli.retry_backoff_sec);
        let timeout_sec = file.timeout_sec.unwrap_or(cli.timeout_sec);
        let save_metadata = file.save_metadata.unwrap_or(cli.save_metadata);
        let include_nsfw = file.include_nsfw.unwrap_or(true);
        let ffprobe_path = file.ffprobe_path.unwrap_or_else(|| "ffprobe".to_string());

        let image_extensions = normalise_extensions(
            file.image_extensions
                .unwrap_or_else(|| default_extensions(DEFAULT_IMAGE_EXTENSIONS)),
        );
        let video_extensions = normalise_extensions(
            file.video_extensions
                .unwrap_or_else(|| default_extensions(DEFAULT_VIDEO_EXTENSIONS)),
        );

        // Creators come from the TOML table and the CLI list; a name given
        // on the CLI without a TOML entry mirrors every category.
        let mut creators: Vec<CreatorProfile> = file
            .creators
            .unwrap_or_default()
            .into_iter()
            .map(|c| CreatorProfile {
                name: c.name,
                selection: CategorySelection {
                    images: c.images.unwrap_or(true),
                    videos: c.videos.unwrap_or(true),
                    other: c.other.unwrap_or(true),
                },
            })
            .collect();
        for name in &cli.creators {
            if !creators.iter().any(|c| &c.name == name) {
                creators.push(CreatorProfile {
                    name: name.clone(),
                    selection: CategorySelection::default(),
                });
            }
        }
        if creators.is_empty() {
            bail!("at least one creator must be specified via --creator or in config file");
        }

        Ok(Self {
            output_dir,
            api_base,
            api_key,
            concurrency,
            rate_limit_ms,
            memory_budget_mb,
            max_retries,
            retry_backoff_sec,
            timeout_sec,
            save_metadata,
            include_nsfw,
            ffprobe_path,
            image_extensions,
            video_extensions,
            creators,
        })
    }

    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb * 1024 * 1024
    }
}

fn default_extensions(defaults: &[&str]) -> Vec<String> {
    defaults.iter().map(|e| e.to_string()).collect()
}

/// Lowercase and ensure a leading dot on every configured extension.
fn normalise_extensions(extensions: Vec<String>) -> Vec<String> {
    extensions
        .into_iter()
        .map(|e| {
            let e = e.to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect()
}
