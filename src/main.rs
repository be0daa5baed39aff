use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use media_hoarder::catalog::{AssetResolver, HttpCatalogClient};
use media_hoarder::config::{AppConfig, CliConfig, FileConfig};
use media_hoarder::files::FileLayout;
use media_hoarder::mirror::models::RunSummary;
use media_hoarder::mirror::{
    CorrectionLedger, DownloadOrchestrator, FfprobeProbe, IntegrityVerifier, MemoryBudget,
    MirrorProcessor, RepairManager, RepairStatus, RequestPacer, RetryPolicy,
};
use tokio_util::sync::CancellationToken;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(name = "media-hoarder", version, about = "Mirror creator media with integrity checks")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Root directory the mirror is written under.
    #[clap(long, value_parser = parse_path)]
    pub output_dir: Option<PathBuf>,

    /// API key for authenticated catalog listings.
    #[clap(long)]
    pub api_key: Option<String>,

    /// Number of concurrent downloads.
    #[clap(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Minimum milliseconds between request starts, shared across workers.
    /// Set to 0 to disable pacing.
    #[clap(long, default_value_t = 250)]
    pub rate_limit_ms: u64,

    /// Cap in megabytes on the advertised size of bodies in flight at once.
    #[clap(long, default_value_t = 2048)]
    pub memory_budget_mb: u64,

    /// Retries per asset after the initial attempt.
    #[clap(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Fixed backoff in seconds between retry attempts.
    #[clap(long, default_value_t = 2)]
    pub retry_backoff_sec: u64,

    /// Per-request timeout in seconds.
    #[clap(long, default_value_t = 300)]
    pub timeout_sec: u64,

    /// Creator to mirror; repeatable. Merged with the config file's list.
    #[clap(long = "creator")]
    pub creators: Vec<String>,

    /// Write each creator's raw catalog listing next to their media.
    #[clap(long)]
    pub save_metadata: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror new media for every configured creator.
    Update,
    /// Verify files already on disk and rebuild the corrupt-media report.
    Verify,
    /// Re-download files listed in the corrupt-media report.
    Repair {
        /// List what would be repaired without downloading anything.
        #[clap(long)]
        dry_run: bool,
        /// Proceed without the confirmation prompt.
        #[clap(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        output_dir: cli_args.output_dir.clone(),
        api_key: cli_args.api_key.clone(),
        concurrency: cli_args.concurrency,
        rate_limit_ms: cli_args.rate_limit_ms,
        memory_budget_mb: cli_args.memory_budget_mb,
        max_retries: cli_args.max_retries,
        retry_backoff_sec: cli_args.retry_backoff_sec,
        timeout_sec: cli_args.timeout_sec,
        creators: cli_args.creators.clone(),
        save_metadata: cli_args.save_metadata,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping new downloads");
                cancel.cancel();
            }
        });
    }

    let layout = FileLayout::new(
        config.output_dir.clone(),
        config.image_extensions.clone(),
        config.video_extensions.clone(),
    );
    let client = Arc::new(
        HttpCatalogClient::new(
            config.api_base.clone(),
            config.api_key.clone(),
            config.timeout_sec,
            config.include_nsfw,
        )
        .map_err(|e| anyhow::anyhow!("failed to build catalog client: {e}"))?,
    );
    let pacer = Arc::new(if config.rate_limit_ms > 0 {
        RequestPacer::new(Duration::from_millis(config.rate_limit_ms))
    } else {
        RequestPacer::disabled()
    });
    let ledger = Arc::new(CorrectionLedger::load(&layout.corrections_report_path())?);
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        client.clone(),
        layout.clone(),
        pacer,
        MemoryBudget::new(config.memory_budget_bytes()),
        RetryPolicy::new(
            config.max_retries,
            Duration::from_secs(config.retry_backoff_sec),
        ),
        ledger.clone(),
        config.concurrency,
    ));
    let verifier = Arc::new(IntegrityVerifier::new(Arc::new(FfprobeProbe::new(
        config.ffprobe_path.clone(),
    ))));

    match cli_args.command {
        Command::Update => {
            let processor = MirrorProcessor::new(
                AssetResolver::with_retries(
                    client,
                    config.max_retries,
                    Duration::from_secs(config.retry_backoff_sec),
                ),
                orchestrator,
                verifier,
                ledger,
                layout,
                config.save_metadata,
            );
            let summary = processor.run(&config.creators, &cancel).await?;
            log_summary(&summary);
        }
        Command::Verify => {
            let processor = MirrorProcessor::new(
                AssetResolver::with_retries(
                    client,
                    config.max_retries,
                    Duration::from_secs(config.retry_backoff_sec),
                ),
                orchestrator,
                verifier,
                ledger,
                layout,
                false,
            );
            let summary = processor.verify_existing(&config.creators).await?;
            log_summary(&summary);
        }
        Command::Repair { dry_run, yes } => {
            let manager = RepairManager::new(orchestrator, verifier, layout);
            let report = manager.load_report()?;
            if report.is_empty() {
                info!("No corrupt media on record, nothing to repair");
                return Ok(());
            }
            let candidates = RepairManager::candidates(&report);
            info!("{} file(s) flagged for repair", candidates.len());
            for candidate in &candidates {
                info!("  {} ({}): {}", candidate.entry.filename, candidate.creator, candidate.entry.reason);
            }
            if dry_run {
                return Ok(());
            }
            if !yes {
                info!("Re-run with --yes to attempt the repairs");
                return Ok(());
            }
            let outcomes = manager.execute(&report, &cancel).await?;
            let repaired = outcomes
                .iter()
                .filter(|o| o.status == RepairStatus::Repaired)
                .count();
            info!("Repaired {}/{} file(s)", repaired, outcomes.len());
        }
    }

    Ok(())
}

fn log_summary(summary: &RunSummary) {
    for creator in &summary.creators {
        info!(
            "{}: {} listed, {} downloaded, {} ignored, {} existing, {} disabled, {} ok, {} corrupt, {} unverified",
            creator.creator,
            creator.listed,
            creator.downloaded,
            creator.skipped_ignored,
            creator.skipped_existing,
            creator.skipped_category_disabled,
            creator.verified_ok,
            creator.corrupt,
            creator.unverified,
        );
        for (asset, reason) in &creator.failures {
            warn!("{}: asset {} failed: {}", creator.creator, asset, reason);
        }
    }
    for (creator, reason) in &summary.creators_failed {
        warn!("Creator '{}' could not be processed: {}", creator, reason);
    }
    info!(
        "Run complete: {} downloaded, {} failed, {} corrupt, {} unverified",
        summary.total_downloaded(),
        summary.total_failures(),
        summary.total_corrupt(),
        summary.total_unverified(),
    );
}
