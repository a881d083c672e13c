//! Bot entry point: loads settings, checks prerequisites, then runs the chat
//! transport and the download list endpoint side by side.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use audiograb::{
    config::{DEFAULT_ENV_FILE, Settings},
    extractor::YtDlp,
    http,
    pipeline::{Pipeline, PipelineOptions},
    security,
    storage::Storage,
    telegram::{self, UpdateSource},
    telemetry,
};
use clap::Parser;
use teloxide::Bot;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "audiograb", about = "Telegram bot that extracts audio from media links")]
struct Args {
    /// Env file read outside production.
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// Overrides DOWNLOAD_DIR.
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Overrides PORT for the download list endpoint.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::load(&args.env_file)?;
    if let Some(dir) = args.download_dir {
        settings.download_dir = dir;
    }
    if let Some(port) = args.port {
        settings.http_port = port;
    }

    telemetry::init_logging(settings.log_format)?;
    security::ensure_not_root("audiograb")?;
    info!(?settings, "starting");

    let tool = YtDlp::new(
        &settings.ytdl_bin,
        &settings.audio_format,
        settings.extract_timeout,
    );
    let version = tool
        .ensure_available()
        .await
        .context("checking extraction tool")?;
    info!(version, program = %settings.ytdl_bin.display(), "extraction tool available");

    if settings.allowed_users.is_empty() {
        warn!("ALLOWED_USERS is empty; every chat update will be ignored");
    }

    let storage = Storage::open(&settings.download_dir)
        .with_context(|| format!("opening {}", settings.download_dir.display()))?;
    let audio_format = tool.audio_format().to_owned();
    let pipeline = Pipeline::new(
        storage.clone(),
        Arc::new(tool),
        audio_format,
        PipelineOptions {
            max_concurrent_downloads: settings.max_concurrent_downloads,
            choice_ttl: settings.choice_ttl,
        },
    );

    let source = if settings.production {
        UpdateSource::Webhook {
            addr: settings.webhook_addr(),
            url: settings
                .webhook_url()
                .context("URL must be set in production")?,
        }
    } else {
        UpdateSource::Polling
    };

    let bot = Bot::new(&settings.bot_token);
    tokio::try_join!(
        http::serve(settings.http_addr(), storage),
        telegram::run(bot, pipeline, settings.allowed_users.clone(), source),
    )?;

    info!("shut down");
    Ok(())
}
