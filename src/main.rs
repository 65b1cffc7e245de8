// Entrypoint for the uploader CLI.
// - Keeps `main` small: parse flags, build the log dispatch and run the
//   upload with that dispatch attached.
// - Returns `anyhow::Result` so configuration and top-level path errors end
//   the process with a message; per-file failures are only logged.

use anyhow::{Context, Result};
use clap::Parser;
use drive_uploader::api::absolute_remote_path;
use drive_uploader::size::parse_size;
use drive_uploader::{logging, ApiClient, Config, DirectoryWalker, UploadOptions, Uploader, WalkSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

/// Upload a file or a directory tree to the drive backend.
#[derive(Parser, Debug)]
#[command(name = "uploader", version)]
struct Args {
    /// File or directory path to upload
    #[arg(short, long)]
    path: PathBuf,

    /// Remote directory for uploaded files
    #[arg(short, long)]
    dest: String,

    /// Env file with API_URL, SESSION_TOKEN, PART_SIZE, WORKERS, CHANNEL_ID
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Concurrent part uploads per file (overrides WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Part size such as 500MB (overrides PART_SIZE)
    #[arg(long, value_parser = parse_size)]
    part_size: Option<u64>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (dispatch, _guard) = logging::build(args.log_file.as_deref()).context("Failed to set up logging")?;
    run(args).with_subscriber(dispatch).await
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.env_file.as_deref())
        .and_then(|config| config.with_overrides(args.part_size, args.workers))
        .context("Failed to load configuration")?;
    let api = Arc::new(ApiClient::new(&config).context("Failed to build HTTP client")?);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, letting running parts finish");
                interrupt.cancel();
            }
        }
        .with_current_subscriber(),
    );

    let mut options = UploadOptions::from(&config);
    options.show_progress = !args.no_progress;
    let uploader = Uploader::new(api, options, cancel);

    let dest = absolute_remote_path(&args.dest);
    uploader
        .make_dir(&dest)
        .await
        .with_context(|| format!("Failed to create remote directory {}", dest))?;

    let metadata = tokio::fs::metadata(&args.path)
        .await
        .with_context(|| format!("Cannot access {}", args.path.display()))?;

    if metadata.is_dir() {
        let mut summary = WalkSummary::default();
        if let Err(err) = DirectoryWalker::new(&uploader)
            .walk(&args.path, &dest, &mut summary)
            .await
        {
            error!(path = %args.path.display(), error = %err, "error uploading files");
        }
        println!(
            "{} uploaded, {} skipped, {} failed",
            summary.uploaded, summary.skipped, summary.failed
        );
    } else {
        match uploader.upload_file(&args.path, &dest).await {
            Ok(file) => info!(file = %file.name, parts = file.parts, "file upload finished"),
            Err(err) => error!(path = %args.path.display(), error = %err, "error uploading file"),
        }
    }

    println!("Uploads complete!");
    Ok(())
}
