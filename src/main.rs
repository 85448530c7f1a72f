use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lumos_media::remote::{MemoryRemote, RemoteBackend};
use lumos_media::{CleanupOptions, LogRecord, MediaConfig, MediaService, Variant};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LumosTime media store: thumbnails, cleanup and remote sync",
    after_help = "Examples:\n  lumos-media save photo.jpg\n  lumos-media check --logs logs.json\n  lumos-media sync --logs logs.json"
)]
struct Cli {
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)")]
    verbose: u8,
    #[arg(long, help = "Config file (defaults to the platform config dir)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Ignore configured remotes and sync against an in-memory one")]
    offline: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an image file and derive its thumbnail
    Save { path: PathBuf },
    /// Print the URL of a stored image
    Url {
        filename: String,
        #[arg(long)]
        thumbnail: bool,
    },
    /// Delete an image and its thumbnail
    Delete { filename: String },
    /// Report images no log references
    Check(LogsArgs),
    /// Delete images no log references
    Cleanup {
        #[command(flatten)]
        logs: LogsArgs,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, help = "Keep local files")]
        no_local: bool,
        #[arg(long, help = "Keep remote files")]
        no_remote: bool,
    },
    /// Reconcile local images with the remote
    Sync {
        #[command(flatten)]
        logs: LogsArgs,
        #[arg(long, help = "JSON array of cloud-referenced filenames; defaults to the remote manifest")]
        cloud: Option<PathBuf>,
    },
    /// List deletions not yet confirmed by the remote
    Tombstones,
}

#[derive(Args, Debug)]
struct LogsArgs {
    #[arg(long, help = "JSON array of log records with an `images` field")]
    logs: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(MediaConfig::default_path);
    let config = MediaConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let service = if cli.offline {
        let remote: Arc<dyn RemoteBackend> = Arc::new(MemoryRemote::new());
        MediaService::open_with_remote(&config, Some(remote))?
    } else {
        MediaService::open(&config)?
    };

    match cli.command {
        Command::Save { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let filename = service.save_image(bytes).await?;
            println!("✅ Saved as {}", filename);
        }
        Command::Url {
            filename,
            thumbnail,
        } => {
            let variant = if thumbnail {
                Variant::Thumbnail
            } else {
                Variant::Original
            };
            let url = service.get_url(&filename, variant).await;
            if url.is_empty() {
                println!("⚠️  {} is not available", filename);
            } else {
                println!("{}", url);
            }
        }
        Command::Delete { filename } => {
            let outcome = service.delete_image(&filename).await?;
            println!("🗑️  Deleted {} local file(s) for {}", outcome.removed(), filename);
        }
        Command::Check(args) => {
            let logs = read_logs(&args.logs)?;
            print!("{}", service.render_report(&logs).await?);
        }
        Command::Cleanup {
            logs,
            dry_run,
            no_local,
            no_remote,
        } => {
            let logs = read_logs(&logs.logs)?;
            let options = CleanupOptions {
                delete_local: !no_local,
                delete_remote: !no_remote,
                dry_run,
            };
            let result = service.cleanup(&logs, options).await;
            if dry_run {
                println!("🔍 {} file(s) would be deleted:", result.report.total_count);
                for name in &result.report.deletion_set {
                    println!("   {}", name);
                }
            } else {
                println!(
                    "🧹 Deleted {} local and {} remote file(s)",
                    result.deleted_local, result.deleted_remote
                );
            }
            print_errors(&result.errors);
        }
        Command::Sync { logs, cloud } => {
            let logs = read_logs(&logs.logs)?;
            let result = match cloud {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let cloud: Vec<String> = serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    service.sync(&logs, &cloud).await?
                }
                None => service.sync_from_manifest(&logs).await?,
            };
            if !service.has_remote() {
                println!("⚠️  No remote configured, nothing to sync");
            }
            println!(
                "🔄 Uploaded {}, downloaded {}, deleted {} remotely, skipped {}",
                result.uploaded, result.downloaded, result.deleted_remote, result.skipped
            );
            print_errors(&result.errors);
        }
        Command::Tombstones => {
            let pending = service.tombstones().await?;
            if pending.is_empty() {
                println!("No pending deletions");
            }
            for name in pending {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lumos_media={level}")));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn read_logs(path: &Path) -> Result<Vec<LogRecord>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing logs from {}", path.display()))
}

fn print_errors(errors: &[String]) {
    for error in errors {
        eprintln!("❌ {}", error);
    }
}
