use clap::{Parser, Subcommand};
use portfolio_sync::config::{self, Config};
use portfolio_sync::imaging::RustBackend;
use portfolio_sync::ledger::Ledger;
use portfolio_sync::pipeline::{self, SyncContext};
use portfolio_sync::{download, output};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfolio-sync")]
#[command(about = "Sync a Notion photo catalog to an object store")]
#[command(long_about = "\
Sync a Notion photo catalog to an object store

Reads every album of the configured Notion database, compresses each image
to the size budget, uploads it and writes two files:

  data/processed_images.json   # Ledger: every uploaded image, by source URL
  data/albums.json             # Published Series → Album → images document

Images already in the ledger are reused, so repeated runs only upload what
is new. Use --force (or FORCE_UPDATE=true) to reprocess everything.

Settings come from portfolio-sync.toml and the environment (NOTION_API_KEY,
NOTION_DATABASE_ID, OSS_BUCKET, OSS_REGION, OSS_ACCESS_KEY_ID,
OSS_ACCESS_KEY_SECRET, OSS_CDN_DOMAIN, OSS_PREFIX, OSS_ENDPOINT).

Run 'portfolio-sync gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./portfolio-sync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process new images and publish the album document
    Sync {
        /// Reprocess images already in the ledger
        #[arg(long)]
        force: bool,
        /// Only sync the album with this page id
        #[arg(long)]
        album: Option<String>,
    },
    /// Show what a sync would process, without downloading or uploading
    Plan {
        /// Only plan the album with this page id
        #[arg(long)]
        album: Option<String>,
    },
    /// Print a stock portfolio-sync.toml with all options documented
    GenConfig,
}

/// Exit code for a run stopped by its timeout after saving its progress.
const EXIT_CANCELLED: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = config::load_config(cli.config.as_deref(), std::env::vars())?;
    let client = download::build_client(config.http.timeout(), &config.http.user_agent)?;

    match cli.command {
        Command::Sync { force, album } => {
            if force {
                config.sync.force = true;
            }
            sync(&config, client, album)
        }
        Command::Plan { album } => {
            let source = config.catalog(client)?;
            let options = config.sync_options(album);
            let ledger = Ledger::load(&options.ledger_path);
            let plans = pipeline::plan(&source, &ledger, &options)?;
            output::print_plan(&plans);
            Ok(ExitCode::SUCCESS)
        }
        Command::GenConfig => Ok(ExitCode::SUCCESS),
    }
}

fn sync(
    config: &Config,
    client: reqwest::blocking::Client,
    album: Option<String>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_thread_pool(&config.processing);

    let source = config.catalog(client.clone())?;
    let downloader = config.downloader(client.clone());
    let uploader = config.uploader(client)?;
    let backend = RustBackend::new();
    let ctx = SyncContext {
        source: &source,
        downloader: &downloader,
        backend: &backend,
        uploader: &uploader,
        params: config.compression.params(),
        options: config.sync_options(album),
        cancel: config.cancel_token(),
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_sync_event(&event) {
                println!("{}", line);
            }
        }
    });
    let result = pipeline::run(&ctx, Some(tx));
    if printer.join().is_err() {
        tracing::warn!("progress printer panicked");
    }

    let report = result?;
    output::print_sync_summary(&report);
    if report.cancelled {
        Ok(ExitCode::from(EXIT_CANCELLED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Log to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "portfolio_sync=debug"
    } else {
        "portfolio_sync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
