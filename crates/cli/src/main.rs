mod config;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use common::AlbumKey;
use config::{config_path_from_env, load_or_create_config, resolve_music_root, resolve_path, RepairConfig};
use library::{
    retry_album_art, search_release_groups, ArtSource, FileOutcome, MusicBrainzClient,
    ProcessingLog, RepairEvent, RepairSession, RepairSummary, Throttle,
};
use metadata::LoftyTagWriter;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tagmend")]
#[command(about = "Repair audio tags, album art and album.nfo sidecars from filenames")]
#[command(version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repair every audio file under a directory (the default)
    Run(RunArgs),
    /// List albums whose last art download failed
    Failed,
    /// Retry album art for one album with a known MusicBrainz release group id
    Retry {
        artist: String,
        album: String,
        release_group_id: String,
    },
    /// Search MusicBrainz release group ids for every failed album
    Search,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Music directory; defaults to `music_root` from the config file
    root: Option<PathBuf>,

    /// Only embed art and collect albums; leave tags alone
    #[arg(long)]
    no_repair: bool,

    /// Skip album art lookups
    #[arg(long)]
    no_art: bool,

    /// Do not generate album.nfo files
    #[arg(long)]
    no_sidecar: bool,

    /// Rename files that do not follow `Artist - Album - NN - Title`
    #[arg(long)]
    fix_filenames: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    let log_path = resolve_path(&config_path, config.log_path.trim());

    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => run_repair(&config, &config_path, log_path, args).await,
        Command::Failed => {
            list_failed(&log_path);
            Ok(())
        }
        Command::Retry {
            artist,
            album,
            release_group_id,
        } => retry(&config, log_path, AlbumKey::new(artist, album), release_group_id).await,
        Command::Search => search(&config, log_path).await,
    }
}

async fn run_repair(
    config: &RepairConfig,
    config_path: &Path,
    log_path: PathBuf,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = args
        .root
        .clone()
        .or_else(|| resolve_music_root(config_path, &config.music_root))
        .ok_or("no music directory given and music_root is not set")?;

    let mut options = config.options();
    if args.no_repair {
        options.repair_metadata = false;
    }
    if args.no_art {
        options.download_art = false;
    }
    if args.no_sidecar {
        options.generate_sidecar = false;
    }
    if args.fix_filenames {
        options.fix_filenames = true;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let (tx, mut rx) = unbounded_channel();
    let art_config = config.art_source();
    let min_interval = config.min_request_interval();

    // The blocking HTTP client must live and die off the async runtime.
    let worker = tokio::task::spawn_blocking(move || -> Result<RepairSummary, String> {
        let client = if options.download_art {
            Some(MusicBrainzClient::new(art_config).map_err(|err| err.to_string())?)
        } else {
            None
        };
        let writer = LoftyTagWriter;
        let mut session = RepairSession::new(
            log_path,
            options,
            &writer,
            client.as_ref().map(|client| client as &dyn ArtSource),
            min_interval,
        );
        session
            .run(&root, &tx, &worker_cancel)
            .map_err(|err| err.to_string())
    });

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut signalled = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => report_event(&event),
                None => break,
            },
            _ = &mut signal, if !signalled => {
                signalled = true;
                warn!("Stopping after the current file");
                cancel.store(true, Ordering::SeqCst);
            }
        }
    }

    let summary = worker.await??;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn report_event(event: &RepairEvent) {
    match event {
        RepairEvent::Progress {
            index,
            total,
            percent,
            file,
        } => info!("[{}/{} {:>3.0}%] {}", index, total, percent, file.display()),
        RepairEvent::FileDone {
            file,
            outcome: FileOutcome::Failed(reason),
        } => warn!("Failed {}: {}", file.display(), reason),
        RepairEvent::FileDone { .. } => {}
        RepairEvent::Renamed { from, to } => {
            info!("Renamed {} -> {}", from.display(), to.display())
        }
        RepairEvent::SidecarWritten { dir } => info!("Wrote album.nfo in {}", dir.display()),
    }
}

fn print_summary(summary: &RepairSummary) {
    if summary.cancelled {
        println!("Cancelled before all files were processed.");
    }
    println!("Total files:      {}", summary.total);
    println!("Repaired:         {}", summary.success);
    println!("Skipped:          {}", summary.skipped);
    println!("Failed:           {}", summary.failed);
    println!("Sidecars written: {}", summary.sidecars_generated);
    println!("Filenames fixed:  {}", summary.filenames_fixed);
    for failure in &summary.failures {
        println!("  {}: {}", failure.path.display(), failure.reason);
    }
}

fn list_failed(log_path: &Path) {
    let log = ProcessingLog::load(log_path);
    let failed = log.failed_albums();
    if failed.is_empty() {
        println!("No failed album art downloads.");
        return;
    }
    for (key, entry) in failed {
        println!(
            "{}\t{}\t{}\t{}",
            key.artist,
            key.album,
            entry.musicbrainz_release_group_id.as_deref().unwrap_or("-"),
            entry.last_downloaded
        );
    }
}

async fn retry(
    config: &RepairConfig,
    log_path: PathBuf,
    key: AlbumKey,
    release_group_id: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let art_config = config.art_source();
    let found = tokio::task::spawn_blocking(move || -> Result<bool, String> {
        let client = MusicBrainzClient::new(art_config).map_err(|err| err.to_string())?;
        let mut log = ProcessingLog::load(&log_path);
        let resolution = retry_album_art(&client, &mut log, &key, &release_group_id);
        log.save(&log_path).map_err(|err| err.to_string())?;
        Ok(resolution.image.is_some())
    })
    .await??;

    if found {
        println!("Album art found; re-run the repair on the album's files to embed it.");
    } else {
        println!("No album art found for that release group.");
    }
    Ok(())
}

async fn search(config: &RepairConfig, log_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let art_config = config.art_source();
    let min_interval = config.min_request_interval();
    let results = tokio::task::spawn_blocking(move || -> Result<Vec<(AlbumKey, Option<String>)>, String> {
        let log = ProcessingLog::load(&log_path);
        let keys: Vec<AlbumKey> = log.failed_albums().into_iter().map(|(key, _)| key).collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let client = MusicBrainzClient::new(art_config).map_err(|err| err.to_string())?;
        let mut throttle = Throttle::new(min_interval);
        Ok(search_release_groups(&client, &keys, &mut throttle))
    })
    .await??;

    if results.is_empty() {
        println!("No failed album art downloads.");
    }
    for (key, id) in results {
        println!("{}\t{}\t{}", key.artist, key.album, id.as_deref().unwrap_or("-"));
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
