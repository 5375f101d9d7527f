use std::env;
use std::path::PathBuf;

use library::ProcessingLog;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let log_path = env::args()
        .nth(1)
        .or_else(|| env::var("TAGMEND_LOG").ok())
        .unwrap_or_else(|| "audio_repair_log.json".to_string());
    let log_path = PathBuf::from(log_path);
    if !log_path.exists() {
        return Err(format!("log file {:?} not found", log_path).into());
    }
    info!("Reading {:?}", log_path);

    let log = ProcessingLog::load(&log_path);
    let with_art = log.processed_files().filter(|(_, file)| file.has_art).count();
    let never_stat = log
        .processed_files()
        .filter(|(_, file)| file.file_mtime == 0.0)
        .count();
    let failed = log.failed_albums().len();

    println!(
        "Processed: {} files ({} with art, {} without mtime)",
        log.processed_count(),
        with_art,
        never_stat
    );
    println!(
        "Album art: {} albums, {} downloaded, {} failed",
        log.album_count(),
        log.album_count() - failed,
        failed
    );

    Ok(())
}
