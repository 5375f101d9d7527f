//! One repair pass over a music directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use common::{AlbumKey, AlbumMetadata, AudioFormat, TrackMetadata, SUPPORTED_EXTENSIONS};
use metadata::{MetadataError, TagInfo, TagWriter};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::external::{resolve_art, ArtSource, Throttle};
use crate::filename::parse_filename;
use crate::log::ProcessingLog;
use crate::normalize::{normalize_filename, RenameOutcome};
use crate::sidecar::{read_sidecar, write_sidecar, SIDECAR_FILE_NAME};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RepairOptions {
    /// Write tags. When off, files are only parsed, covers embedded and
    /// albums collected for sidecar generation.
    pub repair_metadata: bool,
    pub download_art: bool,
    pub generate_sidecar: bool,
    pub fix_filenames: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            repair_metadata: true,
            download_art: true,
            generate_sidecar: true,
            fix_filenames: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    UnparseableFilename,
    UnsupportedFormat,
    TagWrite(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::UnparseableFilename => write!(f, "unrecognised filename"),
            FailureReason::UnsupportedFormat => write!(f, "unsupported format"),
            FailureReason::TagWrite(err) => write!(f, "tag write failed: {}", err),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped,
    Success,
    Failed(FailureReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RepairEvent {
    Progress {
        index: usize,
        total: usize,
        percent: f32,
        file: PathBuf,
    },
    FileDone {
        file: PathBuf,
        outcome: FileOutcome,
    },
    Renamed {
        from: PathBuf,
        to: PathBuf,
    },
    SidecarWritten {
        dir: PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: FailureReason,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub sidecars_generated: usize,
    pub filenames_fixed: usize,
    pub cancelled: bool,
    pub failures: Vec<FailedFile>,
}

#[derive(Debug)]
pub enum RepairError {
    RootNotFound(PathBuf),
    Io(std::io::Error),
}

impl std::fmt::Display for RepairError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairError::RootNotFound(path) => write!(f, "music directory not found: {:?}", path),
            RepairError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for RepairError {}

impl From<std::io::Error> for RepairError {
    fn from(err: std::io::Error) -> Self {
        RepairError::Io(err)
    }
}

type TagReader = fn(&Path) -> Result<TagInfo, MetadataError>;

struct AlbumIndexEntry {
    album: AlbumMetadata,
    tracks: BTreeMap<u32, String>,
}

/// Owns the processing log and art cache for the duration of a run.
pub struct RepairSession<'a> {
    log_path: PathBuf,
    log: ProcessingLog,
    options: RepairOptions,
    writer: &'a dyn TagWriter,
    art: Option<&'a dyn ArtSource>,
    throttle: Throttle,
    read_tags: TagReader,
    art_cache: HashMap<AlbumKey, Option<Bytes>>,
    sidecars: HashMap<PathBuf, Option<AlbumMetadata>>,
    albums: BTreeMap<PathBuf, AlbumIndexEntry>,
}

impl<'a> RepairSession<'a> {
    pub fn new(
        log_path: impl Into<PathBuf>,
        options: RepairOptions,
        writer: &'a dyn TagWriter,
        art: Option<&'a dyn ArtSource>,
        min_interval: Duration,
    ) -> Self {
        let log_path = log_path.into();
        let log = ProcessingLog::load(&log_path);
        Self {
            log_path,
            log,
            options,
            writer,
            art,
            throttle: Throttle::new(min_interval),
            read_tags: metadata::read_tags,
            art_cache: HashMap::new(),
            sidecars: HashMap::new(),
            albums: BTreeMap::new(),
        }
    }

    /// Replaces the embedded-tag reader used by the filename normalizer.
    pub fn with_tag_reader(mut self, read_tags: TagReader) -> Self {
        self.read_tags = read_tags;
        self
    }

    pub fn log(&self) -> &ProcessingLog {
        &self.log
    }

    pub fn run(
        &mut self,
        root: &Path,
        events: &UnboundedSender<RepairEvent>,
        cancel: &AtomicBool,
    ) -> Result<RepairSummary, RepairError> {
        if !root.is_dir() {
            return Err(RepairError::RootNotFound(root.to_path_buf()));
        }
        let root = root.canonicalize()?;
        let files = collect_audio_files(&root);
        let mut summary = RepairSummary {
            total: files.len(),
            ..RepairSummary::default()
        };
        info!("Repairing {} audio files under {:?}", files.len(), root);

        for (index, file) in files.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!("Repair cancelled after {} of {} files", index, files.len());
                summary.cancelled = true;
                break;
            }
            let _ = events.send(RepairEvent::Progress {
                index: index + 1,
                total: files.len(),
                percent: (index + 1) as f32 * 100.0 / files.len() as f32,
                file: file.clone(),
            });

            let (file, outcome) = self.process_file(file, &mut summary, events);
            match &outcome {
                FileOutcome::Skipped => summary.skipped += 1,
                FileOutcome::Success => summary.success += 1,
                FileOutcome::Failed(reason) => {
                    summary.failed += 1;
                    summary.failures.push(FailedFile {
                        path: file.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            let _ = events.send(RepairEvent::FileDone { file, outcome });
        }

        self.flush_log();

        if self.options.generate_sidecar {
            self.generate_sidecars(&mut summary, events);
        }

        info!(
            "Repair finished: {} ok, {} failed, {} skipped, {} sidecars",
            summary.success, summary.failed, summary.skipped, summary.sidecars_generated
        );
        Ok(summary)
    }

    fn process_file(
        &mut self,
        path: &Path,
        summary: &mut RepairSummary,
        events: &UnboundedSender<RepairEvent>,
    ) -> (PathBuf, FileOutcome) {
        if self.log.is_processed(path) {
            debug!("Already processed {:?}", path);
            return (path.to_path_buf(), FileOutcome::Skipped);
        }
        let Some(format) = AudioFormat::from_path(path) else {
            return (
                path.to_path_buf(),
                FileOutcome::Failed(FailureReason::UnsupportedFormat),
            );
        };
        let album_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let sidecar = self.sidecar_for(&album_dir);

        let mut path = path.to_path_buf();
        let mut parsed = parse_filename(&base_name(&path)).ok();

        if self.options.fix_filenames && parsed.as_ref().map_or(true, |p| p.album.is_none()) {
            match normalize_filename(&path, parsed.as_ref(), sidecar.as_ref(), self.read_tags) {
                Ok(RenameOutcome::Renamed(target)) => {
                    summary.filenames_fixed += 1;
                    let _ = events.send(RepairEvent::Renamed {
                        from: path.clone(),
                        to: target.clone(),
                    });
                    path = target;
                    parsed = parse_filename(&base_name(&path)).ok();
                }
                Ok(outcome) => debug!("Left {:?} as is: {:?}", path, outcome),
                Err(err) => warn!("Failed to rename {:?}: {}", path, err),
            }
        }

        let Some(track) = parsed else {
            warn!("Could not parse filename {:?}", path);
            return (path, FileOutcome::Failed(FailureReason::UnparseableFilename));
        };

        let sidecar_ref = sidecar.as_ref();
        let artist = track
            .artist
            .clone()
            .or_else(|| sidecar_ref.and_then(|s| s.artist.clone()));
        let album = track
            .album
            .clone()
            .or_else(|| sidecar_ref.and_then(|s| s.album.clone()));
        let key = match (&artist, &album) {
            (Some(artist), Some(album)) => Some(AlbumKey::new(artist.clone(), album.clone())),
            _ => None,
        };

        let cover = match (&key, self.options.download_art) {
            (Some(key), true) => {
                let known_id = sidecar_ref.and_then(|s| s.release_group_id.clone());
                self.album_art(key, known_id.as_deref())
            }
            _ => None,
        };

        let written = if self.options.repair_metadata {
            self.writer
                .write_tags(&path, format, &track, sidecar_ref, cover.as_deref())
        } else {
            match &cover {
                Some(image) => self.writer.embed_cover(&path, format, image),
                None => Ok(()),
            }
        };
        if let Err(err) = written {
            warn!("Failed to write tags to {:?}: {}", path, err);
            return (
                path,
                FileOutcome::Failed(FailureReason::TagWrite(err.to_string())),
            );
        }

        if self.options.repair_metadata {
            self.log.mark_processed(&path, cover.is_some());
            self.flush_log();
        }

        if key.is_some() {
            self.record_album(album_dir, artist, album, &track, sidecar_ref);
        }
        (path, FileOutcome::Success)
    }

    fn sidecar_for(&mut self, dir: &Path) -> Option<AlbumMetadata> {
        if let Some(cached) = self.sidecars.get(dir) {
            return cached.clone();
        }
        let path = dir.join(SIDECAR_FILE_NAME);
        let sidecar = if path.is_file() {
            match read_sidecar(&path) {
                Ok(album) => Some(album),
                Err(err) => {
                    warn!("Ignoring unreadable sidecar {:?}: {}", path, err);
                    None
                }
            }
        } else {
            None
        };
        self.sidecars.insert(dir.to_path_buf(), sidecar.clone());
        sidecar
    }

    /// Session cache, then the log, then at most one network attempt.
    fn album_art(&mut self, key: &AlbumKey, known_id: Option<&str>) -> Option<Bytes> {
        if let Some(cached) = self.art_cache.get(key) {
            return cached.clone();
        }
        if let Some(entry) = self.log.album_art_entry(key) {
            debug!(
                "Art for {} already attempted (downloaded: {}); not fetching",
                key, entry.downloaded
            );
            self.art_cache.insert(key.clone(), None);
            return None;
        }
        let source = self.art?;

        self.throttle.wait();
        info!("Fetching album art for {}", key);
        let resolution = resolve_art(source, &key.artist, &key.album, known_id);
        let release_group_id = resolution
            .release_group_id
            .or_else(|| known_id.map(str::to_string));
        self.log
            .mark_album_art(key, resolution.image.is_some(), release_group_id);
        self.flush_log();
        if resolution.image.is_none() {
            info!("No album art found for {}", key);
        }
        self.art_cache.insert(key.clone(), resolution.image.clone());
        resolution.image
    }

    fn record_album(
        &mut self,
        album_dir: PathBuf,
        artist: Option<String>,
        album: Option<String>,
        track: &TrackMetadata,
        sidecar: Option<&AlbumMetadata>,
    ) {
        let entry = self.albums.entry(album_dir).or_insert_with(|| {
            let albumartist = sidecar
                .and_then(|s| s.albumartist.clone())
                .or_else(|| artist.clone());
            AlbumIndexEntry {
                album: AlbumMetadata {
                    album,
                    artist,
                    albumartist,
                    year: sidecar.and_then(|s| s.year.clone()),
                    genre: sidecar.and_then(|s| s.genre.clone()),
                    release_group_id: sidecar.and_then(|s| s.release_group_id.clone()),
                    tracks: BTreeMap::new(),
                },
                tracks: BTreeMap::new(),
            }
        });
        if let Some(number) = track.track_number {
            let title = track
                .title
                .clone()
                .or_else(|| sidecar.and_then(|s| s.tracks.get(&number).cloned()));
            if let Some(title) = title {
                entry.tracks.insert(number, title);
            }
        }
    }

    fn generate_sidecars(&self, summary: &mut RepairSummary, events: &UnboundedSender<RepairEvent>) {
        for (dir, entry) in &self.albums {
            let path = dir.join(SIDECAR_FILE_NAME);
            if path.exists() {
                continue;
            }
            let mut album = entry.album.clone();
            if album.release_group_id.is_none() {
                if let (Some(artist), Some(name)) = (&album.artist, &album.album) {
                    album.release_group_id = self
                        .log
                        .album_art_entry(&AlbumKey::new(artist.clone(), name.clone()))
                        .and_then(|e| e.musicbrainz_release_group_id.clone());
                }
            }
            match write_sidecar(&path, &album, &entry.tracks) {
                Ok(true) => {
                    info!("Generated {:?}", path);
                    summary.sidecars_generated += 1;
                    let _ = events.send(RepairEvent::SidecarWritten { dir: dir.clone() });
                }
                Ok(false) => {}
                Err(err) => warn!("Failed to write sidecar {:?}: {}", path, err),
            }
        }
    }

    fn flush_log(&self) {
        if let Err(err) = self.log.save(&self.log_path) {
            warn!("Failed to save processing log {:?}: {}", self.log_path, err);
        }
    }
}

/// Every supported audio file under `root`, sorted by path.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// File name without its extension.
fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
