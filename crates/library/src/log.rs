//! Persistent record of processed files and album art attempts.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::AlbumKey;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// Absorbs float formatting error in stored mtimes.
const MTIME_SLACK: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub last_processed: String,
    /// Seconds since the epoch; 0 when the file could not be stat'ed.
    pub file_mtime: f64,
    pub has_art: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlbumArtEntry {
    pub downloaded: bool,
    pub last_downloaded: String,
    /// Stored as `""` when no release group is known.
    #[serde(
        default,
        serialize_with = "serialize_blank_id",
        deserialize_with = "deserialize_blank_id"
    )]
    pub musicbrainz_release_group_id: Option<String>,
}

fn serialize_blank_id<S>(id: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(id.as_deref().unwrap_or(""))
}

fn deserialize_blank_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|id| common::non_empty(&id)))
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProcessingLog {
    #[serde(default)]
    processed_files: BTreeMap<String, ProcessedFile>,
    #[serde(default)]
    album_art: BTreeMap<String, AlbumArtEntry>,
}

#[derive(Debug)]
pub enum LogError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Io(err) => write!(f, "io error: {}", err),
            LogError::Json(err) => write!(f, "json error: {}", err),
        }
    }
}

impl std::error::Error for LogError {}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err)
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        LogError::Json(err)
    }
}

impl ProcessingLog {
    /// Reads the log at `path`. A missing or unreadable log starts empty.
    pub fn load(path: &Path) -> Self {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!("Failed to read processing log {:?}: {}", path, err);
                return Self::default();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(log) => log,
            Err(err) => {
                warn!("Processing log {:?} is corrupt ({}); starting empty", path, err);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), LogError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = temp_path(path);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// True when `path` was processed and has not been modified since.
    pub fn is_processed(&self, path: &Path) -> bool {
        let Some(entry) = self.processed_files.get(&path_key(path)) else {
            return false;
        };
        if !path.exists() {
            return false;
        }
        file_mtime(path) <= entry.file_mtime + MTIME_SLACK
    }

    pub fn mark_processed(&mut self, path: &Path, has_art: bool) {
        self.processed_files.insert(
            path_key(path),
            ProcessedFile {
                last_processed: now_rfc3339(),
                file_mtime: file_mtime(path),
                has_art,
            },
        );
    }

    pub fn has_album_art_downloaded(&self, key: &AlbumKey) -> bool {
        self.album_art_entry(key)
            .map(|entry| entry.downloaded)
            .unwrap_or(false)
    }

    pub fn album_art_entry(&self, key: &AlbumKey) -> Option<&AlbumArtEntry> {
        self.album_art.get(&key.to_log_key())
    }

    /// Replaces the album's art entry with the outcome of the latest attempt.
    pub fn mark_album_art(&mut self, key: &AlbumKey, success: bool, release_group_id: Option<String>) {
        self.album_art.insert(
            key.to_log_key(),
            AlbumArtEntry {
                downloaded: success,
                last_downloaded: now_rfc3339(),
                musicbrainz_release_group_id: release_group_id,
            },
        );
    }

    /// Albums whose last art attempt did not produce an image.
    pub fn failed_albums(&self) -> Vec<(AlbumKey, AlbumArtEntry)> {
        self.album_art
            .iter()
            .filter(|(_, entry)| !entry.downloaded)
            .filter_map(|(key, entry)| match AlbumKey::from_log_key(key) {
                Some(album) => Some((album, entry.clone())),
                None => {
                    warn!("Skipping malformed album key {:?}", key);
                    None
                }
            })
            .collect()
    }

    pub fn processed_count(&self) -> usize {
        self.processed_files.len()
    }

    pub fn album_count(&self) -> usize {
        self.album_art.len()
    }

    pub fn processed_files(&self) -> impl Iterator<Item = (&str, &ProcessedFile)> {
        self.processed_files.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn file_mtime(path: &Path) -> f64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
