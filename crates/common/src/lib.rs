use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "opus", "m4a", "mp4"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    Opus,
    M4a,
    Mp4,
}

impl AudioFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            "ogg" => Some(AudioFormat::Ogg),
            "opus" => Some(AudioFormat::Opus),
            "m4a" => Some(AudioFormat::M4a),
            "mp4" => Some(AudioFormat::Mp4),
            _ => None,
        }
    }
}

/// Track-level fields recovered from a filename or from existing tags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    pub title: Option<String>,
}

/// Album-level fields, usually read from an `album.nfo` sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumMetadata {
    pub album: Option<String>,
    pub artist: Option<String>,
    pub albumartist: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub release_group_id: Option<String>,
    pub tracks: BTreeMap<u32, String>,
}

/// Identity of an album for art lookups and log entries.
///
/// The strings are kept exactly as found; no case folding or trimming is
/// applied beyond what the filename parser already did.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlbumKey {
    pub artist: String,
    pub album: String,
}

const KEY_SEP: &str = "||";

impl AlbumKey {
    pub fn new(artist: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
        }
    }

    /// Legacy on-disk form, `artist||album`.
    pub fn to_log_key(&self) -> String {
        format!("{}{}{}", self.artist, KEY_SEP, self.album)
    }

    pub fn from_log_key(value: &str) -> Option<Self> {
        let (artist, album) = value.split_once(KEY_SEP)?;
        Some(Self::new(artist, album))
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.album)
    }
}

/// Returns `Some(trimmed)` for non-blank input.
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
