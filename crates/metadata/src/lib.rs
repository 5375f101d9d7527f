mod writer;

use std::path::Path;

use lofty::error::LoftyError;
use lofty::prelude::{ItemKey, TaggedFileExt};

pub use writer::{plan_fields, scheme_for, Field, LoftyTagWriter, TagScheme, TagWriter};

/// Tags already present in a file, as far as the normalizer cares about them.
#[derive(Debug, Default, Clone)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u32>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub has_embedded_cover: bool,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(value) => write!(f, "unsupported: {}", value),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;

    let mut info = TagInfo::default();
    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = tag.get_string(&ItemKey::TrackTitle).and_then(clean);
        info.album = tag.get_string(&ItemKey::AlbumTitle).and_then(clean);
        let album_artist = tag.get_string(&ItemKey::AlbumArtist).and_then(clean);
        let track_artist = tag.get_string(&ItemKey::TrackArtist).and_then(clean);
        info.artist = track_artist.or_else(|| album_artist.clone());
        info.album_artist = album_artist;
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_track_number);
        info.year = tag
            .get_string(&ItemKey::RecordingDate)
            .or_else(|| tag.get_string(&ItemKey::Year))
            .and_then(clean);
        info.genre = tag.get_string(&ItemKey::Genre).and_then(clean);
        info.has_embedded_cover = !tag.pictures().is_empty();
    }

    Ok(info)
}

/// Detects the image type from its leading bytes. Server-supplied content
/// types are never consulted; anything unrecognised is treated as JPEG.
pub fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.starts_with(b"RIFF") && bytes.len() >= 12 && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

fn clean(text: &str) -> Option<String> {
    common::non_empty(text)
}

fn parse_track_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok().filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::{parse_track_number, read_tags, sniff_image_mime};

    #[test]
    fn sniffs_known_signatures() {
        assert_eq!(sniff_image_mime(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(sniff_image_mime(b"GIF87a...."), "image/gif");
        assert_eq!(sniff_image_mime(b"GIF89a...."), "image/gif");
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), "image/webp");
    }

    #[test]
    fn unknown_signatures_default_to_jpeg() {
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_image_mime(b"RIFF\x00\x00\x00\x00WAVE"), "image/jpeg");
        assert_eq!(sniff_image_mime(b"RIFF"), "image/jpeg");
        assert_eq!(sniff_image_mime(&[]), "image/jpeg");
    }

    #[test]
    fn track_number_takes_part_before_slash() {
        assert_eq!(parse_track_number("3/12"), Some(3));
        assert_eq!(parse_track_number(" 07 "), Some(7));
        assert_eq!(parse_track_number("0"), None);
        assert_eq!(parse_track_number("x"), None);
    }

    #[test]
    fn reading_a_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_tags(&dir.path().join("missing.mp3")).is_err());
    }
}
