use std::sync::OnceLock;

use common::TrackMetadata;
use regex::Regex;

/// The base name matched neither `Artist - Album - NN - Title` nor
/// `Artist - Title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameError(pub String);

impl std::fmt::Display for FilenameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unrecognised filename: {}", self.0)
    }
}

impl std::error::Error for FilenameError {}

fn full_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+?)\s*-\s*(.+?)\s*-\s*(\d+)\s*-\s*(.+)$").expect("valid full pattern")
    })
}

fn short_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+?)\s*-\s*(.+)$").expect("valid short pattern"))
}

/// Extracts track fields from a base name with the extension already removed.
pub fn parse_filename(stem: &str) -> Result<TrackMetadata, FilenameError> {
    if let Some(caps) = full_pattern().captures(stem) {
        return Ok(TrackMetadata {
            artist: common::non_empty(&caps[1]),
            album: common::non_empty(&caps[2]),
            track_number: caps[3].parse::<u32>().ok().filter(|n| *n > 0),
            title: common::non_empty(&caps[4]),
        });
    }

    if let Some(caps) = short_pattern().captures(stem) {
        return Ok(TrackMetadata {
            artist: common::non_empty(&caps[1]),
            album: None,
            track_number: None,
            title: common::non_empty(&caps[2]),
        });
    }

    Err(FilenameError(stem.to_string()))
}

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Removes characters that are invalid in file names on common platforms and
/// collapses runs of whitespace.
pub fn sanitize_component(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| !INVALID_CHARS.contains(c)).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Artist - Album - NN - Title` with the extension appended verbatim.
pub fn canonical_name(
    artist: &str,
    album: &str,
    track_number: u32,
    title: &str,
    extension: Option<&str>,
) -> String {
    let base = format!(
        "{} - {} - {:02} - {}",
        sanitize_component(artist),
        sanitize_component(album),
        track_number,
        sanitize_component(title)
    );
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", base, ext),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::{canonical_name, parse_filename, sanitize_component, FilenameError};

    #[test]
    fn parses_four_part_names() {
        let meta = parse_filename("Pink Floyd - The Wall - 03 - Another Brick").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Pink Floyd"));
        assert_eq!(meta.album.as_deref(), Some("The Wall"));
        assert_eq!(meta.track_number, Some(3));
        assert_eq!(meta.title.as_deref(), Some("Another Brick"));
    }

    #[test]
    fn trims_whitespace_around_segments() {
        let meta = parse_filename("  Artist   -  Album -   012  -  Some Title  ").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Artist"));
        assert_eq!(meta.album.as_deref(), Some("Album"));
        assert_eq!(meta.track_number, Some(12));
        assert_eq!(meta.title.as_deref(), Some("Some Title"));
    }

    #[test]
    fn title_may_contain_dashes() {
        let meta = parse_filename("A - B - 1 - Part One - Live").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Part One - Live"));
    }

    #[test]
    fn dots_in_the_title_are_kept() {
        let meta = parse_filename("A - B - 01 - Mr. Blue Sky").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Mr. Blue Sky"));
        let meta = parse_filename("Electric Light Orchestra - Mr. Blue Sky").unwrap();
        assert_eq!(meta.title.as_deref(), Some("Mr. Blue Sky"));
    }

    #[test]
    fn falls_back_to_artist_title() {
        let meta = parse_filename("Radiohead - Creep").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Radiohead"));
        assert_eq!(meta.title.as_deref(), Some("Creep"));
        assert_eq!(meta.album, None);
        assert_eq!(meta.track_number, None);
    }

    #[test]
    fn non_numeric_third_segment_uses_short_form() {
        let meta = parse_filename("A - B - C - D").unwrap();
        assert_eq!(meta.artist.as_deref(), Some("A"));
        assert_eq!(meta.title.as_deref(), Some("B - C - D"));
        assert_eq!(meta.album, None);
    }

    #[test]
    fn zero_track_number_is_left_unset() {
        let meta = parse_filename("A - B - 00 - T").unwrap();
        assert_eq!(meta.track_number, None);
        assert_eq!(meta.album.as_deref(), Some("B"));
    }

    #[test]
    fn rejects_names_without_separator() {
        assert_eq!(
            parse_filename("track01"),
            Err(FilenameError("track01".to_string()))
        );
    }

    #[test]
    fn sanitizes_invalid_characters() {
        assert_eq!(sanitize_component("AC/DC:  Live?  "), "ACDC Live");
        assert_eq!(sanitize_component("a<b>c\"d\\e|f*g"), "abcdefg");
    }

    #[test]
    fn canonical_name_pads_track_number() {
        assert_eq!(
            canonical_name("A", "B", 3, "T", Some("flac")),
            "A - B - 03 - T.flac"
        );
        assert_eq!(canonical_name("A", "B", 123, "T", None), "A - B - 123 - T");
    }
}
