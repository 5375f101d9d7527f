use std::path::Path;

use common::{AlbumMetadata, AudioFormat, TrackMetadata};
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{ItemKey, TagExt, TaggedFileExt};
use lofty::tag::{Tag, TagType};
use tracing::{debug, warn};

use crate::{sniff_image_mime, MetadataError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Title,
    Artist,
    Album,
    TrackNumber,
    AlbumArtist,
    Year,
    Genre,
}

impl Field {
    fn item_key(self) -> ItemKey {
        match self {
            Field::Title => ItemKey::TrackTitle,
            Field::Artist => ItemKey::TrackArtist,
            Field::Album => ItemKey::AlbumTitle,
            Field::TrackNumber => ItemKey::TrackNumber,
            Field::AlbumArtist => ItemKey::AlbumArtist,
            Field::Year => ItemKey::RecordingDate,
            Field::Genre => ItemKey::Genre,
        }
    }
}

/// How one container family stores the repaired fields.
///
/// Writes go through lofty's `ItemKey` mapping. `keys` lists the native
/// key lofty emits for each field in this container and is used for logging.
#[derive(Debug)]
pub struct TagScheme {
    pub name: &'static str,
    pub tag_type: TagType,
    keys: [(Field, &'static str); 7],
    /// Use the sidecar `artist` as album artist when it has no `albumartist`.
    pub album_artist_fallback: bool,
    /// The container only stores PNG or JPEG covers.
    pub png_or_jpeg_covers: bool,
}

impl TagScheme {
    pub fn native_key(&self, field: Field) -> &'static str {
        self.keys
            .iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, key)| *key)
            .unwrap_or("?")
    }

    pub fn cover_mime(&self, image: &[u8]) -> &'static str {
        let mime = sniff_image_mime(image);
        if self.png_or_jpeg_covers && mime != "image/png" {
            "image/jpeg"
        } else {
            mime
        }
    }
}

static ID3V2_SCHEME: TagScheme = TagScheme {
    name: "id3v2",
    tag_type: TagType::Id3v2,
    keys: [
        (Field::Title, "TIT2"),
        (Field::Artist, "TPE1"),
        (Field::Album, "TALB"),
        (Field::TrackNumber, "TRCK"),
        (Field::AlbumArtist, "TPE2"),
        (Field::Year, "TDRC"),
        (Field::Genre, "TCON"),
    ],
    album_artist_fallback: false,
    png_or_jpeg_covers: false,
};

static FLAC_SCHEME: TagScheme = TagScheme {
    name: "flac",
    tag_type: TagType::VorbisComments,
    keys: VORBIS_KEYS,
    album_artist_fallback: false,
    png_or_jpeg_covers: false,
};

static OGG_SCHEME: TagScheme = TagScheme {
    name: "vorbis",
    tag_type: TagType::VorbisComments,
    keys: VORBIS_KEYS,
    album_artist_fallback: true,
    png_or_jpeg_covers: false,
};

static MP4_SCHEME: TagScheme = TagScheme {
    name: "mp4",
    tag_type: TagType::Mp4Ilst,
    keys: [
        (Field::Title, "\u{a9}nam"),
        (Field::Artist, "\u{a9}ART"),
        (Field::Album, "\u{a9}alb"),
        (Field::TrackNumber, "trkn"),
        (Field::AlbumArtist, "aART"),
        (Field::Year, "\u{a9}day"),
        (Field::Genre, "\u{a9}gen"),
    ],
    album_artist_fallback: true,
    png_or_jpeg_covers: true,
};

const VORBIS_KEYS: [(Field, &str); 7] = [
    (Field::Title, "TITLE"),
    (Field::Artist, "ARTIST"),
    (Field::Album, "ALBUM"),
    (Field::TrackNumber, "TRACKNUMBER"),
    (Field::AlbumArtist, "ALBUMARTIST"),
    (Field::Year, "DATE"),
    (Field::Genre, "GENRE"),
];

pub fn scheme_for(format: AudioFormat) -> &'static TagScheme {
    match format {
        AudioFormat::Mp3 => &ID3V2_SCHEME,
        AudioFormat::Flac => &FLAC_SCHEME,
        AudioFormat::Ogg | AudioFormat::Opus => &OGG_SCHEME,
        AudioFormat::M4a | AudioFormat::Mp4 => &MP4_SCHEME,
    }
}

/// Resolves the final value of every field to write, in write order.
///
/// Filename fields go in first. Sidecar album-level fields then fill or
/// override, the sidecar album only when the filename had none, and a
/// sidecar track title always wins for its track number.
pub fn plan_fields(
    scheme: &TagScheme,
    track: &TrackMetadata,
    album: Option<&AlbumMetadata>,
) -> Vec<(Field, String)> {
    let mut planned: Vec<(Field, String)> = Vec::new();
    let mut set = |field: Field, value: &str| {
        match planned.iter_mut().find(|(existing, _)| *existing == field) {
            Some(entry) => entry.1 = value.to_string(),
            None => planned.push((field, value.to_string())),
        }
    };

    if let Some(title) = &track.title {
        set(Field::Title, title);
    }
    if let Some(artist) = &track.artist {
        set(Field::Artist, artist);
    }
    if let Some(name) = &track.album {
        set(Field::Album, name);
    }
    if let Some(number) = track.track_number {
        set(Field::TrackNumber, &number.to_string());
    }

    if let Some(album) = album {
        if track.album.is_none() {
            if let Some(name) = &album.album {
                set(Field::Album, name);
            }
        }
        match (&album.albumartist, &album.artist) {
            (Some(album_artist), _) => set(Field::AlbumArtist, album_artist),
            (None, Some(artist)) if scheme.album_artist_fallback => {
                set(Field::AlbumArtist, artist)
            }
            _ => {}
        }
        if let Some(year) = &album.year {
            set(Field::Year, year);
        }
        if let Some(genre) = &album.genre {
            set(Field::Genre, genre);
        }
        if let Some(title) = track.track_number.and_then(|n| album.tracks.get(&n)) {
            set(Field::Title, title);
        }
    }

    planned
}

/// Persists repaired fields and cover art into one audio file.
pub trait TagWriter {
    fn write_tags(
        &self,
        path: &Path,
        format: AudioFormat,
        track: &TrackMetadata,
        album: Option<&AlbumMetadata>,
        cover: Option<&[u8]>,
    ) -> Result<(), MetadataError>;

    fn embed_cover(
        &self,
        path: &Path,
        format: AudioFormat,
        cover: &[u8],
    ) -> Result<(), MetadataError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagWriter;

impl TagWriter for LoftyTagWriter {
    fn write_tags(
        &self,
        path: &Path,
        format: AudioFormat,
        track: &TrackMetadata,
        album: Option<&AlbumMetadata>,
        cover: Option<&[u8]>,
    ) -> Result<(), MetadataError> {
        let scheme = scheme_for(format);
        let fields = plan_fields(scheme, track, album);
        modify_tag(path, scheme, |tag| {
            for (field, value) in &fields {
                debug!("{} {} = {:?}", scheme.name, scheme.native_key(*field), value);
                if !tag.insert_text(field.item_key(), value.clone()) {
                    warn!(
                        "{} tag rejected {} for {:?}",
                        scheme.name,
                        scheme.native_key(*field),
                        path
                    );
                }
            }
            if let Some(image) = cover {
                replace_cover(tag, scheme, image);
            }
        })
    }

    fn embed_cover(
        &self,
        path: &Path,
        format: AudioFormat,
        cover: &[u8],
    ) -> Result<(), MetadataError> {
        let scheme = scheme_for(format);
        modify_tag(path, scheme, |tag| replace_cover(tag, scheme, cover))
    }
}

fn modify_tag(
    path: &Path,
    scheme: &TagScheme,
    apply: impl FnOnce(&mut Tag),
) -> Result<(), MetadataError> {
    let mut tagged_file = lofty::read_from_path(path)?;
    if tagged_file.tag(scheme.tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(scheme.tag_type));
    }
    let tag = tagged_file.tag_mut(scheme.tag_type).ok_or_else(|| {
        MetadataError::Unsupported(format!("{:?} cannot hold {} tags", path, scheme.name))
    })?;
    apply(tag);
    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

fn replace_cover(tag: &mut Tag, scheme: &TagScheme, image: &[u8]) {
    while !tag.pictures().is_empty() {
        tag.remove_picture(0);
    }
    let mime = MimeType::from_str(scheme.cover_mime(image));
    tag.push_picture(Picture::new_unchecked(
        PictureType::CoverFront,
        Some(mime),
        Some("Cover".to_string()),
        image.to_vec(),
    ));
}

#[cfg(test)]
mod tests {
    use super::{plan_fields, scheme_for, Field, LoftyTagWriter, TagWriter};
    use common::{AlbumMetadata, AudioFormat, TrackMetadata};
    use lofty::prelude::{ItemKey, TaggedFileExt};
    use lofty::tag::TagType;
    use std::fs;
    use std::path::Path;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfirst-cover";
    const JPEG: &[u8] = b"\xff\xd8\xff\xe0second-cover";

    /// `fLaC`, a STREAMINFO block (44.1 kHz, stereo, 16 bit) and a last PADDING block.
    fn write_minimal_flac(path: &Path) {
        let mut bytes = b"fLaC".to_vec();
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 34]);
        bytes.extend_from_slice(&[0x10, 0x00, 0x10, 0x00]);
        bytes.extend_from_slice(&[0x00; 6]);
        bytes.extend_from_slice(&[0x0a, 0xc4, 0x42, 0xf0, 0x00, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(&[0x00; 16]);
        bytes.extend_from_slice(&[0x81, 0x00, 0x00, 0x10]);
        bytes.extend_from_slice(&[0x00; 16]);
        fs::write(path, bytes).unwrap();
    }

    /// A few silent MPEG-1 layer III frames at 128 kbps / 44.1 kHz.
    fn write_minimal_mp3(path: &Path) {
        let mut frame = vec![0xff, 0xfb, 0x90, 0x00];
        frame.resize(417, 0);
        fs::write(path, frame.repeat(4)).unwrap();
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|window| window == needle)
    }

    fn sidecar() -> AlbumMetadata {
        AlbumMetadata {
            albumartist: Some("AA".to_string()),
            year: Some("1979".to_string()),
            ..AlbumMetadata::default()
        }
    }

    fn track(artist: &str, album: Option<&str>, number: Option<u32>, title: &str) -> TrackMetadata {
        TrackMetadata {
            artist: Some(artist.to_string()),
            album: album.map(str::to_string),
            track_number: number,
            title: Some(title.to_string()),
        }
    }

    fn value(plan: &[(Field, String)], field: Field) -> Option<&str> {
        plan.iter()
            .find(|(candidate, _)| *candidate == field)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn filename_fields_only_without_sidecar() {
        let plan = plan_fields(
            scheme_for(AudioFormat::Mp3),
            &track("Pink Floyd", Some("The Wall"), Some(3), "Another Brick"),
            None,
        );
        assert_eq!(
            plan,
            vec![
                (Field::Title, "Another Brick".to_string()),
                (Field::Artist, "Pink Floyd".to_string()),
                (Field::Album, "The Wall".to_string()),
                (Field::TrackNumber, "3".to_string()),
            ]
        );
    }

    #[test]
    fn sidecar_album_only_fills_a_missing_album() {
        let sidecar = AlbumMetadata {
            album: Some("Sidecar Album".to_string()),
            ..AlbumMetadata::default()
        };
        let scheme = scheme_for(AudioFormat::Flac);

        let with_album = plan_fields(scheme, &track("A", Some("File Album"), Some(1), "T"), Some(&sidecar));
        assert_eq!(value(&with_album, Field::Album), Some("File Album"));

        let without_album = plan_fields(scheme, &track("A", None, None, "T"), Some(&sidecar));
        assert_eq!(value(&without_album, Field::Album), Some("Sidecar Album"));
    }

    #[test]
    fn sidecar_track_title_overrides_filename_title() {
        let mut sidecar = AlbumMetadata::default();
        sidecar.tracks.insert(3, "Another Brick in the Wall, Part 2".to_string());
        let plan = plan_fields(
            scheme_for(AudioFormat::Ogg),
            &track("Pink Floyd", Some("The Wall"), Some(3), "Another Brick"),
            Some(&sidecar),
        );
        assert_eq!(value(&plan, Field::Title), Some("Another Brick in the Wall, Part 2"));
        assert_eq!(plan.iter().filter(|(f, _)| *f == Field::Title).count(), 1);
    }

    #[test]
    fn album_level_fields_come_from_sidecar() {
        let sidecar = AlbumMetadata {
            albumartist: Some("Various".to_string()),
            year: Some("1979".to_string()),
            genre: Some("Rock".to_string()),
            ..AlbumMetadata::default()
        };
        let plan = plan_fields(
            scheme_for(AudioFormat::M4a),
            &track("A", Some("B"), Some(1), "T"),
            Some(&sidecar),
        );
        assert_eq!(value(&plan, Field::AlbumArtist), Some("Various"));
        assert_eq!(value(&plan, Field::Year), Some("1979"));
        assert_eq!(value(&plan, Field::Genre), Some("Rock"));
    }

    #[test]
    fn album_artist_fallback_is_per_format() {
        let sidecar = AlbumMetadata {
            artist: Some("Sidecar Artist".to_string()),
            ..AlbumMetadata::default()
        };
        let file = track("A", Some("B"), Some(1), "T");

        let mp3 = plan_fields(scheme_for(AudioFormat::Mp3), &file, Some(&sidecar));
        assert_eq!(value(&mp3, Field::AlbumArtist), None);
        let flac = plan_fields(scheme_for(AudioFormat::Flac), &file, Some(&sidecar));
        assert_eq!(value(&flac, Field::AlbumArtist), None);
        let opus = plan_fields(scheme_for(AudioFormat::Opus), &file, Some(&sidecar));
        assert_eq!(value(&opus, Field::AlbumArtist), Some("Sidecar Artist"));
        let mp4 = plan_fields(scheme_for(AudioFormat::Mp4), &file, Some(&sidecar));
        assert_eq!(value(&mp4, Field::AlbumArtist), Some("Sidecar Artist"));
    }

    #[test]
    fn native_keys_match_each_container() {
        let mp3 = scheme_for(AudioFormat::Mp3);
        assert_eq!(mp3.native_key(Field::Title), "TIT2");
        assert_eq!(mp3.native_key(Field::AlbumArtist), "TPE2");
        assert_eq!(mp3.native_key(Field::Year), "TDRC");

        let flac = scheme_for(AudioFormat::Flac);
        assert_eq!(flac.native_key(Field::TrackNumber), "TRACKNUMBER");
        assert_eq!(flac.native_key(Field::Year), "DATE");

        let m4a = scheme_for(AudioFormat::M4a);
        assert_eq!(m4a.native_key(Field::Title), "\u{a9}nam");
        assert_eq!(m4a.native_key(Field::TrackNumber), "trkn");
        assert_eq!(m4a.native_key(Field::AlbumArtist), "aART");
    }

    #[test]
    fn mp4_covers_are_png_or_jpeg() {
        let gif = b"GIF89a....";
        assert_eq!(scheme_for(AudioFormat::Mp4).cover_mime(gif), "image/jpeg");
        assert_eq!(scheme_for(AudioFormat::Mp3).cover_mime(gif), "image/gif");
        assert_eq!(scheme_for(AudioFormat::M4a).cover_mime(b"\x89PNG...."), "image/png");
    }

    #[test]
    fn writing_a_missing_file_reports_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LoftyTagWriter.write_tags(
            &dir.path().join("missing.flac"),
            AudioFormat::Flac,
            &track("A", Some("B"), Some(1), "T"),
            None,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn flac_rewrite_uses_vorbis_keys_and_keeps_one_cover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A - B - 03 - Song.flac");
        write_minimal_flac(&path);
        let file = track("A", Some("B"), Some(3), "Song");

        LoftyTagWriter
            .write_tags(&path, AudioFormat::Flac, &file, Some(&sidecar()), Some(PNG))
            .unwrap();
        LoftyTagWriter
            .write_tags(&path, AudioFormat::Flac, &file, Some(&sidecar()), Some(JPEG))
            .unwrap();

        let raw = fs::read(&path).unwrap();
        let scheme = scheme_for(AudioFormat::Flac);
        for (field, value) in [
            (Field::Title, "Song"),
            (Field::TrackNumber, "3"),
            (Field::Year, "1979"),
            (Field::AlbumArtist, "AA"),
        ] {
            let entry = format!("{}={}", scheme.native_key(field), value);
            assert!(contains(&raw, entry.as_bytes()), "missing {}", entry);
        }

        let tagged = lofty::read_from_path(&path).unwrap();
        let tag = tagged.tag(TagType::VorbisComments).unwrap();
        assert_eq!(tag.get_string(&ItemKey::TrackTitle), Some("Song"));
        assert_eq!(tag.pictures().len(), 1);
        assert_eq!(tag.pictures()[0].data(), JPEG);
        assert!(!contains(&raw, b"first-cover"));
    }

    #[test]
    fn mp3_rewrite_uses_id3_frames_and_replaces_the_cover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A - B - 07 - Song.mp3");
        write_minimal_mp3(&path);
        let file = track("A", Some("B"), Some(7), "Song");

        LoftyTagWriter
            .write_tags(&path, AudioFormat::Mp3, &file, Some(&sidecar()), Some(PNG))
            .unwrap();
        LoftyTagWriter
            .embed_cover(&path, AudioFormat::Mp3, JPEG)
            .unwrap();

        let raw = fs::read(&path).unwrap();
        let scheme = scheme_for(AudioFormat::Mp3);
        for field in [Field::Title, Field::TrackNumber, Field::Year, Field::AlbumArtist] {
            let frame = scheme.native_key(field);
            assert!(contains(&raw, frame.as_bytes()), "missing {}", frame);
        }
        assert!(!contains(&raw, b"first-cover"));

        let tagged = lofty::read_from_path(&path).unwrap();
        let tag = tagged.tag(TagType::Id3v2).unwrap();
        assert_eq!(tag.get_string(&ItemKey::AlbumArtist), Some("AA"));
        assert_eq!(tag.get_string(&ItemKey::TrackNumber), Some("7"));
        assert_eq!(tag.pictures().len(), 1);
        assert_eq!(tag.pictures()[0].data(), JPEG);
    }
}
