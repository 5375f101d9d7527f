//! `album.nfo` sidecar files.
//!
//! The layout follows the album NFO format understood by common media
//! servers: an `<album>` root with flat metadata children and one `<track>`
//! per song.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use common::AlbumMetadata;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use time::macros::format_description;
use time::OffsetDateTime;

pub const SIDECAR_FILE_NAME: &str = "album.nfo";

#[derive(Debug)]
pub enum SidecarError {
    Io(std::io::Error),
    Xml(quick_xml::Error),
    UnexpectedRoot(String),
    Truncated,
}

impl std::fmt::Display for SidecarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SidecarError::Io(err) => write!(f, "io error: {}", err),
            SidecarError::Xml(err) => write!(f, "xml error: {}", err),
            SidecarError::UnexpectedRoot(name) => write!(f, "expected <album> root, found <{}>", name),
            SidecarError::Truncated => write!(f, "document ended inside an element"),
        }
    }
}

impl std::error::Error for SidecarError {}

impl From<std::io::Error> for SidecarError {
    fn from(err: std::io::Error) -> Self {
        SidecarError::Io(err)
    }
}

impl From<quick_xml::Error> for SidecarError {
    fn from(err: quick_xml::Error) -> Self {
        SidecarError::Xml(err)
    }
}

pub fn read_sidecar(path: &Path) -> Result<AlbumMetadata, SidecarError> {
    let contents = fs::read_to_string(path)?;
    parse_sidecar(&contents)
}

pub fn parse_sidecar(xml: &str) -> Result<AlbumMetadata, SidecarError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut album = AlbumMetadata::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut saw_root = false;
    let mut position: Option<String> = None;
    let mut track_title: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if stack.is_empty() {
                    if name != "album" {
                        return Err(SidecarError::UnexpectedRoot(name));
                    }
                    saw_root = true;
                }
                if stack.len() == 1 && name == "track" {
                    position = None;
                    track_title = None;
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                if stack.is_empty() {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name != "album" {
                        return Err(SidecarError::UnexpectedRoot(name));
                    }
                    saw_root = true;
                }
            }
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                let value = common::non_empty(&text);
                text.clear();
                if stack.len() == 1 {
                    match name.as_str() {
                        "title" => album.album = value,
                        "artist" => album.artist = value,
                        "albumartist" => album.albumartist = value,
                        "year" => album.year = value,
                        "genre" => album.genre = value,
                        "musicbrainzreleasegroupid" => album.release_group_id = value,
                        "track" => {
                            let number = position.take().and_then(|p| p.parse::<u32>().ok());
                            if let (Some(number), Some(title)) = (number, track_title.take()) {
                                album.tracks.insert(number, title);
                            }
                        }
                        _ => {}
                    }
                } else if stack.len() == 2 && stack[1] == "track" {
                    match name.as_str() {
                        "position" => position = value,
                        "title" => track_title = value,
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(SidecarError::Truncated);
    }
    if !saw_root {
        return Err(SidecarError::UnexpectedRoot(String::new()));
    }
    Ok(album)
}

/// Writes a new sidecar. Returns `Ok(false)` and leaves the file alone when
/// one already exists at `path`.
pub fn write_sidecar(
    path: &Path,
    album: &AlbumMetadata,
    tracks: &BTreeMap<u32, String>,
) -> Result<bool, SidecarError> {
    if path.exists() {
        return Ok(false);
    }
    let document = render_sidecar(album, tracks, &date_added())?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    file.write_all(&document)?;
    Ok(true)
}

pub fn render_sidecar(
    album: &AlbumMetadata,
    tracks: &BTreeMap<u32, String>,
    date_added: &str,
) -> Result<Vec<u8>, SidecarError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("album")))?;

    let year = field(&album.year);
    let release_group_id = field(&album.release_group_id);
    let artist = field(&album.artist);
    let album_artist = album
        .albumartist
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(artist);

    text_element(&mut writer, "review", "")?;
    text_element(&mut writer, "outline", "")?;
    text_element(&mut writer, "lockdata", "false")?;
    text_element(&mut writer, "dateadded", date_added)?;
    text_element(&mut writer, "title", field(&album.album))?;
    text_element(&mut writer, "year", year)?;
    if !year.is_empty() {
        let date = format!("{}-01-01", year);
        text_element(&mut writer, "premiered", &date)?;
        text_element(&mut writer, "releasedate", &date)?;
    }
    text_element(&mut writer, "runtime", "")?;
    text_element(&mut writer, "genre", field(&album.genre))?;
    if !release_group_id.is_empty() {
        text_element(&mut writer, "musicbrainzalbumid", release_group_id)?;
        text_element(&mut writer, "musicbrainzreleasegroupid", release_group_id)?;
    }
    text_element(&mut writer, "art", "")?;
    text_element(&mut writer, "artist", artist)?;
    text_element(&mut writer, "albumartist", album_artist)?;

    for (position, title) in tracks {
        writer.write_event(Event::Start(BytesStart::new("track")))?;
        text_element(&mut writer, "position", &position.to_string())?;
        text_element(&mut writer, "title", title.trim())?;
        text_element(&mut writer, "duration", "")?;
        writer.write_event(Event::End(BytesEnd::new("track")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("album")))?;
    let mut out = writer.into_inner();
    out.push(b'\n');
    Ok(out)
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<(), SidecarError> {
    if value.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(name)))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

fn date_added() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc().format(&format).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{parse_sidecar, read_sidecar, render_sidecar, write_sidecar, SidecarError};
    use common::AlbumMetadata;
    use std::collections::BTreeMap;

    fn sample_album() -> AlbumMetadata {
        AlbumMetadata {
            album: Some("The Wall".to_string()),
            artist: Some("Pink Floyd".to_string()),
            albumartist: None,
            year: Some("1979".to_string()),
            genre: Some("Progressive Rock".to_string()),
            release_group_id: Some("f4ea3d5c-0000".to_string()),
            tracks: BTreeMap::new(),
        }
    }

    fn sample_tracks() -> BTreeMap<u32, String> {
        let mut tracks = BTreeMap::new();
        tracks.insert(10, "One of My Turns".to_string());
        tracks.insert(2, "The Thin Ice".to_string());
        tracks.insert(1, "In the Flesh? & More".to_string());
        tracks
    }

    #[test]
    fn parses_album_fields_and_tracks() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<album>
  <title>The Wall</title>
  <year>1979</year>
  <genre>Rock</genre>
  <musicbrainzreleasegroupid>abc-123</musicbrainzreleasegroupid>
  <artist>Pink Floyd</artist>
  <albumartist>Pink Floyd</albumartist>
  <track><position>1</position><title>In the Flesh?</title><duration>3:19</duration></track>
  <track><position>2</position><title>The Thin Ice</title></track>
  <track><title>No Position</title></track>
  <track><position>4</position><title></title></track>
</album>"#;
        let album = parse_sidecar(xml).unwrap();
        assert_eq!(album.album.as_deref(), Some("The Wall"));
        assert_eq!(album.artist.as_deref(), Some("Pink Floyd"));
        assert_eq!(album.albumartist.as_deref(), Some("Pink Floyd"));
        assert_eq!(album.year.as_deref(), Some("1979"));
        assert_eq!(album.genre.as_deref(), Some("Rock"));
        assert_eq!(album.release_group_id.as_deref(), Some("abc-123"));
        assert_eq!(album.tracks.len(), 2);
        assert_eq!(album.tracks.get(&1).map(String::as_str), Some("In the Flesh?"));
        assert_eq!(album.tracks.get(&2).map(String::as_str), Some("The Thin Ice"));
    }

    #[test]
    fn track_titles_do_not_leak_into_album_title() {
        let xml = "<album><track><position>1</position><title>Song</title></track></album>";
        let album = parse_sidecar(xml).unwrap();
        assert_eq!(album.album, None);
        assert_eq!(album.tracks.get(&1).map(String::as_str), Some("Song"));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(parse_sidecar("<album><title>x</album>").is_err());
        assert!(parse_sidecar("<album><title>x</title>").is_err());
        assert!(matches!(
            parse_sidecar("<movie><title>x</title></movie>"),
            Err(SidecarError::UnexpectedRoot(_))
        ));
        assert!(parse_sidecar("").is_err());
    }

    #[test]
    fn rendered_layout_has_fixed_fields() {
        let bytes = render_sidecar(&sample_album(), &sample_tracks(), "2024-01-02 03:04:05").unwrap();
        let xml = String::from_utf8(bytes).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<lockdata>false</lockdata>"));
        assert!(xml.contains("<dateadded>2024-01-02 03:04:05</dateadded>"));
        assert!(xml.contains("<premiered>1979-01-01</premiered>"));
        assert!(xml.contains("<releasedate>1979-01-01</releasedate>"));
        assert!(xml.contains("<musicbrainzalbumid>f4ea3d5c-0000</musicbrainzalbumid>"));
        assert!(xml.contains("<albumartist>Pink Floyd</albumartist>"));
        assert!(xml.contains("\n  <title>The Wall</title>"));
        let first = xml.find("<position>1</position>").unwrap();
        let second = xml.find("<position>2</position>").unwrap();
        let tenth = xml.find("<position>10</position>").unwrap();
        assert!(first < second && second < tenth);
    }

    #[test]
    fn omits_dates_and_ids_when_unknown() {
        let album = AlbumMetadata {
            album: Some("X".to_string()),
            ..AlbumMetadata::default()
        };
        let xml = String::from_utf8(render_sidecar(&album, &BTreeMap::new(), "now").unwrap()).unwrap();
        assert!(!xml.contains("premiered"));
        assert!(!xml.contains("releasedate"));
        assert!(!xml.contains("musicbrainz"));
        assert!(xml.contains("<year/>"));
    }

    #[test]
    fn written_sidecar_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.nfo");
        assert!(write_sidecar(&path, &sample_album(), &sample_tracks()).unwrap());

        let read = read_sidecar(&path).unwrap();
        let expected = sample_album();
        assert_eq!(read.album, expected.album);
        assert_eq!(read.artist, expected.artist);
        assert_eq!(read.albumartist, expected.artist);
        assert_eq!(read.year, expected.year);
        assert_eq!(read.genre, expected.genre);
        assert_eq!(read.release_group_id, expected.release_group_id);
        assert_eq!(read.tracks, sample_tracks());
    }

    #[test]
    fn never_overwrites_an_existing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("album.nfo");
        std::fs::write(&path, "hand written").unwrap();
        assert!(!write_sidecar(&path, &sample_album(), &sample_tracks()).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hand written");
    }
}
