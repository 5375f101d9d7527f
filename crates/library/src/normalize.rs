use std::fs;
use std::path::{Path, PathBuf};

use common::{AlbumMetadata, TrackMetadata};
use metadata::{MetadataError, TagInfo};
use tracing::{debug, info};

use crate::filename::{canonical_name, sanitize_component};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed(PathBuf),
    AlreadyCanonical,
    TargetExists(PathBuf),
    /// Artist, album, track number or title could not be determined.
    MissingFields,
}

/// Renames `path` to `Artist - Album - NN - Title.ext` when every field can
/// be recovered from the filename, the embedded tags or the sidecar.
///
/// `read_tags` is only called when the filename leaves something unknown.
pub fn normalize_filename(
    path: &Path,
    parsed: Option<&TrackMetadata>,
    sidecar: Option<&AlbumMetadata>,
    read_tags: impl FnOnce(&Path) -> Result<TagInfo, MetadataError>,
) -> std::io::Result<RenameOutcome> {
    let mut fields = parsed.cloned().unwrap_or_default();

    let complete = |f: &TrackMetadata| {
        f.artist.is_some() && f.album.is_some() && f.track_number.is_some() && f.title.is_some()
    };

    if !complete(&fields) {
        match read_tags(path) {
            Ok(tags) => {
                fields.artist = fields.artist.or(tags.artist);
                fields.album = fields.album.or(tags.album);
                fields.track_number = fields.track_number.or(tags.track_no);
                fields.title = fields.title.or(tags.title);
            }
            Err(err) => debug!("No readable tags in {:?}: {}", path, err),
        }
    }

    if let Some(sidecar) = sidecar {
        fields.artist = fields.artist.or_else(|| sidecar.artist.clone());
        fields.album = fields.album.or_else(|| sidecar.album.clone());
        if fields.title.is_none() {
            fields.title = fields
                .track_number
                .and_then(|n| sidecar.tracks.get(&n).cloned());
        }
    }

    let (Some(artist), Some(album), Some(track_number), Some(title)) =
        (fields.artist, fields.album, fields.track_number, fields.title)
    else {
        return Ok(RenameOutcome::MissingFields);
    };
    if [&artist, &album, &title]
        .iter()
        .any(|value| sanitize_component(value).is_empty())
    {
        return Ok(RenameOutcome::MissingFields);
    }

    let extension = path.extension().map(|ext| ext.to_string_lossy().to_string());
    let name = canonical_name(&artist, &album, track_number, &title, extension.as_deref());
    let target = match path.parent() {
        Some(parent) => parent.join(&name),
        None => PathBuf::from(&name),
    };

    if target == path {
        return Ok(RenameOutcome::AlreadyCanonical);
    }
    if target.exists() {
        return Ok(RenameOutcome::TargetExists(target));
    }

    fs::rename(path, &target)?;
    info!("Renamed {:?} -> {:?}", path, target);
    Ok(RenameOutcome::Renamed(target))
}
