//! Album art lookups against MusicBrainz and the Cover Art Archive.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::AlbumKey;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::log::ProcessingLog;

pub const DEFAULT_USER_AGENT: &str =
    "AudioMetadataRepair/2.0 (https://github.com/bschwebs/AudioMetaDataRepair)";
pub const DEFAULT_MUSICBRAINZ_URL: &str = "https://musicbrainz.org/ws/2";
pub const DEFAULT_COVERART_URL: &str = "https://coverartarchive.org";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverTarget<'a> {
    ReleaseGroup(&'a str),
    Release(&'a str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoverFetch {
    Found(Bytes),
    NotFound,
    /// Any other HTTP status.
    Unavailable(u16),
}

#[derive(Debug)]
pub enum ExternalError {
    Http(reqwest::Error),
    Status(u16),
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalError::Http(err) => write!(f, "http error: {}", err),
            ExternalError::Status(status) => write!(f, "http {}", status),
        }
    }
}

impl std::error::Error for ExternalError {}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        ExternalError::Http(err)
    }
}

/// The network calls album art resolution is built from.
pub trait ArtSource {
    /// Best textual match for the album, if any.
    fn search_release_group(&self, artist: &str, album: &str) -> Result<Option<String>, ExternalError>;

    /// Release ids belonging to a release group, in service order.
    fn release_group_releases(&self, release_group_id: &str) -> Result<Vec<String>, ExternalError>;

    fn front_cover(&self, target: CoverTarget<'_>) -> Result<CoverFetch, ExternalError>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtResolution {
    pub image: Option<Bytes>,
    pub release_group_id: Option<String>,
}

impl ArtResolution {
    fn nothing() -> Self {
        Self::default()
    }
}

/// Finds front cover art for an album.
///
/// The release group id is returned whenever one was settled on, even if no
/// usable image came back, so callers can persist it. Network failures never
/// escape; they degrade to an empty resolution.
pub fn resolve_art(
    source: &dyn ArtSource,
    artist: &str,
    album: &str,
    known_release_group_id: Option<&str>,
) -> ArtResolution {
    let release_group_id = match known_release_group_id {
        Some(id) => id.to_string(),
        None => match source.search_release_group(artist, album) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("No release group match for {} - {}", artist, album);
                return ArtResolution::nothing();
            }
            Err(err) => {
                warn!("Release group search failed for {} - {}: {}", artist, album, err);
                return ArtResolution::nothing();
            }
        },
    };

    match source.front_cover(CoverTarget::ReleaseGroup(&release_group_id)) {
        Ok(CoverFetch::Found(image)) => ArtResolution {
            image: Some(image),
            release_group_id: Some(release_group_id),
        },
        Ok(CoverFetch::NotFound) => {
            let image = release_fallback(source, &release_group_id);
            ArtResolution {
                image,
                release_group_id: Some(release_group_id),
            }
        }
        Ok(CoverFetch::Unavailable(status)) => {
            warn!("Cover art for release group {} returned http {}", release_group_id, status);
            ArtResolution {
                image: None,
                release_group_id: Some(release_group_id),
            }
        }
        Err(err) => {
            warn!("Cover art fetch failed for release group {}: {}", release_group_id, err);
            ArtResolution::nothing()
        }
    }
}

fn release_fallback(source: &dyn ArtSource, release_group_id: &str) -> Option<Bytes> {
    let releases = match source.release_group_releases(release_group_id) {
        Ok(releases) => releases,
        Err(err) => {
            warn!("Release lookup failed for release group {}: {}", release_group_id, err);
            return None;
        }
    };
    let release_id = releases.first()?;
    match source.front_cover(CoverTarget::Release(release_id)) {
        Ok(CoverFetch::Found(image)) => Some(image),
        Ok(_) => {
            debug!("No front cover for release {}", release_id);
            None
        }
        Err(err) => {
            warn!("Cover art fetch failed for release {}: {}", release_id, err);
            None
        }
    }
}

/// Enforces a minimum gap between consecutive network attempts.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Operator-driven retry with a known release group id.
///
/// This is the only path that replaces a failed art entry; the log is
/// updated in memory and left for the caller to save.
pub fn retry_album_art(
    source: &dyn ArtSource,
    log: &mut ProcessingLog,
    key: &AlbumKey,
    release_group_id: &str,
) -> ArtResolution {
    let resolution = resolve_art(source, &key.artist, &key.album, Some(release_group_id));
    let recorded_id = resolution
        .release_group_id
        .clone()
        .unwrap_or_else(|| release_group_id.to_string());
    log.mark_album_art(key, resolution.image.is_some(), Some(recorded_id));
    info!(
        "Retried art for {}: {}",
        key,
        if resolution.image.is_some() { "found" } else { "not found" }
    );
    resolution
}

/// Looks up release group ids for several albums, one throttled call each.
pub fn search_release_groups(
    source: &dyn ArtSource,
    keys: &[AlbumKey],
    throttle: &mut Throttle,
) -> Vec<(AlbumKey, Option<String>)> {
    let mut results = Vec::with_capacity(keys.len());
    for key in keys {
        if key.artist.trim().is_empty() || key.album.trim().is_empty() {
            results.push((key.clone(), None));
            continue;
        }
        throttle.wait();
        let id = match source.search_release_group(&key.artist, &key.album) {
            Ok(id) => id,
            Err(err) => {
                warn!("Release group search failed for {}: {}", key, err);
                None
            }
        };
        results.push((key.clone(), id));
    }
    results
}

#[derive(Clone, Debug)]
pub struct ArtSourceConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub musicbrainz_url: String,
    pub coverart_url: String,
}

impl Default for ArtSourceConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            musicbrainz_url: DEFAULT_MUSICBRAINZ_URL.to_string(),
            coverart_url: DEFAULT_COVERART_URL.to_string(),
        }
    }
}

/// Blocking client for the public MusicBrainz and Cover Art Archive APIs.
///
/// Must be created and dropped outside of an async runtime.
pub struct MusicBrainzClient {
    client: Client,
    config: ArtSourceConfig,
}

impl MusicBrainzClient {
    pub fn new(config: ArtSourceConfig) -> Result<Self, ExternalError> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, ExternalError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.config.timeout)
            .header("User-Agent", self.config.user_agent.trim())
            .send()?;
        Ok(response)
    }
}

#[derive(Deserialize)]
struct ReleaseGroupSearchResponse {
    #[serde(rename = "release-groups")]
    release_groups: Option<Vec<MusicBrainzEntity>>,
}

#[derive(Deserialize)]
struct ReleaseGroupLookupResponse {
    releases: Option<Vec<MusicBrainzEntity>>,
}

#[derive(Deserialize)]
struct MusicBrainzEntity {
    id: String,
}

impl ArtSource for MusicBrainzClient {
    fn search_release_group(&self, artist: &str, album: &str) -> Result<Option<String>, ExternalError> {
        let query = search_query(artist, album);
        let url = format!(
            "{}/release-group?query={}&fmt=json&limit=1",
            self.config.musicbrainz_url.trim_end_matches('/'),
            url_escape(&query)
        );
        let response = self.get(&url)?;
        if !response.status().is_success() {
            return Err(ExternalError::Status(response.status().as_u16()));
        }
        let payload = response.json::<ReleaseGroupSearchResponse>()?;
        Ok(payload
            .release_groups
            .and_then(|items| items.into_iter().next())
            .map(|group| group.id))
    }

    fn release_group_releases(&self, release_group_id: &str) -> Result<Vec<String>, ExternalError> {
        let url = format!(
            "{}/release-group/{}?inc=releases&fmt=json",
            self.config.musicbrainz_url.trim_end_matches('/'),
            url_escape(release_group_id)
        );
        let response = self.get(&url)?;
        if !response.status().is_success() {
            return Err(ExternalError::Status(response.status().as_u16()));
        }
        let payload = response.json::<ReleaseGroupLookupResponse>()?;
        Ok(payload
            .releases
            .unwrap_or_default()
            .into_iter()
            .map(|release| release.id)
            .collect())
    }

    fn front_cover(&self, target: CoverTarget<'_>) -> Result<CoverFetch, ExternalError> {
        let (kind, id) = match target {
            CoverTarget::ReleaseGroup(id) => ("release-group", id),
            CoverTarget::Release(id) => ("release", id),
        };
        let url = format!(
            "{}/{}/{}/front",
            self.config.coverart_url.trim_end_matches('/'),
            kind,
            url_escape(id)
        );
        let response = self.get(&url)?;
        match response.status() {
            StatusCode::OK => Ok(CoverFetch::Found(response.bytes()?)),
            StatusCode::NOT_FOUND => Ok(CoverFetch::NotFound),
            status => Ok(CoverFetch::Unavailable(status.as_u16())),
        }
    }
}

fn search_query(artist: &str, album: &str) -> String {
    format!("artist:\"{}\" AND release:\"{}\"", artist, album)
}

fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
