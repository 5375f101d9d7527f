use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use library::{ArtSourceConfig, RepairOptions};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub version: u32,
    pub music_root: String,
    pub log_path: String,
    pub repair_metadata: bool,
    pub download_art: bool,
    pub generate_sidecar: bool,
    pub fix_filenames: bool,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub min_request_interval_ms: u64,
    pub musicbrainz_url: String,
    pub coverart_url: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        let options = RepairOptions::default();
        Self {
            version: CONFIG_VERSION,
            music_root: "".to_string(),
            log_path: "audio_repair_log.json".to_string(),
            repair_metadata: options.repair_metadata,
            download_art: options.download_art,
            generate_sidecar: options.generate_sidecar,
            fix_filenames: options.fix_filenames,
            user_agent: library::external::DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 10,
            min_request_interval_ms: 500,
            musicbrainz_url: library::external::DEFAULT_MUSICBRAINZ_URL.to_string(),
            coverart_url: library::external::DEFAULT_COVERART_URL.to_string(),
        }
    }
}

impl RepairConfig {
    pub fn options(&self) -> RepairOptions {
        RepairOptions {
            repair_metadata: self.repair_metadata,
            download_art: self.download_art,
            generate_sidecar: self.generate_sidecar,
            fix_filenames: self.fix_filenames,
        }
    }

    pub fn art_source(&self) -> ArtSourceConfig {
        ArtSourceConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            musicbrainz_url: self.musicbrainz_url.clone(),
            coverart_url: self.coverart_url.clone(),
        }
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("TAGMEND_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("tagmend.yaml"))
            .unwrap_or_else(|| PathBuf::from("tagmend.yaml")),
        Err(_) => PathBuf::from("tagmend.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(RepairConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: RepairConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.log_path.trim().is_empty() {
            config.log_path = RepairConfig::default().log_path;
        }
        if config.user_agent.trim().is_empty() {
            config.user_agent = library::external::DEFAULT_USER_AGENT.to_string();
        }
        if config.request_timeout_secs == 0 {
            config.request_timeout_secs = 10;
        }
        if config.musicbrainz_url.trim().is_empty() {
            config.musicbrainz_url = library::external::DEFAULT_MUSICBRAINZ_URL.to_string();
        }
        if config.coverart_url.trim().is_empty() {
            config.coverart_url = library::external::DEFAULT_COVERART_URL.to_string();
        }
        return Ok((config, false));
    }

    let config = RepairConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &RepairConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_music_root(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
