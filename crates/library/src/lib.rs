pub mod external;
pub mod filename;
pub mod log;
pub mod normalize;
pub mod repair;
pub mod sidecar;

pub use external::{
    resolve_art, retry_album_art, search_release_groups, ArtResolution, ArtSource,
    ArtSourceConfig, CoverFetch, CoverTarget, ExternalError, MusicBrainzClient, Throttle,
};
pub use filename::{canonical_name, parse_filename, sanitize_component, FilenameError};
pub use log::{AlbumArtEntry, LogError, ProcessedFile, ProcessingLog};
pub use normalize::{normalize_filename, RenameOutcome};
pub use repair::{
    collect_audio_files, FailedFile, FailureReason, FileOutcome, RepairError, RepairEvent,
    RepairOptions, RepairSession, RepairSummary,
};
pub use sidecar::{parse_sidecar, read_sidecar, render_sidecar, write_sidecar, SidecarError, SIDECAR_FILE_NAME};
