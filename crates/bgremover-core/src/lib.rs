//! Core logic for BG Remover that does not depend on the UI:
//! - Dotted version parsing and comparison.
//! - Latest-release lookup against the GitHub releases API.
//! - Downloading an update and handing it to a detached replacement helper.
//! - The background-removal engine boundary and image I/O.

pub mod auto_update;
pub mod handoff;
pub mod release;
pub mod removal;
pub mod version;

/// Update download/installation flow.
pub use auto_update::{
    AutoUpdateError, HandoffTicket, InstallOptions, PreparedUpdate, STALE_UPDATE_AGE, UpdateAsset,
    UpdateProgress, cleanup_stale_update_dirs, download_and_install, hand_off, prepare_update,
    select_update_asset,
};
/// Release metadata model and update check.
pub use release::{
    AppUpdate, ReleaseAsset, ReleaseInfo, ReleaseSource, UpdateCheck, UpdateError,
    check_for_update, fetch_latest_release,
};
/// Background removal engine boundary.
pub use removal::{BackgroundRemover, RembgCommand, RemovalError};
/// Version comparison helpers.
pub use version::{Version, VersionParseError, is_newer};
