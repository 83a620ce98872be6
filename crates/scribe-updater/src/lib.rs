//! Self-update subsystem for Scribe.
//!
//! This crate owns everything between "is there a newer release?" and
//! "the new version is running":
//! - Release discovery against the GitHub releases API and platform asset
//!   selection.
//! - Streaming downloads with progress reporting in bounded memory.
//! - Platform install strategies (atomic in-place binary patch, or a
//!   privileged package installer driven out-of-process).
//! - Relaunching the app after a successful install.
//!
//! The host UI consumes it through [`UpdateOrchestrator`] and the
//! [`Notifier`] event channel; nothing in here touches UI state directly.

pub mod apply;
mod clock;
pub mod config;
mod events;
mod orchestrator;
mod release;
mod restart;
mod transfer;
mod version;

pub use apply::{
    InstallCapabilities, InstallContext, InstallError, InstallStrategy, PackageInstaller,
    StagedInstall, SystemInstaller, UpdateApplier, select_strategy,
};
pub use clock::{Clock, SystemClock};
pub use config::UpdateConfig;
pub use events::{ChannelNotifier, Notifier, NullNotifier, UpdateEvent};
pub use orchestrator::{
    AUTO_CHECK_SETTLE_DELAY, CheckError, UpdateError, UpdateOrchestrator, UpdateStatus,
};
pub use release::{
    DEFAULT_UPDATE_URL, FetchError, GitHubRelease, Platform, ReleaseAsset, ReleaseDescriptor,
    fetch_latest,
};
pub use restart::{RestartError, Restarter, ShutdownHook, find_bundle_root};
pub use transfer::{
    ByteStream, ProgressObserver, ProgressTracker, TransferError, TransferProgress, track,
};
pub use version::{BASELINE_VERSION, VersionError, is_newer, parse_version, running_version};
