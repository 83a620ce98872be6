//! Ties discovery, transfer, install, and notification together.
//!
//! One orchestrator lives for the whole app session. Checks are cheap and
//! may run concurrently; download/install is single-flight, guarded here so
//! two operations can never race on the executable or scratch files.

use futures_util::TryStreamExt;
use log::{debug, info, warn};
use semver::Version;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::apply::{
    InstallCapabilities, InstallContext, InstallError, PackageInstaller, SystemInstaller,
    UpdateApplier, select_strategy,
};
use crate::clock::{Clock, SystemClock};
use crate::config::UpdateConfig;
use crate::events::{Notifier, NullNotifier, UpdateEvent};
use crate::release::{FetchError, Platform, fetch_latest};
use crate::transfer::{ProgressObserver, TransferError, track};
use crate::version::{VersionError, is_newer, parse_version, running_version};

/// Grace period before the launch-time auto check, so it does not compete
/// with startup for network and CPU.
pub const AUTO_CHECK_SETTLE_DELAY: Duration = Duration::from_secs(5);

const USER_AGENT: &str = "scribe";

/// Result of one update check. Derived fresh every call, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub available: bool,
    pub current_version: String,
    pub latest_version: String,
    pub download_url: String,
    pub changelog: String,
    pub required: bool,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("remote release carries an unparsable version: {0}")]
    RemoteVersion(#[from] VersionError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("an update operation is already in progress")]
    Busy,
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Install(#[from] InstallError),
}

pub struct UpdateOrchestrator {
    client: reqwest::Client,
    current_version: Version,
    config: RwLock<UpdateConfig>,
    config_path: Option<PathBuf>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    installer: Arc<dyn PackageInstaller>,
    capabilities: InstallCapabilities,
    ctx: InstallContext,
    in_flight: Mutex<()>,
}

impl UpdateOrchestrator {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        current_version: &str,
        config: UpdateConfig,
        ctx: InstallContext,
    ) -> Self {
        Self {
            client,
            current_version: running_version(current_version),
            config: RwLock::new(config),
            config_path: None,
            notifier: Arc::new(NullNotifier),
            clock: Arc::new(SystemClock),
            installer: Arc::new(SystemInstaller),
            capabilities: InstallCapabilities::for_platform(Platform::current()),
            ctx,
            in_flight: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = installer;
        self
    }

    /// Persist `last_check` updates to this path after auto checks.
    #[must_use]
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Swap in a new configuration wholesale (settings screen applied).
    /// Side effects of settings, like the debug logging toggle, take effect
    /// here as well.
    pub fn replace_config(&self, config: UpdateConfig) {
        scribe_platform::set_logging_enabled(config.debug_logging);
        *self
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn config_snapshot(&self) -> UpdateConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the releases endpoint whether a newer version exists.
    ///
    /// Pure read; safe to call repeatedly and concurrently with itself.
    ///
    /// # Errors
    /// Returns an error when the fetch fails or the remote version string
    /// does not parse. The running binary's own version never fails here.
    pub async fn check_for_update(&self) -> Result<UpdateStatus, CheckError> {
        let endpoint = self.config_snapshot().update_url;
        let descriptor = fetch_latest(&self.client, &endpoint).await?;
        let latest = parse_version(&descriptor.version)?;

        Ok(UpdateStatus {
            available: is_newer(&latest, &self.current_version),
            current_version: self.current_version.to_string(),
            latest_version: latest.to_string(),
            download_url: descriptor.download_url,
            changelog: descriptor.changelog,
            required: descriptor.required,
        })
    }

    /// Download the asset at `download_url` and install it.
    ///
    /// Emits `download:start`, `download:progress`*, then exactly one of
    /// `download:complete` / `download:error` as the final event.
    ///
    /// # Errors
    /// Returns [`UpdateError::Busy`] immediately when another operation is
    /// in flight, otherwise the transfer or install failure. Every error is
    /// terminal for this attempt; retrying is the caller's decision.
    pub async fn download_and_install(&self, download_url: &str) -> Result<(), UpdateError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("rejecting concurrent download_and_install");
            return Err(UpdateError::Busy);
        };

        self.notifier.notify(UpdateEvent::DownloadStart);
        let result = self.run_download(download_url).await;
        match &result {
            Ok(()) => self.notifier.notify(UpdateEvent::DownloadComplete),
            Err(error) => self.notifier.notify(UpdateEvent::DownloadError {
                message: error.to_string(),
            }),
        }
        result
    }

    async fn run_download(&self, download_url: &str) -> Result<(), UpdateError> {
        info!("downloading update from {download_url}");

        let response = self
            .client
            .get(download_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(TransferError::Request)?;

        if !response.status().is_success() {
            return Err(TransferError::HttpStatus(response.status()).into());
        }

        // A missing Content-Length degrades to indeterminate progress.
        let total = response.content_length().unwrap_or(0);

        let asset_name = asset_name_from_url(download_url);
        let strategy = select_strategy(asset_name, self.capabilities, Arc::clone(&self.installer))?;

        let notifier = Arc::clone(&self.notifier);
        let observer: ProgressObserver = Arc::new(move |progress| {
            notifier.notify(UpdateEvent::DownloadProgress(progress));
        });
        let stream = track(
            response.bytes_stream().map_err(TransferError::Stream),
            total,
            Some(observer),
        );

        let applier = UpdateApplier::new(strategy);
        applier.apply(&self.ctx, stream).await?;
        Ok(())
    }

    /// Launch-time background check: wait out the settle delay, honor the
    /// configured check interval, then notify `available` / `no-update` /
    /// `check:error`. Never blocks the caller, never returns an error; the
    /// handle exists so tests can await completion.
    pub fn auto_check(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.clock.sleep(AUTO_CHECK_SETTLE_DELAY).await;

            if !this.config_snapshot().should_check(this.clock.now()) {
                debug!("auto update check skipped (disabled or within interval)");
                return;
            }

            match this.check_for_update().await {
                Ok(status) if status.available => {
                    info!(
                        "update available: {} -> {}",
                        status.current_version, status.latest_version
                    );
                    this.record_check();
                    this.notifier.notify(UpdateEvent::Available(status));
                }
                Ok(status) => {
                    debug!("no update available ({})", status.current_version);
                    this.record_check();
                    this.notifier.notify(UpdateEvent::NoUpdate(status));
                }
                Err(error) => {
                    warn!("auto update check failed: {error}");
                    this.notifier.notify(UpdateEvent::CheckError {
                        message: error.to_string(),
                    });
                }
            }
        })
    }

    /// A failed check does not move `last_check`, so the next launch
    /// retries instead of waiting out the interval.
    fn record_check(&self) {
        let snapshot = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            config.record_check(self.clock.now());
            config.clone()
        };
        if let Some(path) = &self.config_path
            && let Err(error) = snapshot.save(path)
        {
            warn!("failed to persist update config: {error}");
        }
    }
}

fn asset_name_from_url(download_url: &str) -> &str {
    // Query and fragment are not part of the asset name; a signed download
    // URL must still select the right strategy.
    let stripped = download_url
        .split(['?', '#'])
        .next()
        .unwrap_or(download_url);
    let raw_name = stripped.rsplit('/').next().unwrap_or("update-download");
    Path::new(raw_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or("update-download")
}
