//! Installation strategies for a downloaded update payload.
//!
//! One attempt moves through `Idle -> Downloading -> Installing` and ends in
//! `Installed` or `Failed`. The payload is consumed as a stream; nothing is
//! held in memory beyond the current chunk.

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::release::Platform;
use crate::transfer::{ByteStream, TransferError};

/// Shown when an install fails on permissions. This text is part of the
/// user-facing contract, not debug output.
pub const PERMISSION_GUIDANCE: &str = "\
Scribe could not write the new version. To finish updating:
  1. Download the latest release manually and install it yourself, or
  2. Re-run Scribe with elevated privileges and retry the update, or
  3. Move Scribe to a user-writable location (such as your home directory) and retry.";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("update interrupted during download: {0}")]
    Transfer(#[from] TransferError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{details}\n{guidance}")]
    Permission {
        details: String,
        guidance: &'static str,
    },
    #[error("installer exited with {status}: {output}")]
    Installer {
        status: std::process::ExitStatus,
        output: String,
    },
    #[error("failed to resolve app paths: {0}")]
    Paths(#[from] scribe_platform::AppPathsError),
    #[error("{0}")]
    Unsupported(String),
}

impl InstallError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission {
                details: format!("{context}: {source}"),
                guidance: PERMISSION_GUIDANCE,
            }
        } else {
            Self::Io { context, source }
        }
    }

    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Permission { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Idle,
    Downloading,
    Installing,
    Installed,
    Failed,
}

/// Where and how this process is installed. Built once at startup for the
/// real process; tests construct it directly against scratch paths.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub executable: PathBuf,
    pub bundle_root: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    /// True when `executable` is the binary this process is running from,
    /// which requires the self-replace dance instead of a plain rename.
    pub replaces_running: bool,
}

impl InstallContext {
    /// Describe the currently running process.
    ///
    /// # Errors
    /// Returns an error when the executable path or the app cache directory
    /// cannot be resolved or created.
    pub fn for_current_process() -> Result<Self, InstallError> {
        let executable = std::env::current_exe()
            .map_err(|error| InstallError::io("failed to resolve current executable", error))?;
        let scratch_dir = scribe_platform::AppPaths::new()?.update_scratch_dir();
        std::fs::create_dir_all(&scratch_dir)
            .map_err(|error| InstallError::io("failed to create update scratch directory", error))?;
        Ok(Self {
            bundle_root: crate::restart::find_bundle_root(&executable),
            executable,
            scratch_dir,
            replaces_running: true,
        })
    }
}

/// What the platform can do with a resolved asset, decided once at startup
/// rather than by scattering OS checks through the install path.
#[derive(Debug, Clone, Copy)]
pub struct InstallCapabilities {
    pub patch_in_place: bool,
    pub install_package: bool,
}

impl InstallCapabilities {
    #[must_use]
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Windows | Platform::MacOs => Self {
                patch_in_place: true,
                install_package: true,
            },
            Platform::Linux => Self {
                patch_in_place: true,
                install_package: false,
            },
        }
    }
}

#[async_trait]
pub trait InstallStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drain the payload stream into a staged artifact. The existing
    /// installation is not touched until the staged artifact is committed.
    ///
    /// # Errors
    /// Returns an error when the stream is interrupted or staging cannot be
    /// written; nothing has been modified at that point.
    async fn stage(
        &self,
        ctx: &InstallContext,
        stream: ByteStream,
    ) -> Result<Box<dyn StagedInstall>, InstallError>;
}

/// A fully downloaded payload waiting for its irreversible step.
pub trait StagedInstall: Send {
    /// Perform the swap or installer run. Consumes the staged artifact; its
    /// backing temp file is removed afterwards either way.
    ///
    /// # Errors
    /// Returns an error when the swap or installer fails; the previous
    /// installation stays usable.
    fn commit(self: Box<Self>, ctx: &InstallContext) -> Result<(), InstallError>;
}

/// Pick a strategy for the resolved asset, once per operation.
///
/// # Errors
/// Returns [`InstallError::Unsupported`] when the platform cannot install
/// this kind of asset.
pub fn select_strategy(
    asset_name: &str,
    capabilities: InstallCapabilities,
    installer: Arc<dyn PackageInstaller>,
) -> Result<Box<dyn InstallStrategy>, InstallError> {
    let is_package = Path::new(asset_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pkg") || ext.eq_ignore_ascii_case("msi"));

    if is_package {
        if !capabilities.install_package {
            return Err(InstallError::Unsupported(format!(
                "package installs are not supported on this platform ({asset_name})"
            )));
        }
        Ok(Box::new(InstallPackage {
            installer,
            asset_name: asset_name.to_string(),
        }))
    } else {
        if !capabilities.patch_in_place {
            return Err(InstallError::Unsupported(format!(
                "binary patching is not supported on this platform ({asset_name})"
            )));
        }
        Ok(Box::new(PatchInPlace))
    }
}

/// Atomic in-place replacement of the installed executable. The payload is
/// written next to the target first; the swap is a rename, so a crash
/// mid-download never leaves a half-written binary in place.
pub struct PatchInPlace;

#[async_trait]
impl InstallStrategy for PatchInPlace {
    fn name(&self) -> &'static str {
        "patch-in-place"
    }

    async fn stage(
        &self,
        ctx: &InstallContext,
        mut stream: ByteStream,
    ) -> Result<Box<dyn StagedInstall>, InstallError> {
        let target = &ctx.executable;
        let target_dir = target.parent().ok_or_else(|| {
            InstallError::Unsupported(format!(
                "executable has no parent directory: {}",
                target.display()
            ))
        })?;

        // Same directory as the target so the final rename stays on one
        // filesystem. NamedTempFile removes itself on every exit path.
        let mut temp = tempfile::Builder::new()
            .prefix(".scribe-update-")
            .tempfile_in(target_dir)
            .map_err(|error| InstallError::io("failed to create staging file", error))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            temp.as_file_mut()
                .write_all(&chunk)
                .map_err(|error| InstallError::io("failed to write update payload", error))?;
        }
        temp.as_file_mut()
            .flush()
            .map_err(|error| InstallError::io("failed to flush update payload", error))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o755))
                .map_err(|error| InstallError::io("failed to mark new binary executable", error))?;
        }

        Ok(Box::new(StagedPatch { temp }))
    }
}

struct StagedPatch {
    temp: tempfile::NamedTempFile,
}

impl StagedInstall for StagedPatch {
    fn commit(self: Box<Self>, ctx: &InstallContext) -> Result<(), InstallError> {
        if ctx.replaces_running {
            info!("replacing running executable via self-replace");
            self_replace::self_replace(self.temp.path())
                .map_err(|error| InstallError::io("failed to replace running executable", error))?;
        } else {
            self.temp.persist(&ctx.executable).map_err(|error| {
                InstallError::io("failed to move new binary into place", error.error)
            })?;
        }

        info!("binary patch applied to {}", ctx.executable.display());
        Ok(())
    }
}

/// Runs the platform's installer program against a staged package file.
pub trait PackageInstaller: Send + Sync {
    /// # Errors
    /// Returns an error when the installer cannot be launched or exits with
    /// failure; its combined output is surfaced verbatim.
    fn install(&self, package: &Path) -> Result<(), InstallError>;
}

/// Delegates to a privileged platform installer. The package is fully
/// staged into the scratch directory first and removed again whatever the
/// installer does.
pub struct InstallPackage {
    installer: Arc<dyn PackageInstaller>,
    asset_name: String,
}

impl InstallPackage {
    #[must_use]
    pub fn new(installer: Arc<dyn PackageInstaller>, asset_name: &str) -> Self {
        Self {
            installer,
            asset_name: asset_name.to_string(),
        }
    }
}

#[async_trait]
impl InstallStrategy for InstallPackage {
    fn name(&self) -> &'static str {
        "install-package"
    }

    async fn stage(
        &self,
        ctx: &InstallContext,
        mut stream: ByteStream,
    ) -> Result<Box<dyn StagedInstall>, InstallError> {
        std::fs::create_dir_all(&ctx.scratch_dir)
            .map_err(|error| InstallError::io("failed to create scratch directory", error))?;

        let suffix = Path::new(&self.asset_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut temp = tempfile::Builder::new()
            .prefix("scribe-update-")
            .suffix(&suffix)
            .tempfile_in(&ctx.scratch_dir)
            .map_err(|error| InstallError::io("failed to create package staging file", error))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            temp.as_file_mut()
                .write_all(&chunk)
                .map_err(|error| InstallError::io("failed to write package payload", error))?;
        }
        temp.as_file_mut()
            .flush()
            .map_err(|error| InstallError::io("failed to flush package payload", error))?;

        Ok(Box::new(StagedPackage {
            temp,
            installer: Arc::clone(&self.installer),
        }))
    }
}

struct StagedPackage {
    temp: tempfile::NamedTempFile,
    installer: Arc<dyn PackageInstaller>,
}

impl StagedInstall for StagedPackage {
    fn commit(self: Box<Self>, _ctx: &InstallContext) -> Result<(), InstallError> {
        info!(
            "handing {} to the platform installer",
            self.temp.path().display()
        );
        // temp drops (and deletes) after this returns, success or failure.
        self.installer.install(self.temp.path())
    }
}

/// Real installer invocation: macOS `installer` behind an administrator
/// prompt, Windows `msiexec`. Anything else has no package format.
pub struct SystemInstaller;

impl PackageInstaller for SystemInstaller {
    #[cfg(target_os = "macos")]
    fn install(&self, package: &Path) -> Result<(), InstallError> {
        let script = format!(
            "do shell script \"installer -pkg '{}' -target /\" with administrator privileges",
            package.display()
        );
        let output = std::process::Command::new("osascript")
            .args(["-e", &script])
            .output()
            .map_err(|error| InstallError::io("failed to launch package installer", error))?;

        if output.status.success() {
            Ok(())
        } else {
            let combined = combined_output(&output);
            if looks_permission_denied(&combined) {
                return Err(InstallError::Permission {
                    details: format!("package installer refused: {combined}"),
                    guidance: PERMISSION_GUIDANCE,
                });
            }
            Err(InstallError::Installer {
                status: output.status,
                output: combined,
            })
        }
    }

    #[cfg(target_os = "windows")]
    fn install(&self, package: &Path) -> Result<(), InstallError> {
        let output = std::process::Command::new("msiexec")
            .args(["/i", &package.to_string_lossy(), "/passive"])
            .output()
            .map_err(|error| InstallError::io("failed to launch package installer", error))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(InstallError::Installer {
                status: output.status,
                output: combined_output(&output),
            })
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn install(&self, _package: &Path) -> Result<(), InstallError> {
        Err(InstallError::Unsupported(
            "package installs are only supported on macOS and Windows".to_string(),
        ))
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined
}

#[cfg(target_os = "macos")]
fn looks_permission_denied(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
}

/// Drives one install attempt and tracks its phase.
pub struct UpdateApplier {
    strategy: Box<dyn InstallStrategy>,
    phase: Mutex<ApplyPhase>,
}

impl UpdateApplier {
    #[must_use]
    pub fn new(strategy: Box<dyn InstallStrategy>) -> Self {
        Self {
            strategy,
            phase: Mutex::new(ApplyPhase::Idle),
        }
    }

    #[must_use]
    pub fn phase(&self) -> ApplyPhase {
        *self
            .phase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, next: ApplyPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("apply phase {:?} -> {next:?}", *phase);
        *phase = next;
    }

    /// Consume the tracked payload stream and install it.
    ///
    /// # Errors
    /// Returns the strategy's error; the phase ends in `Failed` and the
    /// previous installation stays usable.
    pub async fn apply(
        &self,
        ctx: &InstallContext,
        stream: ByteStream,
    ) -> Result<(), InstallError> {
        self.set_phase(ApplyPhase::Downloading);
        info!("applying update with {} strategy", self.strategy.name());

        let staged = match self.strategy.stage(ctx, stream).await {
            Ok(staged) => staged,
            Err(error) => {
                warn!("staging failed: {error}");
                self.set_phase(ApplyPhase::Failed);
                return Err(error);
            }
        };

        // The stream is fully drained here; the commit is the point of no
        // return for the swap or installer run.
        self.set_phase(ApplyPhase::Installing);
        match staged.commit(ctx) {
            Ok(()) => {
                self.set_phase(ApplyPhase::Installed);
                Ok(())
            }
            Err(error) => {
                warn!("install failed: {error}");
                self.set_phase(ApplyPhase::Failed);
                Err(error)
            }
        }
    }
}
