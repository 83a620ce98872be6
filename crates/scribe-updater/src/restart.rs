use log::info;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("failed to resolve current executable: {0}")]
    Resolve(#[source] std::io::Error),
    #[error("failed to launch replacement process: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type ShutdownHook = Box<dyn Fn() + Send + Sync>;

/// Relaunches the application after an update. The successor is
/// fire-and-forget; only after it has started does the current process get
/// asked to shut down, so a failed launch leaves the app running.
pub struct Restarter {
    shutdown: ShutdownHook,
}

impl Restarter {
    #[must_use]
    pub fn new(shutdown: ShutdownHook) -> Self {
        Self { shutdown }
    }

    /// Start a successor process and request shutdown of this one.
    ///
    /// # Errors
    /// Returns an error when the executable cannot be resolved or the
    /// successor cannot be spawned; the shutdown hook is not invoked then.
    pub fn restart(&self) -> Result<(), RestartError> {
        let exe = current_executable()?;
        self.restart_from(&exe)
    }

    fn restart_from(&self, exe: &Path) -> Result<(), RestartError> {
        let mut command = relaunch_command(exe);
        command.spawn().map_err(RestartError::Spawn)?;

        info!("replacement process started, requesting shutdown");
        (self.shutdown)();
        Ok(())
    }
}

/// Bundle executables must be reopened through the bundle, not re-executed
/// directly; a package install may have replaced the bundle around us.
fn relaunch_command(exe: &Path) -> Command {
    if cfg!(target_os = "macos")
        && let Some(bundle) = find_bundle_root(exe)
    {
        info!("relaunching app bundle {}", bundle.display());
        let mut command = Command::new("open");
        command.arg("-n").arg(bundle);
        return command;
    }

    info!("relaunching {}", exe.display());
    let mut command = Command::new(exe);
    command
        .args(std::env::args_os().skip(1))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}

fn current_executable() -> Result<PathBuf, RestartError> {
    let exe = std::env::current_exe().map_err(RestartError::Resolve)?;

    // On Linux, after self_replace, /proc/self/exe points at the old
    // deleted inode and current_exe() grows a " (deleted)" suffix. The new
    // binary lives at the plain path.
    #[cfg(target_os = "linux")]
    let exe = {
        let path_str = exe.to_string_lossy();
        if path_str.ends_with(" (deleted)") {
            PathBuf::from(path_str.trim_end_matches(" (deleted)"))
        } else {
            exe
        }
    };

    Ok(exe)
}

/// Walk from an executable up to the enclosing `.app` bundle, if any.
#[must_use]
pub fn find_bundle_root(executable: &Path) -> Option<PathBuf> {
    executable
        .ancestors()
        .find(|ancestor| ancestor.extension().and_then(|ext| ext.to_str()) == Some("app"))
        .map(Path::to_path_buf)
}
