//! File logging for update sessions.
//!
//! The log lives in the app cache directory, so the user can delete it (or
//! the whole directory) while the app is running; the writer reopens its
//! file whenever the path disappears. Oversized logs are rotated aside at
//! startup so one file never grows unbounded across sessions.

#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::AppPaths;

/// How the log file is set up at startup.
pub struct LogOptions {
    /// Explicit log file location; resolved from [`AppPaths`] when `None`.
    pub file: Option<PathBuf>,
    /// Initial state of the debug toggle; flipped later through
    /// [`set_logging_enabled`] when the user changes the setting.
    pub debug_enabled: bool,
    /// Once the file grows past this many bytes it is rotated aside to
    /// `<name>.old` on the next startup.
    pub max_file_size: u64,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            file: None,
            debug_enabled: false,
            max_file_size: 1024 * 1024,
        }
    }
}

fn append_handle(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Log file handle that survives its file being deleted out from under it.
struct SelfHealingWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl SelfHealingWriter {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = append_handle(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl Write for SelfHealingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !self.path.exists() {
            *guard = append_handle(&self.path)?;
        }
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .flush()
    }
}

/// Move an oversized log aside, keeping the previous session's log around
/// for one generation as `<name>.old`.
fn rotate_if_oversized(path: &Path, max_file_size: u64) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() <= max_file_size {
        return;
    }
    let mut aside = path.as_os_str().to_owned();
    aside.push(".old");
    let _ = std::fs::rename(path, PathBuf::from(aside));
}

/// Install the global logger. Failures are swallowed: an app that cannot
/// log still has to run.
pub fn init_logging(options: &LogOptions) {
    let log_path = match &options.file {
        Some(path) => path.clone(),
        None => {
            let Ok(paths) = AppPaths::new() else {
                return;
            };
            let _ = paths.ensure_dirs();
            paths.log_file()
        }
    };

    rotate_if_oversized(&log_path, options.max_file_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("scribe")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if let Ok(writer) = SelfHealingWriter::open(log_path.clone()) {
        loggers.push(WriteLogger::new(LevelFilter::Debug, config.clone(), writer));
    }

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));

    if loggers.is_empty() {
        return;
    }
    let _ = CombinedLogger::init(loggers);
    set_logging_enabled(options.debug_enabled);

    if options.debug_enabled {
        log::info!("debug logging enabled, log file: {}", log_path.display());
    }
}

pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Off);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{
        LogOptions, SelfHealingWriter, init_logging, rotate_if_oversized, set_logging_enabled,
    };

    #[test]
    fn writer_reopens_after_the_log_file_is_deleted() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("session.log");
        let mut writer =
            SelfHealingWriter::open(log_path.clone()).expect("writer should open log file");

        writer
            .write_all(b"before\n")
            .expect("initial write should succeed");
        std::fs::remove_file(&log_path).expect("log file should be removable");
        writer
            .write_all(b"after\n")
            .expect("writer should reopen after deletion");

        let contents =
            std::fs::read_to_string(&log_path).expect("reopened file should be readable");
        assert_eq!(contents, "after\n");
    }

    #[test]
    fn oversized_log_is_rotated_aside() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, vec![b'x'; 64]).expect("test log file should be written");

        rotate_if_oversized(&log_path, 16);

        assert!(
            !log_path.exists(),
            "a new session should start with a fresh file"
        );
        let aside = std::fs::read(temp_dir.path().join("debug.log.old"))
            .expect("previous session's log should be kept aside");
        assert_eq!(aside.len(), 64);
    }

    #[test]
    fn small_log_stays_in_place() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, b"short\n").expect("test log file should be written");

        rotate_if_oversized(&log_path, 16);

        assert!(log_path.exists());
        assert!(!temp_dir.path().join("debug.log.old").exists());
    }

    #[test]
    fn init_logging_writes_to_the_chosen_file_and_toggles_level() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("debug.log");

        init_logging(&LogOptions {
            file: Some(log_path.clone()),
            debug_enabled: true,
            ..LogOptions::default()
        });
        assert_eq!(log::max_level(), log::LevelFilter::Debug);

        log::info!("update session started");
        log::logger().flush();
        let contents = std::fs::read_to_string(&log_path).expect("log file should be readable");
        assert!(contents.contains("update session started"));

        set_logging_enabled(false);
        assert_eq!(log::max_level(), log::LevelFilter::Off);
        set_logging_enabled(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
    }
}
