#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use berth_platform::AppPaths;

/// Log writer that survives the log file being deleted or rotated away
/// underneath the process.
struct ReopeningLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl ReopeningLogWriter {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }
}

impl Write for ReopeningLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !self.path.exists() {
            *guard = Self::open_append(&self.path)?;
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

/// Drop the older half of the log, aligned to the next line boundary.
fn trim_oversized_log(path: &Path, max_size: u64) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() <= max_size {
        return;
    }
    let Ok(contents) = std::fs::read(path) else {
        return;
    };
    let half = contents.len() / 2;
    let keep_from = contents[half..]
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(half, |offset| half + offset + 1);
    let _ = std::fs::write(path, &contents[keep_from..]);
}

pub fn init_logging(debug_enabled: bool, max_log_size: u64) {
    let Ok(paths) = AppPaths::new() else {
        return;
    };
    let _ = paths.ensure_dirs();
    let log_path = paths.log_file();

    trim_oversized_log(&log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("berth")
        .build();

    let file_logger = ReopeningLogWriter::open(log_path.clone())
        .ok()
        .map(|writer| WriteLogger::new(LevelFilter::Debug, config.clone(), writer));

    #[cfg(debug_assertions)]
    {
        let term_logger = TermLogger::new(
            LevelFilter::Debug,
            config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
        let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![term_logger];
        if let Some(file_logger) = file_logger {
            loggers.push(file_logger);
        }
        let _ = CombinedLogger::init(loggers);
    }

    #[cfg(not(debug_assertions))]
    {
        if let Some(file_logger) = file_logger {
            let _ = CombinedLogger::init(vec![file_logger]);
        }
    }

    set_logging_enabled(debug_enabled);

    if debug_enabled {
        log::info!("Debug logging enabled, log file: {}", log_path.display());
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

    use super::{ReopeningLogWriter, set_logging_enabled, trim_oversized_log};

    #[test]
    fn writer_reopens_after_the_log_file_disappears() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("berth.log");
        let mut writer =
            ReopeningLogWriter::open(log_path.clone()).expect("writer should open log file");

        writer
            .write_all(b"before rotation\n")
            .expect("initial write should succeed");
        std::fs::remove_file(&log_path).expect("log file should be removable");
        writer
            .write_all(b"after rotation\n")
            .expect("writer should recreate the file");

        let contents =
            std::fs::read_to_string(&log_path).expect("recreated file should be readable");
        assert_eq!(contents, "after rotation\n");
    }

    #[test]
    fn trim_keeps_the_newest_half_on_a_line_boundary() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("berth.log");
        std::fs::write(&log_path, "one\ntwo\nthree\nfour\nfive\n")
            .expect("test log file should be written");

        trim_oversized_log(&log_path, 8);

        let trimmed =
            std::fs::read_to_string(&log_path).expect("trimmed log file should be readable");
        assert!(!trimmed.contains("one"));
        assert!(trimmed.ends_with("five\n"));
        assert!(trimmed.starts_with("three\n") || trimmed.starts_with("four\n"));
    }

    #[test]
    fn trim_leaves_small_files_alone() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let log_path = temp_dir.path().join("berth.log");
        std::fs::write(&log_path, "short\n").expect("test log file should be written");

        trim_oversized_log(&log_path, 1024);

        let contents = std::fs::read_to_string(&log_path).expect("log file should be readable");
        assert_eq!(contents, "short\n");
    }

    #[test]
    fn logging_toggle_moves_the_global_level() {
        set_logging_enabled(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);

        set_logging_enabled(false);
        assert_eq!(log::max_level(), log::LevelFilter::Off);
    }
}
