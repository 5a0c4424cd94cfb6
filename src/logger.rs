//! Leveled log writer.
//!
//! Request-path chatter (`[INC]`, `[API]`, `[DIR]`, ...) logs at the spam
//! level so production embedders can silence it wholesale; per-path muting is
//! handled by the dispatcher before it calls in here. Output goes to
//! stdout/stderr by default, or to a file when configured.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::Local;

use crate::config::LoggingConfig;

static LOGGER: OnceLock<Logger> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Spam,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Self::Spam => "SPAM",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    fn parse(name: &str) -> Self {
        match name {
            "spam" => Self::Spam,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

enum Target {
    Console,
    File(Mutex<File>),
}

struct Logger {
    min_level: Level,
    target: Target,
}

/// Initialize the global logger. Later calls are no-ops, which keeps multiple
/// servers in one process from fighting over it.
pub fn init(config: &LoggingConfig) -> io::Result<()> {
    let target = match config.file.as_deref() {
        Some(path) => Target::File(Mutex::new(open_log_file(path)?)),
        None => Target::Console,
    };
    let _ = LOGGER.set(Logger {
        min_level: Level::parse(&config.level),
        target,
    });
    Ok(())
}

fn open_log_file(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

pub fn log(message: &str, level: Level) {
    match LOGGER.get() {
        Some(logger) => {
            if level < logger.min_level {
                return;
            }
            let line = format!(
                "[{}] [{}] {message}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                level.tag()
            );
            match &logger.target {
                Target::Console => {
                    if level >= Level::Warn {
                        eprintln!("{line}");
                    } else {
                        println!("{line}");
                    }
                }
                Target::File(file) => {
                    if let Ok(mut f) = file.lock() {
                        let _ = writeln!(f, "{line}");
                    }
                }
            }
        }
        // Uninitialized logger falls back to the console, warnings and up.
        None => {
            if level >= Level::Warn {
                eprintln!("[{}] {message}", level.tag());
            }
        }
    }
}

pub fn spam(message: &str) {
    log(message, Level::Spam);
}

pub fn info(message: &str) {
    log(message, Level::Info);
}

pub fn warn(message: &str) {
    log(message, Level::Warn);
}

pub fn error(message: &str) {
    log(message, Level::Error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_order() {
        assert!(Level::Spam < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("spam"), Level::Spam);
        assert_eq!(Level::parse("warning"), Level::Warn);
        assert_eq!(Level::parse("unknown"), Level::Info);
    }
}
