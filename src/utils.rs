use anyhow::{Context, Result};
use chrono::Local;
use log::{LevelFilter, Metadata, Record};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::Path;

// Logging and terminal helpers for the marketchat binary

const CRATE_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Writes log lines to the session log file, or to stderr when there is
/// none, so stdout stays free for the conversation.
///
/// Records from other crates (reqwest, tungstenite, rustls) are capped at
/// `Warn` unless the level is `Trace`.
pub struct ChatLogger {
    level: LevelFilter,
    file: Option<File>,
}

impl ChatLogger {
    pub fn new(level: LevelFilter, path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                Some(file)
            }
            None => None,
        };
        Ok(ChatLogger { level, file })
    }

    fn limit_for(&self, target: &str) -> LevelFilter {
        let ours = target == CRATE_TARGET || target.starts_with(&format!("{}::", CRATE_TARGET));
        if ours || self.level == LevelFilter::Trace {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }

    fn format(record: &Record) -> String {
        format!(
            "[{}] {:<5} {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or_else(|| record.target()),
            record.args()
        )
    }
}

impl log::Log for ChatLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.limit_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = Self::format(record);
        match &self.file {
            Some(file) => {
                let mut file: &File = file;
                let _ = file.write_all(line.as_bytes());
            }
            None => eprint!("{}", line),
        }
    }

    fn flush(&self) {
        if let Some(mut file) = self.file.as_ref() {
            let _ = file.flush();
        }
    }
}

/// Print `label` on stderr and read one trimmed line from stdin.
/// `None` on end of input or an empty answer.
pub fn prompt(label: &str) -> Option<String> {
    eprint!("{} ", label);
    let _ = io::stderr().flush();
    read_answer(&mut io::stdin().lock())
}

fn read_answer(input: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let answer = line.trim();
            (!answer.is_empty()).then(|| answer.to_string())
        }
    }
}

pub fn setup_logging(log_file: Option<&Path>, level: LevelFilter) -> Result<()> {
    let logger = ChatLogger::new(level, log_file)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);

    log::info!("{} {} logging at {}", CRATE_TARGET, env!("CARGO_PKG_VERSION"), level);
    Ok(())
}
