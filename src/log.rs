use crate::common::lock;
use crate::error::{Error, Result};
use slog::{o, Drain, Logger};
use std::fs::{File, OpenOptions};
use std::io::{prelude::*, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Receives one line per pool lifecycle event.
pub trait LogSink: Send + Sync {
    fn write(&self, message: &str);
}

/// Appends every event to a file, one per line
pub struct FileLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileLog {
    pub fn new(path: &Path) -> Result<FileLog> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(FileLog {
            path: path.to_owned(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, content: &str) -> Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(content.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(Error::from)
    }
}

impl LogSink for FileLog {
    fn write(&self, message: &str) {
        if let Err(e) = self.append(message) {
            eprintln!("error to write {}, {}", self.path.display(), e);
        }
    }
}

/// Terminal logger with an async drain.
pub fn terminal_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

/// Logger that drops everything, the default when none is given.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
