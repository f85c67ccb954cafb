//! Tracing bootstrap: stderr plus a size-rotating file under the data root.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Rotate once the current file reaches this size.
const MAX_LOG_BYTES: u64 = 1024 * 1024;

struct Inner {
    dir: PathBuf,
    file: File,
    written: u64,
}

/// Log writer producing `log/<yyyymmdd-hhmm>.log` files, starting a new one
/// whenever the current file passes 1 MB.
#[derive(Clone)]
pub struct RotatingLogWriter {
    inner: Arc<Mutex<Inner>>,
}

impl RotatingLogWriter {
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (file, written) = open_log_file(dir)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                dir: dir.to_path_buf(),
                file,
                written,
            })),
        })
    }
}

fn open_log_file(dir: &Path) -> io::Result<(File, u64)> {
    let stamp = Local::now().format("%Y%m%d-%H%M");
    let mut path = dir.join(format!("{stamp}.log"));
    // Same-minute rotation lands on a suffixed file instead of appending
    // past the size limit.
    let mut seq = 1;
    while path.exists() && path.metadata().map(|m| m.len()).unwrap_or(0) >= MAX_LOG_BYTES {
        seq += 1;
        path = dir.join(format!("{stamp}.{seq}.log"));
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let written = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, written))
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.written >= MAX_LOG_BYTES {
            let (file, written) = open_log_file(&inner.dir)?;
            inner.file = file;
            inner.written = written;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.file.flush()
    }
}

/// Install the global subscriber: env-filtered stderr plus the rolling file.
pub fn init(log_dir: &Path) -> anyhow::Result<()> {
    let writer = RotatingLogWriter::open(log_dir)?;
    let make_writer = move || writer.clone();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(make_writer),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init tracing: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_creates_log_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = RotatingLogWriter::open(dir.path()).unwrap();
        writer.write_all(b"hello log\n").unwrap();
        writer.flush().unwrap();

        let count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".log")
            })
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rotation_after_size_limit() {
        let dir = TempDir::new().unwrap();
        let mut writer = RotatingLogWriter::open(dir.path()).unwrap();

        let line = vec![b'x'; 64 * 1024];
        for _ in 0..20 {
            writer.write_all(&line).unwrap();
        }
        writer.write_all(b"tail").unwrap();
        writer.flush().unwrap();

        let count = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".log")
            })
            .count();
        assert!(count >= 2, "expected a rotated file, found {count}");
    }
}
