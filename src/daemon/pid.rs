//! PID file with an exclusive advisory lock.
//!
//! The lock, not the file's existence, is the source of truth: a stale
//! file left by a crashed daemon is unlocked and gets taken over silently.
//! External observers use [`is_running`], which reads the PID through the
//! same descriptor it probed the lock on, so there is no window for the
//! file to be swapped between the check and the read.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use fs2::FileExt;
use tracing::debug;

use crate::config::Paths;
use crate::errors::{Error, Result};

/// Holds the PID file open and locked for the process lifetime. Dropping
/// the value releases the lock but leaves the file; call `release` for a
/// clean removal on shutdown.
#[derive(Debug)]
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    /// Create or open the PID file (0600), take the exclusive lock
    /// non-blocking, and write the current PID. Fails when another
    /// instance holds the lock.
    pub fn acquire(paths: &Paths) -> Result<Self> {
        let path = paths.pid_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| Error::config(format!("open pid file {}: {}", path.display(), e)))?;

        file.try_lock_exclusive().map_err(|e| {
            Error::config(format!("lock pid file (another instance running?): {}", e))
        })?;

        file.set_len(0)
            .map_err(|e| Error::config(format!("truncate pid file: {}", e)))?;
        writeln!(file, "{}", std::process::id())
            .map_err(|e| Error::config(format!("write pid: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::config(format!("sync pid file: {}", e)))?;

        debug!(path = %path.display(), pid = std::process::id(), "pid file locked");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Close the file (releasing the lock) and remove it.
    pub fn release(self) -> Result<()> {
        let Self { file, path } = self;
        drop(file);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::config(format!("remove pid file: {}", e))),
        }
    }
}

/// Whether a daemon currently holds the PID lock, and its PID if so.
/// Returns `(false, 0)` when no PID file exists or the lock is free.
pub fn is_running(paths: &Paths) -> Result<(bool, u32)> {
    let path = paths.pid_file();
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((false, 0)),
        Err(e) => return Err(Error::config(format!("open pid file {}: {}", path.display(), e))),
    };

    if file.try_lock_exclusive().is_err() {
        // Lock held elsewhere: the daemon is running. Read the PID from
        // the descriptor we already hold.
        let mut buf = String::new();
        let pid = match std::io::Read::by_ref(&mut file).take(32).read_to_string(&mut buf) {
            Ok(_) => buf.trim().parse::<u32>().unwrap_or(0),
            Err(_) => 0,
        };
        return Ok((true, pid));
    }

    let _ = FileExt::unlock(&file);
    Ok((false, 0))
}
