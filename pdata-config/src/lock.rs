//! File locking and atomic rewrite helpers, grounded on
//! `pbs-config`'s `open_backup_lockfile`/`replace_backup_config`, but built
//! on `nix`'s `flock` and `tempfile` instead of the unavailable
//! `proxmox_sys::fs` helpers.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::fcntl::{flock, FlockArg};
use pdata_api_types::PDataError;

/// Holds an exclusive advisory lock on a db-root config file for as long as
/// it's alive. Dropping it releases the lock.
pub struct LockGuard(#[allow(dead_code)] File);

/// Opens (creating if necessary) and exclusively locks `path`, retrying
/// until `timeout` elapses.
pub fn lock_file(path: &Path, timeout: Duration) -> Result<LockGuard, PDataError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PDataError::IoError(format!("open lock file {path:?}: {e}")))?;

    let deadline = Instant::now() + timeout;
    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => return Ok(LockGuard(file)),
            Err(nix::errno::Errno::EWOULDBLOCK) => {
                if Instant::now() >= deadline {
                    return Err(PDataError::Conflict(format!(
                        "timed out locking {path:?}"
                    )));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => return Err(PDataError::IoError(format!("flock {path:?}: {e}"))),
        }
    }
}

/// Atomically replaces the contents of `path` with `data`: writes to a
/// sibling temp file, fsyncs it, then renames over `path` (spec §4.1 step
/// 3). On any failure `path` is left untouched.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PDataError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .map_err(|e| PDataError::IoError(format!("create_dir_all {dir:?}: {e}")))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| PDataError::IoError(format!("create temp file in {dir:?}: {e}")))?;
    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| PDataError::IoError(format!("write temp file for {path:?}: {e}")))?;

    tmp.persist(path)
        .map_err(|e| PDataError::IoError(format!("rename into {path:?}: {e}")))?;
    Ok(())
}
