use anyhow::{Context, Result, anyhow};
use log::trace;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock held for as long as the value lives.
pub struct Lock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl Lock {
    /// Serializes lifecycle changes of container `name`.
    pub fn container(config_dir: &Path, name: &str) -> Result<Lock> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!("Failed to create {}", config_dir.display())
        })?;
        let path = config_dir.join(format!("{}.lock", name));
        trace!("Acquiring lock {}", path.display());

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| {
                format!("Failed to open lock file for container {}", name)
            })?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| anyhow!("Failed to acquire lock: {}", e))?;

        trace!("Acquired lock {}", path.display());
        Ok(Lock { path, _lock: lock })
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        trace!("Unlocking lock {}", self.path.display());
    }
}
