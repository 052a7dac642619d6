use anyhow::{Context, Result, anyhow};
use nix::{
    sys::stat::SFlag,
    unistd::{Gid, Uid, chown},
};
use std::path::Path;

/* Makes the directory if it doesn't exist and hands it to uid/gid. An
 * existing path is accepted only if it is a directory.
 */
pub fn mkdir(path: &Path, uid: Uid, gid: Gid) -> Result<()> {
    if path.exists() {
        let metadata = nix::sys::stat::lstat(path)?;
        if metadata.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFDIR.bits() {
            return Err(anyhow!(
                "{} already exists but is not a directory",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path).with_context(|| {
            format!("Failed to create directory {}", path.display())
        })?;
    }

    chown(path, Some(uid), Some(gid))
        .with_context(|| format!("Failed to chown directory {}", path.display()))
}
