use crate::types::UidGidHome;
use anyhow::{Context, Result, anyhow};
use nix::unistd::{Gid, Uid, getresgid, getresuid, setgid, setuid};
use std::path::PathBuf;

/**
 * Works out which user is really behind this invocation.
 *
 * Under setuid the real ids are the user and `SUDO_*` can't be trusted.
 * Under sudo, or when run directly, `SUDO_UID`/`SUDO_GID` win over the
 * real ids when present.
 */
pub fn resolve_uid_gid_home() -> Result<UidGidHome> {
    let resuid = getresuid()?;
    let resgid = getresgid()?;
    let setuid_root = resuid.real != resuid.effective && resuid.effective.is_root();

    let (uid, gid, home) = if setuid_root {
        (resuid.real, resgid.real, std::env::var("HOME").ok())
    } else {
        let uid = match sudo_id("SUDO_UID")? {
            Some(uid) => Uid::from_raw(uid),
            None => resuid.real,
        };
        let gid = match sudo_id("SUDO_GID")? {
            Some(gid) => Gid::from_raw(gid),
            None => resgid.real,
        };
        let home = std::env::var("SUDO_HOME")
            .or_else(|_| std::env::var("HOME"))
            .ok();
        (uid, gid, home)
    };

    let home = PathBuf::from(home.unwrap_or_else(|| "/tmp".to_string()));
    if !home.is_absolute() {
        return Err(anyhow!("Home directory is not absolute: {}", home.display()));
    }
    Ok(UidGidHome { uid, gid, home })
}

fn sudo_id(var: &str) -> Result<Option<u32>> {
    match std::env::var(var) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .with_context(|| format!("Failed to parse {}: {}", var, value)),
        Err(_) => Ok(None),
    }
}

pub fn drop_privileges(uid: Uid, gid: Gid) -> Result<()> {
    setgid(gid)?;
    setuid(uid)?;
    Ok(())
}
