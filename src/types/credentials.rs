use nix::unistd::{Gid, Uid};
use std::fmt;

/// The host user that owns the sockets we hand to the container. Inside an
/// unprivileged container this identity becomes the guest's system user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Credentials {
            uid: Uid::from_raw(uid),
            gid: Gid::from_raw(gid),
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}
