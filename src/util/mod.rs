mod expand_tilde;
mod identity;
mod lock;
mod mkdir;
mod output;
mod signals;

pub use expand_tilde::*;
pub use identity::*;
pub use lock::*;
pub use mkdir::*;
pub use output::*;
pub use signals::*;

/// A fresh path under the temp dir. Nothing is created.
#[cfg(test)]
pub fn scratch_dir(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "guestbox-{}-{:016x}",
        prefix,
        rand::random::<u64>()
    ))
}
