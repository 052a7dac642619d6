use std::path::{Path, PathBuf};

/// Expands a leading `~` or `~/` against `home`. `~user` forms are left
/// alone.
pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        home.to_path_buf()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(path)
    }
}
