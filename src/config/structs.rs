use super::impls::deserialize_level_filter;
use crate::container::ContainerLayout;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

pub const DEFAULT_DATA_DIR: &str = "/var/lib/guestbox";
pub const DEFAULT_RUNTIME_DIR: &str = "/run/guestbox";

/// A `--bind` argument: `source:target`, or a single path mounted at the
/// same location inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub argument: String,
}

impl std::fmt::Display for BindMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argument)
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(deserialize_with = "deserialize_level_filter", default)]
    pub log_level: Option<log::LevelFilter>,
    pub data_dir: Option<String>,
    pub runtime_dir: Option<String>,
    pub privileged: Option<bool>,
    #[serde(rename = "bind", default)]
    pub bind_mounts: Option<Vec<String>>,
    #[serde(rename = "device", default)]
    pub devices: Option<Vec<String>>,
    pub window_id: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: log::LevelFilter,
    pub data_dir: PathBuf,
    pub runtime_dir: PathBuf,
    pub privileged: bool,
    pub bind_mounts: Vec<BindMount>,
    pub devices: Vec<PathBuf>,
    pub window_id: u64,
    pub layout: ContainerLayout,
    pub sources: HashMap<String, String>,
}
