use super::structs::{BindMount, Config};
use crate::container::Configuration;
use crate::graphics::SOCKET_NAME;
use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Keys understood by the `config` action, in display order.
pub const CONFIG_KEYS: [&str; 12] = [
    "log_level",
    "data_dir",
    "runtime_dir",
    "privileged",
    "bind_mounts",
    "devices",
    "window_id",
    "config_dir",
    "log_dir",
    "devices_dir",
    "rootfs_dir",
    "socket_path",
];

impl FromStr for BindMount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (source, target) = match parts.as_slice() {
            [path] => (*path, *path),
            [source, target] => (*source, *target),
            _ => {
                return Err(anyhow!(
                    "Invalid bind mount '{}', expected source:target",
                    s
                ));
            }
        };
        if source.is_empty() || target.is_empty() {
            return Err(anyhow!("Invalid bind mount '{}': empty path", s));
        }
        if !source.starts_with('/') {
            return Err(anyhow!(
                "Invalid bind mount '{}': source must be absolute",
                s
            ));
        }
        Ok(BindMount {
            source: PathBuf::from(source),
            target: PathBuf::from(target),
            argument: s.to_string(),
        })
    }
}

impl Config {
    /// What `LxcContainer::start` needs from the resolved configuration.
    pub fn container_configuration(&self) -> Configuration {
        Configuration {
            bind_mounts: self
                .bind_mounts
                .iter()
                .map(|b| (b.source.clone(), b.target.clone()))
                .collect(),
            devices: self.devices.clone(),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.runtime_dir.join(SOCKET_NAME)
    }

    /// Looks up a key from `CONFIG_KEYS`, `-` and `_` are interchangeable.
    /// Returns the canonical key name along with the value.
    pub fn value_of(&self, key: &str) -> Option<(&'static str, String)> {
        let key = key.replace('-', "_");
        let canonical = CONFIG_KEYS.iter().find(|k| **k == key)?;
        let path = |p: &std::path::Path| p.to_string_lossy().into_owned();
        let value = match *canonical {
            "log_level" => self.log_level.as_str().to_lowercase(),
            "data_dir" => path(&self.data_dir),
            "runtime_dir" => path(&self.runtime_dir),
            "privileged" => self.privileged.to_string(),
            "bind_mounts" => self
                .bind_mounts
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(","),
            "devices" => self
                .devices
                .iter()
                .map(|d| path(d))
                .collect::<Vec<_>>()
                .join(","),
            "window_id" => self.window_id.to_string(),
            "config_dir" => path(&self.layout.config_dir),
            "log_dir" => path(&self.layout.log_dir),
            "devices_dir" => path(&self.layout.devices_dir),
            "rootfs_dir" => path(&self.layout.rootfs_dir),
            "socket_path" => path(&self.socket_path()),
            _ => return None,
        };
        Some((canonical, value))
    }
}

pub(crate) fn deserialize_level_filter<'de, D>(
    deserializer: D,
) -> Result<Option<log::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map_or(Ok(None), |s| {
        log::LevelFilter::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    })
}
