use crate::errors::ContainerError;
use log::{debug, trace};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Keys the LXC runtime accepts from us. Anything else is refused the same
/// way liblxc refuses an unknown key.
pub const KNOWN_KEYS: [&str; 20] = [
    "lxc.id_map",
    "lxc.mount.auto",
    "lxc.mount.entry",
    "lxc.autodev",
    "lxc.pts",
    "lxc.tty",
    "lxc.utsname",
    "lxc.group.devices.deny",
    "lxc.group.devices.allow",
    "lxc.devttydir",
    "lxc.environment",
    "lxc.init_cmd",
    "lxc.rootfs.backend",
    "lxc.rootfs",
    "lxc.loglevel",
    "lxc.logfile",
    "lxc.network.type",
    "lxc.network.flags",
    "lxc.network.link",
    "lxc.aa_profile",
];

/// Append-only multimap of configuration items, kept in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntries {
    entries: Vec<(String, String)>,
}

impl ConfigEntries {
    pub fn push(&mut self, key: &str, value: &str) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Last value written for `key`, which is the one the runtime honours
    /// for single valued keys.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the entries in the `key = value` format of an LXC config file.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    format!("{} =\n", k)
                } else {
                    format!("{} = {}\n", k, v)
                }
            })
            .collect()
    }
}

/// A handle on one container instance of the runtime.
pub trait ContainerHandle {
    fn name(&self) -> &str;
    fn is_running(&self) -> bool;
    fn set_config_item(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ContainerError>;
    fn config_items(&self) -> &ConfigEntries;
    fn save_config(&mut self) -> Result<(), ContainerError>;
    fn start(&mut self) -> Result<(), ContainerError>;
    fn stop(&mut self) -> Result<(), ContainerError>;
}

/// The container runtime backing the lifecycle controller.
pub trait ContainerRuntime {
    /// Removes the persisted configuration of `name` so it can be rewritten.
    fn remove_config(
        &self,
        name: &str,
        config_dir: &Path,
    ) -> Result<(), ContainerError>;

    fn create(
        &self,
        name: &str,
        config_dir: &Path,
    ) -> Result<Box<dyn ContainerHandle>, ContainerError>;
}

pub fn config_path(config_dir: &Path, name: &str) -> PathBuf {
    config_dir.join(name).join("config")
}

/// Drives LXC through its command line tools.
#[derive(Debug, Default, Clone)]
pub struct LxcRuntime;

impl ContainerRuntime for LxcRuntime {
    fn remove_config(
        &self,
        name: &str,
        config_dir: &Path,
    ) -> Result<(), ContainerError> {
        let path = config_path(config_dir, name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                trace!("Removed old container config {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContainerError::Configuration(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn create(
        &self,
        name: &str,
        config_dir: &Path,
    ) -> Result<Box<dyn ContainerHandle>, ContainerError> {
        if name.is_empty() || name.contains('/') {
            return Err(ContainerError::Configuration(format!(
                "invalid container name '{}'",
                name
            )));
        }
        Ok(Box::new(LxcHandle {
            name: name.to_string(),
            config_dir: config_dir.to_path_buf(),
            entries: ConfigEntries::default(),
        }))
    }
}

pub struct LxcHandle {
    name: String,
    config_dir: PathBuf,
    entries: ConfigEntries,
}

impl LxcHandle {
    fn lxc(&self, tool: &str, extra: &[&str]) -> std::io::Result<Output> {
        let mut cmd = Command::new(tool);
        cmd.arg("-P").arg(&self.config_dir).arg("-n").arg(&self.name);
        cmd.args(extra);
        trace!("Running {} for container '{}'", tool, self.name);
        cmd.output()
    }

    fn run(&self, tool: &str, extra: &[&str]) -> Result<(), ContainerError> {
        let output = self.lxc(tool, extra).map_err(|e| {
            ContainerError::Configuration(format!(
                "failed to run {}: {}",
                tool, e
            ))
        })?;
        if !output.status.success() {
            return Err(ContainerError::Configuration(format!(
                "{} failed for '{}': {}",
                tool,
                self.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl ContainerHandle for LxcHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        match self.lxc("lxc-info", &["-s"]) {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).contains("RUNNING")
            }
            Ok(_) => false,
            Err(e) => {
                trace!("lxc-info failed: {}", e);
                false
            }
        }
    }

    fn set_config_item(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ContainerError> {
        if !KNOWN_KEYS.contains(&key) || value.contains('\n') {
            return Err(ContainerError::Configuration(format!(
                "failed to set config item {}",
                key
            )));
        }
        self.entries.push(key, value);
        Ok(())
    }

    fn config_items(&self) -> &ConfigEntries {
        &self.entries
    }

    fn save_config(&mut self) -> Result<(), ContainerError> {
        let path = config_path(&self.config_dir, &self.name);
        let failed = |e: std::io::Error| {
            ContainerError::Configuration(format!(
                "failed to save container configuration {}: {}",
                path.display(),
                e
            ))
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(failed)?;
        }
        std::fs::write(&path, self.entries.render()).map_err(failed)?;
        debug!("Saved container configuration to {}", path.display());
        Ok(())
    }

    fn start(&mut self) -> Result<(), ContainerError> {
        self.run("lxc-start", &["-d"])
    }

    fn stop(&mut self) -> Result<(), ContainerError> {
        self.run("lxc-stop", &[])
    }
}
