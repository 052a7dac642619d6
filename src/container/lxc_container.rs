use super::devices::{DeviceShadowBuilder, device_list};
use super::id_map::{UNPRIVILEGED_UID, compute_id_map};
use super::runtime::{ContainerHandle, ContainerRuntime};
use crate::errors::ContainerError;
use crate::types::Credentials;
use log::{debug, trace, warn};
use nix::unistd::getuid;
use std::path::{Path, PathBuf};

/// The only container instance we ever run.
pub const CONTAINER_NAME: &str = "default";

/// Host bridge the container's veth is attached to when it exists.
pub const BRIDGE_INTERFACE: &str = "anboxbr0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Inactive,
    Running,
}

/// Where the container's files live on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub devices_dir: PathBuf,
    pub rootfs_dir: PathBuf,
    pub net_class_dir: PathBuf,
}

impl ContainerLayout {
    pub fn under(data_dir: &Path) -> Self {
        ContainerLayout {
            config_dir: data_dir.join("containers"),
            log_dir: data_dir.join("logs"),
            devices_dir: data_dir.join("devices"),
            rootfs_dir: data_dir.join("rootfs"),
            net_class_dir: PathBuf::from("/sys/class/net"),
        }
    }
}

/// Per-start settings supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    /// `(source on the host, target inside the container)`
    pub bind_mounts: Vec<(PathBuf, PathBuf)>,
    pub devices: Vec<PathBuf>,
}

/**
 * Owns the container instance and drives it between `Inactive` and
 * `Running`. The controller does no locking of its own, concurrent
 * `start`/`stop` calls have to be serialized by the caller.
 *
 * `state()` only reflects transitions made through this controller. If the
 * container dies behind our back it keeps reporting `Running`.
 */
pub struct LxcContainer {
    state: State,
    handle: Option<Box<dyn ContainerHandle>>,
    runtime: Box<dyn ContainerRuntime>,
    layout: ContainerLayout,
    privileged: bool,
    creds: Credentials,
}

impl LxcContainer {
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        layout: ContainerLayout,
        privileged: bool,
        creds: Credentials,
    ) -> Result<Self, ContainerError> {
        for dir in [&layout.config_dir, &layout.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ContainerError::Configuration(format!(
                    "failed to create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(LxcContainer {
            state: State::Inactive,
            handle: None,
            runtime,
            layout,
            privileged,
            creds,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn layout(&self) -> &ContainerLayout {
        &self.layout
    }

    /// Opens the existing instance without touching its configuration, so a
    /// container started by another process can be stopped.
    pub fn attach(&mut self) -> Result<(), ContainerError> {
        let handle = self
            .runtime
            .create(CONTAINER_NAME, &self.layout.config_dir)?;
        if handle.is_running() {
            self.state = State::Running;
        }
        self.handle = Some(handle);
        Ok(())
    }

    pub fn start(
        &mut self,
        configuration: &Configuration,
    ) -> Result<(), ContainerError> {
        if !getuid().is_root() {
            return Err(ContainerError::Privilege);
        }

        if let Some(handle) = self.handle.as_mut() {
            if handle.is_running() {
                warn!("Container already started, stopping it now");
                stop_quietly(handle.as_mut());
            }
            self.state = State::Inactive;
        }

        debug!(
            "Containers are stored in {}",
            self.layout.config_dir.display()
        );
        self.handle = None;
        self.runtime
            .remove_config(CONTAINER_NAME, &self.layout.config_dir)?;
        let mut handle = self
            .runtime
            .create(CONTAINER_NAME, &self.layout.config_dir)?;

        // Left running after a crash, stop it so the configuration is in sync
        if handle.is_running() {
            warn!("Container is still running, stopping it first");
            stop_quietly(handle.as_mut());
        }

        let result = self.configure_and_start(handle.as_mut(), configuration);
        self.handle = Some(handle);
        result?;

        self.state = State::Running;
        debug!("Container successfully started");
        Ok(())
    }

    /// Does nothing unless a handle exists and reports the container as
    /// running.
    pub fn stop(&mut self) -> Result<(), ContainerError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        if !handle.is_running() {
            return Ok(());
        }

        handle.stop().map_err(|e| {
            ContainerError::Configuration(format!(
                "failed to stop container: {}",
                e
            ))
        })?;
        self.state = State::Inactive;
        debug!("Container successfully stopped");
        Ok(())
    }

    pub fn config_items(&self) -> Option<&super::runtime::ConfigEntries> {
        self.handle.as_ref().map(|h| h.config_items())
    }

    fn configure_and_start(
        &self,
        handle: &mut dyn ContainerHandle,
        configuration: &Configuration,
    ) -> Result<(), ContainerError> {
        self.emit_base_config(handle)?;
        if !self.privileged {
            self.emit_id_map(handle)?;
        }
        self.emit_bind_mounts(handle, &configuration.bind_mounts)?;
        self.emit_devices(handle, &configuration.devices)?;

        handle.save_config()?;
        handle.start()
    }

    fn emit_base_config(
        &self,
        handle: &mut dyn ContainerHandle,
    ) -> Result<(), ContainerError> {
        // proc and sys can be mixed rw since the container is unprivileged
        handle.set_config_item(
            "lxc.mount.auto",
            "proc:mixed sys:mixed cgroup:mixed",
        )?;
        handle.set_config_item("lxc.autodev", "1")?;
        handle.set_config_item("lxc.pts", "1024")?;
        handle.set_config_item("lxc.tty", "0")?;
        handle.set_config_item("lxc.utsname", "anbox")?;

        // Device access only comes from the bind mounted shadow nodes
        handle.set_config_item("lxc.group.devices.deny", "")?;
        handle.set_config_item("lxc.group.devices.allow", "")?;

        // bind mounts can't be moved, so keep ttys out of /dev/lxc/
        handle.set_config_item("lxc.devttydir", "")?;

        handle.set_config_item(
            "lxc.environment",
            "PATH=/system/bin:/system/sbin:/system/xbin",
        )?;
        handle.set_config_item("lxc.init_cmd", "/anbox-init.sh")?;
        handle.set_config_item("lxc.rootfs.backend", "dir")?;

        let rootfs = self.layout.rootfs_dir.to_string_lossy();
        debug!("Using rootfs path {}", rootfs);
        handle.set_config_item("lxc.rootfs", &rootfs)?;

        handle.set_config_item("lxc.loglevel", "0")?;
        handle.set_config_item(
            "lxc.logfile",
            &self.layout.log_dir.join("container.log").to_string_lossy(),
        )?;

        if self.layout.net_class_dir.join(BRIDGE_INTERFACE).exists() {
            trace!("Attaching container to bridge {}", BRIDGE_INTERFACE);
            handle.set_config_item("lxc.network.type", "veth")?;
            handle.set_config_item("lxc.network.flags", "up")?;
            handle.set_config_item("lxc.network.link", BRIDGE_INTERFACE)?;
        }

        handle.set_config_item("lxc.aa_profile", "anbox-container")
    }

    fn emit_id_map(
        &self,
        handle: &mut dyn ContainerHandle,
    ) -> Result<(), ContainerError> {
        for range in compute_id_map(&self.creds, UNPRIVILEGED_UID)? {
            handle.set_config_item("lxc.id_map", &range.to_string())?;
        }
        Ok(())
    }

    fn emit_bind_mounts(
        &self,
        handle: &mut dyn ContainerHandle,
        bind_mounts: &[(PathBuf, PathBuf)],
    ) -> Result<(), ContainerError> {
        for (source, target) in bind_mounts {
            let create_type = if source.is_dir() { "dir" } else { "file" };

            // Targets must be absolute paths inside the rootfs, otherwise
            // confined hosts reject the mount
            let target = target.to_string_lossy();
            let target = if target.starts_with('/') {
                target.to_string()
            } else {
                format!("/{}", target)
            };
            let entry = format!(
                "{} {}{} none bind,create={},optional 0 0",
                source.display(),
                self.layout.rootfs_dir.display(),
                target,
                create_type
            );
            handle.set_config_item("lxc.mount.entry", &entry)?;
        }
        Ok(())
    }

    fn emit_devices(
        &self,
        handle: &mut dyn ContainerHandle,
        devices: &[PathBuf],
    ) -> Result<(), ContainerError> {
        let base = if self.privileged { 0 } else { UNPRIVILEGED_UID };
        let builder = DeviceShadowBuilder::new(&self.layout.devices_dir, base);
        builder.reset()?;

        for device in device_list(devices) {
            let node = builder.add_device(&device)?;
            handle.set_config_item("lxc.mount.entry", &node.mount_entry())?;
        }
        Ok(())
    }
}

impl Drop for LxcContainer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop container: {}", e);
        }
    }
}

fn stop_quietly(handle: &mut dyn ContainerHandle) {
    if let Err(e) = handle.stop() {
        warn!("Failed to stop container '{}': {}", handle.name(), e);
    }
}
