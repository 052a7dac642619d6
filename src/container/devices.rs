use crate::errors::ContainerError;
use log::trace;
use nix::{
    sys::stat::{FchmodatFlags, Mode, SFlag, fchmodat, mknod, stat},
    unistd::{Gid, Uid, chown},
};
use std::path::{Path, PathBuf};

/// Devices every container gets on top of the configured ones.
pub const STANDARD_DEVICES: [&str; 7] = [
    "/dev/console",
    "/dev/full",
    "/dev/null",
    "/dev/random",
    "/dev/tty",
    "/dev/urandom",
    "/dev/zero",
];

/// Major number of a raw `dev_t`: bits 8..20 and 32..44.
pub fn device_major(dev: u64) -> u64 {
    ((dev >> 8) & 0xfff) | ((dev >> 32) & 0xffff_f000)
}

/// Minor number of a raw `dev_t`: bits 0..8 and 20..44.
pub fn device_minor(dev: u64) -> u64 {
    (dev & 0xff) | ((dev >> 12) & 0xffff_ff00)
}

/// Inverse of `device_major`/`device_minor`.
pub fn encode_device(major: u64, minor: u64) -> u64 {
    (minor & 0xff)
        | ((major & 0xfff) << 8)
        | ((minor & !0xff) << 12)
        | ((major & !0xfff) << 32)
}

/// What we learn about a host device node before shadowing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub path: PathBuf,
    pub major: u64,
    pub minor: u64,
    pub kind: SFlag,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
}

impl DeviceDescriptor {
    pub fn probe(path: &Path) -> Result<DeviceDescriptor, ContainerError> {
        let st = stat(path).map_err(|e| device_error(path, "stat failed", e))?;
        let kind =
            SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits());
        if kind != SFlag::S_IFCHR && kind != SFlag::S_IFBLK {
            return Err(ContainerError::DeviceSetup {
                device: path.to_path_buf(),
                reason: "not a character or block device".to_string(),
            });
        }

        let rdev = st.st_rdev as u64;
        Ok(DeviceDescriptor {
            path: path.to_path_buf(),
            major: device_major(rdev),
            minor: device_minor(rdev),
            kind,
            mode: Mode::from_bits_truncate(st.st_mode & 0o7777),
            uid: st.st_uid,
            gid: st.st_gid,
        })
    }
}

/// A node created in the private device directory, plus where it gets bind
/// mounted inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowDeviceNode {
    pub node_path: PathBuf,
    /// Host path with the leading `/` stripped, relative to the rootfs.
    pub target: String,
    pub uid: u32,
    pub gid: u32,
}

impl ShadowDeviceNode {
    pub fn mount_entry(&self) -> String {
        format!(
            "{} {} none bind,create=file,optional 0 0",
            self.node_path.display(),
            self.target
        )
    }
}

/// Recreates host device nodes under the container's private device
/// directory with ownership shifted into the container's identifier range.
pub struct DeviceShadowBuilder {
    devices_dir: PathBuf,
    id_base: u32,
}

impl DeviceShadowBuilder {
    /// `id_base` is added to the host owner of every node; pass 0 for a
    /// privileged container.
    pub fn new(devices_dir: &Path, id_base: u32) -> Self {
        DeviceShadowBuilder {
            devices_dir: devices_dir.to_path_buf(),
            id_base,
        }
    }

    /// Wipes everything left from the previous start.
    pub fn reset(&self) -> Result<(), ContainerError> {
        let failed = |e: std::io::Error| ContainerError::DeviceSetup {
            device: self.devices_dir.clone(),
            reason: e.to_string(),
        };
        if self.devices_dir.exists() {
            std::fs::remove_dir_all(&self.devices_dir).map_err(failed)?;
        }
        std::fs::create_dir_all(&self.devices_dir).map_err(failed)?;
        Ok(())
    }

    pub fn add_device(
        &self,
        path: &Path,
    ) -> Result<ShadowDeviceNode, ContainerError> {
        let device = DeviceDescriptor::probe(path)?;
        let file_name = path.file_name().ok_or_else(|| {
            ContainerError::DeviceSetup {
                device: path.to_path_buf(),
                reason: "device path has no file name".to_string(),
            }
        })?;
        let node_path = self.devices_dir.join(file_name);

        trace!(
            "Creating {} ({}:{}) at {}",
            path.display(),
            device.major,
            device.minor,
            node_path.display()
        );
        mknod(
            &node_path,
            device.kind,
            device.mode,
            encode_device(device.major, device.minor) as libc::dev_t,
        )
        .map_err(|e| device_error(path, "failed to create node", e))?;

        let uid = self.id_base + device.uid;
        let gid = self.id_base + device.gid;
        chown(
            &node_path,
            Some(Uid::from_raw(uid)),
            Some(Gid::from_raw(gid)),
        )
        .map_err(|e| device_error(path, "failed to change ownership", e))?;

        // mknod honours the umask, so the mode has to be applied again
        fchmodat(None, &node_path, device.mode, FchmodatFlags::FollowSymlink)
            .map_err(|e| device_error(path, "failed to change mode", e))?;

        let target = path.to_string_lossy();
        Ok(ShadowDeviceNode {
            node_path,
            target: target.strip_prefix('/').unwrap_or(&target).to_string(),
            uid,
            gid,
        })
    }
}

/// Standard devices appended to the configured ones, with repeats dropped.
pub fn device_list(configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut devices: Vec<PathBuf> = Vec::new();
    for device in configured
        .iter()
        .cloned()
        .chain(STANDARD_DEVICES.iter().map(PathBuf::from))
    {
        if !devices.contains(&device) {
            devices.push(device);
        }
    }
    devices
}

fn device_error(
    path: &Path,
    what: &str,
    errno: nix::errno::Errno,
) -> ContainerError {
    ContainerError::DeviceSetup {
        device: path.to_path_buf(),
        reason: format!("{}: {}", what, errno),
    }
}
