//! Error types produced while bringing up the container or bridging buffers

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the container lifecycle. Every one of these aborts `start`.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// the caller does not hold full host privilege
    #[error("you have to start the container as root")]
    Privilege,

    /// credentials can't be expressed in the identifier map
    #[error("invalid credentials for identifier mapping: {0}")]
    InvalidCredentials(String),

    /// writing, saving or starting the runtime configuration failed
    #[error("container configuration failed: {0}")]
    Configuration(String),

    /// a shadow device node could not be created
    #[error("failed to set up device {device}: {reason}")]
    DeviceSetup { device: PathBuf, reason: String },
}

/// Framing failures on a buffer exchange connection. These close the
/// connection and nothing else.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("peer closed the connection")]
    Disconnected,

    #[error("invalid sync byte {0:#04x}")]
    BadSync(u8),

    #[error("short read: got {got} of {expected} bytes")]
    Truncated { got: usize, expected: usize },

    #[error("ancillary data was truncated by the kernel")]
    ControlTruncated,

    #[error("too many {kind}: {count} > {max}")]
    Oversized {
        kind: &'static str,
        count: i64,
        max: usize,
    },

    #[error(
        "declared {declared_fds} fds/{declared_ints} ints but handle reports {fds} fds/{ints} ints"
    )]
    CountMismatch {
        declared_fds: usize,
        declared_ints: usize,
        fds: usize,
        ints: usize,
    },

    #[error("expected {expected} descriptors, received {got}")]
    DescriptorCount { got: usize, expected: usize },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket error: {0}")]
    Sys(#[from] nix::errno::Errno),
}

/// Failures while importing a buffer into the host display server.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("no surface bound for window {0}")]
    UnknownWindow(u64),

    #[error("display server rejected the buffer: {0}")]
    Rejected(String),

    #[error("display server connection failed: {0}")]
    Connection(String),
}
