use std::os::fd::OwnedFd;

/// Marks the start of every frame and is echoed back once it's been shown.
pub const SYNC_BYTE: u8 = 0xAA;

pub const MAX_NUM_FDS: usize = 32;
pub const MAX_NUM_INTS: usize = 32;

pub const LAYER_NAME_MAX_LENGTH: usize = 128;

/// `char[128]` name followed by width, height, stride and format.
pub const BUFFER_INFO_SIZE: usize = LAYER_NAME_MAX_LENGTH + 4 * 4;

/// `version`, `numFds`, `numInts`.
pub const HANDLE_HEADER_SIZE: usize = 3 * 4;

/// Native handles carry the size of their header as version.
pub const NATIVE_HANDLE_VERSION: i32 = HANDLE_HEADER_SIZE as i32;

/// Describes the guest layer a buffer belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub layer_name: String,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: i32,
}

impl BufferInfo {
    /// Native byte order, the name NUL padded and cut to leave room for the
    /// terminator.
    pub fn to_bytes(&self) -> [u8; BUFFER_INFO_SIZE] {
        let mut out = [0u8; BUFFER_INFO_SIZE];
        let name = self.layer_name.as_bytes();
        let len = name.len().min(LAYER_NAME_MAX_LENGTH - 1);
        out[..len].copy_from_slice(&name[..len]);

        let mut offset = LAYER_NAME_MAX_LENGTH;
        for value in [self.width, self.height, self.stride, self.format] {
            out[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
            offset += 4;
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; BUFFER_INFO_SIZE]) -> Self {
        // The peer isn't trusted to terminate the name
        let name = &bytes[..LAYER_NAME_MAX_LENGTH - 1];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());

        let field = |i: usize| {
            let start = LAYER_NAME_MAX_LENGTH + i * 4;
            read_i32(&bytes[start..start + 4])
        };
        BufferInfo {
            layer_name: String::from_utf8_lossy(&name[..end]).into_owned(),
            width: field(0),
            height: field(1),
            stride: field(2),
            format: field(3),
        }
    }
}

pub(crate) fn read_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    i32::from_ne_bytes(raw)
}

/**
 * A reference to a kernel graphics buffer: descriptors plus opaque integers
 * only the buffer allocator understands.
 *
 * The handle owns its descriptors. They are closed when the handle is
 * dropped or passed to `close`, whichever comes first.
 */
#[derive(Debug)]
pub struct BufferHandle {
    version: i32,
    fds: Vec<OwnedFd>,
    ints: Vec<i32>,
}

impl BufferHandle {
    pub fn new(fds: Vec<OwnedFd>, ints: Vec<i32>) -> Self {
        Self::with_version(NATIVE_HANDLE_VERSION, fds, ints)
    }

    pub fn with_version(version: i32, fds: Vec<OwnedFd>, ints: Vec<i32>) -> Self {
        BufferHandle { version, fds, ints }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn num_fds(&self) -> usize {
        self.fds.len()
    }

    pub fn num_ints(&self) -> usize {
        self.ints.len()
    }

    pub fn fds(&self) -> &[OwnedFd] {
        &self.fds
    }

    pub fn ints(&self) -> &[i32] {
        &self.ints
    }

    /// Releases every descriptor now.
    pub fn close(self) {
        drop(self);
    }
}
