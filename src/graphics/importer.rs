use super::buffer::BufferHandle;
use crate::errors::ImportError;
use log::{debug, trace};
use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd};

pub type WindowId = u64;

/// Display-server surface a window draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceRef(pub u64);

/// Display-server connection a surface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayRef(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundSurface {
    pub window: WindowId,
    pub surface: SurfaceRef,
    pub display: DisplayRef,
}

/// Usage flag passed along with every imported buffer.
pub const GRALLOC_USAGE_HW_RENDER: u32 = 0x0000_0200;

/**
 * The display-server side of buffer import: a native handle object that
 * collects descriptors, the buffer object built from it, and the surface
 * operations to present that buffer.
 */
pub trait DisplayServer {
    type Handle;
    type Buffer;

    fn create_handle(
        &mut self,
        display: DisplayRef,
        num_fds: usize,
        ints: &[i32],
    ) -> Result<Self::Handle, ImportError>;

    fn add_fd(
        &mut self,
        handle: &mut Self::Handle,
        fd: BorrowedFd<'_>,
    ) -> Result<(), ImportError>;

    #[allow(clippy::too_many_arguments)]
    fn create_buffer(
        &mut self,
        display: DisplayRef,
        width: i32,
        height: i32,
        stride: i32,
        format: i32,
        usage: u32,
        handle: &Self::Handle,
    ) -> Result<Self::Buffer, ImportError>;

    fn destroy_handle(&mut self, handle: Self::Handle);

    fn attach(
        &mut self,
        surface: SurfaceRef,
        buffer: &Self::Buffer,
    ) -> Result<(), ImportError>;

    fn damage(
        &mut self,
        surface: SurfaceRef,
        width: i32,
        height: i32,
    ) -> Result<(), ImportError>;

    fn commit(&mut self, surface: SurfaceRef) -> Result<(), ImportError>;

    fn flush(&mut self, display: DisplayRef) -> Result<(), ImportError>;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);
}

/// Turns received buffer handles into display-server buffers and shows them
/// on the surface bound to a window.
pub struct HostBufferImporter<D: DisplayServer> {
    display: D,
    windows: HashMap<WindowId, BoundSurface>,
}

impl<D: DisplayServer> HostBufferImporter<D> {
    pub fn new(display: D) -> Self {
        HostBufferImporter {
            display,
            windows: HashMap::new(),
        }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Binding a window twice replaces the earlier surface.
    pub fn bind_window(
        &mut self,
        window: WindowId,
        surface: SurfaceRef,
        display: DisplayRef,
    ) -> BoundSurface {
        let bound = BoundSurface {
            window,
            surface,
            display,
        };
        debug!("Binding window {} to surface {}", window, surface.0);
        self.windows.insert(window, bound);
        bound
    }

    pub fn unbind_window(&mut self, window: WindowId) -> Option<BoundSurface> {
        self.windows.remove(&window)
    }

    pub fn lookup(&self, window: WindowId) -> Result<BoundSurface, ImportError> {
        self.windows
            .get(&window)
            .copied()
            .ok_or(ImportError::UnknownWindow(window))
    }

    /**
     * Builds a display-server buffer from exactly the handle's descriptors
     * and integers and presents it on `bound`.
     *
     * The intermediate handle object and the buffer are destroyed on every
     * path. The descriptors stay open, they belong to the caller.
     */
    pub fn import_and_present(
        &mut self,
        bound: &BoundSurface,
        handle: &BufferHandle,
        width: i32,
        height: i32,
        stride: i32,
        format: i32,
    ) -> Result<(), ImportError> {
        let mut native =
            self.display
                .create_handle(bound.display, handle.num_fds(), handle.ints())?;

        let buffer = handle
            .fds()
            .iter()
            .try_for_each(|fd| self.display.add_fd(&mut native, fd.as_fd()))
            .and_then(|()| {
                self.display.create_buffer(
                    bound.display,
                    width,
                    height,
                    stride,
                    format,
                    GRALLOC_USAGE_HW_RENDER,
                    &native,
                )
            });
        self.display.destroy_handle(native);
        let buffer = buffer?;

        trace!(
            "Presenting {}x{} buffer on window {}",
            width, height, bound.window
        );
        let presented = self.present(bound, &buffer, width, height);
        self.display.destroy_buffer(buffer);
        presented
    }

    fn present(
        &mut self,
        bound: &BoundSurface,
        buffer: &D::Buffer,
        width: i32,
        height: i32,
    ) -> Result<(), ImportError> {
        self.display.attach(bound.surface, buffer)?;
        self.display.damage(bound.surface, width, height)?;
        self.display.commit(bound.surface)?;
        self.display.flush(bound.display)
    }
}

/// Headless display that accepts every buffer and shows nothing.
#[derive(Debug, Default)]
pub struct NullDisplay {
    presented: u64,
}

impl NullDisplay {
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplayServer for NullDisplay {
    type Handle = ();
    type Buffer = ();

    fn create_handle(
        &mut self,
        _display: DisplayRef,
        _num_fds: usize,
        _ints: &[i32],
    ) -> Result<(), ImportError> {
        Ok(())
    }

    fn add_fd(&mut self, _: &mut (), _fd: BorrowedFd<'_>) -> Result<(), ImportError> {
        Ok(())
    }

    fn create_buffer(
        &mut self,
        _display: DisplayRef,
        _width: i32,
        _height: i32,
        _stride: i32,
        _format: i32,
        _usage: u32,
        _handle: &(),
    ) -> Result<(), ImportError> {
        Ok(())
    }

    fn destroy_handle(&mut self, _: ()) {}

    fn attach(&mut self, _: SurfaceRef, _: &()) -> Result<(), ImportError> {
        Ok(())
    }

    fn damage(&mut self, _: SurfaceRef, _: i32, _: i32) -> Result<(), ImportError> {
        Ok(())
    }

    fn commit(&mut self, _: SurfaceRef) -> Result<(), ImportError> {
        self.presented += 1;
        Ok(())
    }

    fn flush(&mut self, _: DisplayRef) -> Result<(), ImportError> {
        Ok(())
    }

    fn destroy_buffer(&mut self, _: ()) {}
}
