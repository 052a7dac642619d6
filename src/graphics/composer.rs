use super::importer::{DisplayServer, HostBufferImporter, WindowId};
use super::server::{LayerComposer, Renderable};
use log::{trace, warn};
use std::sync::{Mutex, MutexGuard};

/// Presents the first layer of every batch on a single host window.
pub struct SingleWindowComposer<D: DisplayServer> {
    importer: Mutex<HostBufferImporter<D>>,
    window: WindowId,
}

impl<D: DisplayServer> SingleWindowComposer<D> {
    pub fn new(importer: HostBufferImporter<D>, window: WindowId) -> Self {
        SingleWindowComposer {
            importer: Mutex::new(importer),
            window,
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    /// A poisoned lock only means a display call panicked mid-frame, the
    /// window table itself is still consistent.
    pub fn importer(&self) -> MutexGuard<'_, HostBufferImporter<D>> {
        match self.importer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<D: DisplayServer + Send> LayerComposer for SingleWindowComposer<D> {
    fn submit_layers(&self, layers: &[Renderable<'_>]) {
        let Some(layer) = layers.first() else {
            return;
        };
        let mut importer = self.importer();
        let bound = match importer.lookup(self.window) {
            Ok(bound) => bound,
            Err(e) => {
                warn!("Dropping layer '{}': {}", layer.name, e);
                return;
            }
        };
        trace!("Presenting layer '{}'", layer.name);
        if let Err(e) = importer.import_and_present(
            &bound,
            layer.buffer,
            layer.width,
            layer.height,
            layer.stride,
            layer.format,
        ) {
            warn!("Failed to present layer '{}': {}", layer.name, e);
        }
    }
}
