use super::fixture_guestbox::scratch_path;
use guestbox::graphics::{
    BufferExchangeServer, BufferHandle, BufferInfo, LayerComposer, Renderable, ShutdownHandle,
};
use log::warn;
use rstest::*;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// What the composer saw of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenLayer {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: i32,
    pub ints: Vec<i32>,
    /* first bytes readable from each received descriptor */
    pub contents: Vec<Vec<u8>>,
}

#[derive(Default)]
pub struct RecordingComposer {
    pub batches: Mutex<Vec<Vec<SeenLayer>>>,
}

impl RecordingComposer {
    pub fn layers(&self) -> Vec<SeenLayer> {
        #[allow(clippy::unwrap_used)]
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

fn peek(fd: &OwnedFd) -> Vec<u8> {
    let Ok(dup) = fd.try_clone() else {
        return vec![];
    };
    let mut file = std::fs::File::from(dup);
    let mut buf = [0u8; 16];
    match file.read(&mut buf) {
        Ok(n) => buf[..n].to_vec(),
        Err(_) => vec![],
    }
}

impl LayerComposer for RecordingComposer {
    fn submit_layers(&self, layers: &[Renderable<'_>]) {
        let batch = layers
            .iter()
            .map(|l| SeenLayer {
                name: l.name.to_string(),
                width: l.width,
                height: l.height,
                stride: l.stride,
                format: l.format,
                ints: l.buffer.ints().to_vec(),
                contents: l
                    .buffer
                    .fds()
                    .iter()
                    .map(peek)
                    .collect(),
            })
            .collect();
        #[allow(clippy::unwrap_used)]
        self.batches.lock().unwrap().push(batch);
    }
}

/// A buffer exchange server running on its own thread in a scratch dir.
pub struct BridgeHarness {
    pub dir: PathBuf,
    pub socket_path: PathBuf,
    pub composer: Arc<RecordingComposer>,
    pub shutdown: ShutdownHandle,
    thread: Option<JoinHandle<std::io::Result<()>>>,
}

#[allow(clippy::unwrap_used)]
impl BridgeHarness {
    pub fn new() -> Self {
        let dir = scratch_path("bridge");
        std::fs::create_dir_all(&dir).unwrap();
        let composer = Arc::new(RecordingComposer::default());
        let (server, shutdown) = BufferExchangeServer::bind(&dir, composer.clone()).unwrap();
        let socket_path = server.socket_path().to_path_buf();
        let thread = server.spawn().unwrap();
        BridgeHarness {
            dir,
            socket_path,
            composer,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path).unwrap()
    }

    /// Shuts the server down and returns what `serve` returned.
    pub fn stop(&mut self) -> std::io::Result<()> {
        self.shutdown.shutdown();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap(),
            None => Ok(()),
        }
    }
}

impl Drop for BridgeHarness {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Buffer exchange server failed: {}", e);
        }
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[fixture]
pub fn bridge() -> BridgeHarness {
    BridgeHarness::new()
}

/// A pipe whose read end carries `marker`. Returns (handle fd, write end).
#[allow(clippy::unwrap_used)]
pub fn marked_pipe(marker: &[u8]) -> (OwnedFd, OwnedFd) {
    let (rx, tx) = nix::unistd::pipe().unwrap();
    nix::unistd::write(&tx, marker).unwrap();
    (rx, tx)
}

pub fn layer_info(name: &str) -> BufferInfo {
    BufferInfo {
        layer_name: name.to_string(),
        width: 720,
        height: 1280,
        stride: 720,
        format: 1,
    }
}

#[allow(dead_code)]
pub fn empty_handle() -> BufferHandle {
    BufferHandle::new(vec![], vec![])
}
