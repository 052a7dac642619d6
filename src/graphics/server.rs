use super::buffer::{BufferHandle, SYNC_BYTE};
use super::codec::{Frame, read_exact, recv_native_handle};
use crate::errors::ProtocolError;
use log::{debug, trace, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{Shutdown, shutdown};
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

pub const SOCKET_NAME: &str = "sfdroid_head";

/// One layer of a frame as handed to the composer. The buffer is only
/// borrowed for the duration of `submit_layers`.
#[derive(Debug)]
pub struct Renderable<'a> {
    pub name: &'a str,
    pub buffer: &'a BufferHandle,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: i32,
}

/// Decides what happens to the layers received from the guest.
pub trait LayerComposer: Send + Sync {
    fn submit_layers(&self, layers: &[Renderable<'_>]);
}

/// Duplicate of the connection being served, if any.
type ActiveConnection = Arc<Mutex<Option<OwnedFd>>>;

fn lock_active(active: &ActiveConnection) -> MutexGuard<'_, Option<OwnedFd>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Stops a running `BufferExchangeServer` from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    wake: Arc<OwnedFd>,
    active: ActiveConnection,
}

impl ShutdownHandle {
    /// Wakes the accept loop and shuts down the connection being served,
    /// which also ends a `recvmsg` or ack write stuck on a stalled peer.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // A full pipe already wakes the server
        match nix::unistd::write(self.wake.as_fd(), &[1]) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => warn!("Failed to wake buffer exchange server: {}", e),
        }
        if let Some(connection) = lock_active(&self.active).as_ref() {
            match shutdown(connection.as_raw_fd(), Shutdown::Both) {
                Ok(()) | Err(Errno::ENOTCONN) => {}
                Err(e) => warn!("Failed to shut down connection: {}", e),
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

enum Wait {
    Ready,
    Shutdown,
}

/**
 * Accepts guest connections on `<runtime_dir>/sfdroid_head` and serves them
 * one at a time.
 *
 * Each connection loops over sync byte, counts, envelope. Every decoded
 * frame goes to the composer as a one layer batch, its descriptors are
 * closed and the sync byte is echoed back. Any framing error closes that
 * connection and the server goes back to accepting.
 *
 * Every wait for the peer also watches a wake pipe, and `ShutdownHandle`
 * shuts down the connection being served, so `serve` ends without waiting
 * for the peer even in the middle of a frame.
 */
pub struct BufferExchangeServer {
    socket_path: PathBuf,
    listener: UnixListener,
    composer: Arc<dyn LayerComposer>,
    stop: Arc<AtomicBool>,
    wake: OwnedFd,
    active: ActiveConnection,
}

impl BufferExchangeServer {
    pub fn bind(
        runtime_dir: &Path,
        composer: Arc<dyn LayerComposer>,
    ) -> std::io::Result<(BufferExchangeServer, ShutdownHandle)> {
        let socket_path = runtime_dir.join(SOCKET_NAME);
        match std::fs::remove_file(&socket_path) {
            Ok(()) => trace!("Removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        let (wake, wake_tx) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        debug!("Buffer exchange listening on {}", socket_path.display());

        let stop = Arc::new(AtomicBool::new(false));
        let active = ActiveConnection::default();
        let shutdown = ShutdownHandle {
            stop: stop.clone(),
            wake: Arc::new(wake_tx),
            active: active.clone(),
        };
        Ok((
            BufferExchangeServer {
                socket_path,
                listener,
                composer,
                stop,
                wake,
                active,
            },
            shutdown,
        ))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs `serve` on a named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<std::io::Result<()>>> {
        std::thread::Builder::new()
            .name("buffer-exchange".to_string())
            .spawn(move || self.serve())
    }

    /// Accept loop. Returns once shut down, or on a listener failure.
    pub fn serve(&self) -> std::io::Result<()> {
        loop {
            if let Wait::Shutdown = self.wait_readable(self.listener.as_fd())? {
                debug!("Buffer exchange shutting down");
                return Ok(());
            }
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            debug!("Accepted buffer exchange connection");
            // Registered before the first wait, which rechecks the stop flag
            match stream.as_fd().try_clone_to_owned() {
                Ok(dup) => *lock_active(&self.active) = Some(dup),
                Err(e) => {
                    warn!("Dropping connection, failed to duplicate it: {}", e);
                    continue;
                }
            }
            let result = self.serve_connection(&stream);
            lock_active(&self.active).take();
            match result {
                Ok(()) => {}
                Err(_) if self.stop.load(Ordering::SeqCst) => {
                    debug!("Buffer exchange connection shut down");
                }
                Err(ProtocolError::Disconnected) => {
                    debug!("Peer closed the buffer exchange connection");
                }
                Err(e) => warn!("Closing buffer exchange connection: {}", e),
            }
        }
    }

    /// Returns `Ok` only when interrupted by shutdown.
    fn serve_connection(&self, stream: &UnixStream) -> Result<(), ProtocolError> {
        stream.set_nonblocking(false)?;
        loop {
            // AwaitSync
            if let Wait::Shutdown = self.wait_readable(stream.as_fd())? {
                return Ok(());
            }
            let mut sync = [0u8; 1];
            read_exact(stream, &mut sync)?;
            if sync[0] != SYNC_BYTE {
                return Err(ProtocolError::BadSync(sync[0]));
            }

            // AwaitLength
            if let Wait::Shutdown = self.wait_readable(stream.as_fd())? {
                return Ok(());
            }
            let mut counts = [0u8; 2];
            read_exact(stream, &mut counts)?;

            // AwaitPayload
            if let Wait::Shutdown = self.wait_readable(stream.as_fd())? {
                return Ok(());
            }
            let frame =
                recv_native_handle(stream, counts[0] as usize, counts[1] as usize)?;

            self.dispatch(frame);
            (&*stream).write_all(&sync)?;
        }
    }

    fn dispatch(&self, frame: Frame) {
        let Frame { info, handle } = frame;
        trace!(
            "Frame '{}' {}x{} stride {} format {}",
            info.layer_name, info.width, info.height, info.stride, info.format
        );
        let layers = [Renderable {
            name: &info.layer_name,
            buffer: &handle,
            width: info.width,
            height: info.height,
            stride: info.stride,
            format: info.format,
        }];
        self.composer.submit_layers(&layers);
        handle.close();
    }

    fn wait_readable(&self, fd: BorrowedFd<'_>) -> Result<Wait, Errno> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(Wait::Shutdown);
            }
            let mut fds = [
                PollFd::new(fd, PollFlags::POLLIN),
                PollFd::new(self.wake.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
            if fds[1].any().unwrap_or(false) || self.stop.load(Ordering::SeqCst) {
                return Ok(Wait::Shutdown);
            }
            if fds[0].any().unwrap_or(false) {
                return Ok(Wait::Ready);
            }
        }
    }
}

impl Drop for BufferExchangeServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            trace!("Failed to remove {}: {}", self.socket_path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scratch_dir;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        names: Mutex<Vec<String>>,
    }

    impl LayerComposer for Collect {
        fn submit_layers(&self, layers: &[Renderable<'_>]) {
            let mut names = self.names.lock().unwrap();
            names.extend(layers.iter().map(|l| l.name.to_string()));
        }
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = scratch_dir("server-bind");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SOCKET_NAME), "stale").unwrap();

        let (server, _shutdown) =
            BufferExchangeServer::bind(&dir, Arc::new(Collect::default())).unwrap();
        assert_eq!(server.socket_path(), dir.join(SOCKET_NAME));
        assert!(UnixStream::connect(server.socket_path()).is_ok());

        drop(server);
        assert!(!dir.join(SOCKET_NAME).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_shutdown_while_idle() {
        let dir = scratch_dir("server-idle");
        std::fs::create_dir_all(&dir).unwrap();
        let (server, shutdown) =
            BufferExchangeServer::bind(&dir, Arc::new(Collect::default())).unwrap();
        let thread = server.spawn().unwrap();

        shutdown.shutdown();
        assert!(shutdown.is_shutdown());
        thread.join().unwrap().unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Joins `thread`, failing if it is still running after a few seconds.
    fn join_soon(thread: JoinHandle<std::io::Result<()>>) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        while !thread.is_finished() {
            assert!(
                std::time::Instant::now() < deadline,
                "serve() still running after shutdown"
            );
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_with_partial_payload() {
        let dir = scratch_dir("server-partial");
        std::fs::create_dir_all(&dir).unwrap();
        let composer = Arc::new(Collect::default());
        let (server, shutdown) =
            BufferExchangeServer::bind(&dir, composer.clone()).unwrap();
        let path = server.socket_path().to_path_buf();
        let thread = server.spawn().unwrap();

        // Part of a descriptor-free envelope, then nothing
        let client = UnixStream::connect(&path).unwrap();
        (&client).write_all(&[SYNC_BYTE, 0, 2]).unwrap();
        (&client).write_all(&[0u8; 40]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        shutdown.shutdown();
        join_soon(thread);
        assert!(composer.names.lock().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_shutdown_with_stalled_peer() {
        let dir = scratch_dir("server-stalled");
        std::fs::create_dir_all(&dir).unwrap();
        let composer = Arc::new(Collect::default());
        let (server, shutdown) =
            BufferExchangeServer::bind(&dir, composer.clone()).unwrap();
        let path = server.socket_path().to_path_buf();
        let thread = server.spawn().unwrap();

        // sync and counts, then nothing
        let client = UnixStream::connect(&path).unwrap();
        (&client).write_all(&[SYNC_BYTE, 1, 0]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        shutdown.shutdown();
        thread.join().unwrap().unwrap();
        assert!(composer.names.lock().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
