use crate::config::Config;
use crate::graphics::{
    BufferExchangeServer, DisplayRef, HostBufferImporter, NullDisplay,
    ShutdownHandle, SingleWindowComposer, SurfaceRef,
};
use crate::outln;
use crate::types::Credentials;
use crate::util::{TerminationSignals, mkdir, set_json_output};
use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use nix::unistd::chown;
use serde_json::Value;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A buffer exchange server running on its own thread.
pub struct Bridge {
    shutdown: ShutdownHandle,
    thread: JoinHandle<std::io::Result<()>>,
}

impl Bridge {
    /**
     * Binds the socket in the runtime dir and starts serving. Frames are
     * presented on the configured window of a headless display.
     *
     * The runtime dir and socket are handed to `creds`, which is who the
     * guest's system user maps to.
     */
    pub fn spawn(config: &Config, creds: Credentials) -> Result<Bridge> {
        mkdir(&config.runtime_dir, creds.uid, creds.gid)
            .context("Preparing runtime directory")?;

        let mut importer = HostBufferImporter::new(NullDisplay::default());
        importer.bind_window(config.window_id, SurfaceRef(0), DisplayRef(0));
        let composer = Arc::new(SingleWindowComposer::new(importer, config.window_id));

        let (server, shutdown) =
            BufferExchangeServer::bind(&config.runtime_dir, composer)
                .context("Binding buffer exchange socket")?;
        chown(server.socket_path(), Some(creds.uid), Some(creds.gid))
            .context("Changing socket ownership")?;

        set_json_output(
            "socket",
            &Value::String(server.socket_path().to_string_lossy().into_owned()),
        );
        outln!("Serving buffers on {}", server.socket_path().display());

        let thread = server
            .spawn()
            .context("Starting buffer exchange thread")?;
        Ok(Bridge { shutdown, thread })
    }

    pub fn stop(self) -> Result<()> {
        self.shutdown.shutdown();
        match self.thread.join() {
            Ok(result) => result.context("Buffer exchange server failed"),
            Err(_) => Err(anyhow!("Buffer exchange thread panicked")),
        }
    }
}

pub fn serve(config: &Config, creds: Credentials) -> Result<()> {
    let signals = TerminationSignals::block()?;
    let bridge = Bridge::spawn(config, creds)?;

    let signal = signals.wait()?;
    debug!("Received {}, shutting down", signal);
    if let Err(e) = bridge.stop() {
        warn!("{:#}", e);
    }
    Ok(())
}
