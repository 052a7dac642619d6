use super::serve::Bridge;
use crate::config::Config;
use crate::container::{CONTAINER_NAME, LxcContainer, LxcRuntime};
use crate::outln;
use crate::types::Credentials;
use crate::util::{Lock, TerminationSignals, set_json_output};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::Value;

/**
 * Starts the container and keeps it up until SIGINT or SIGTERM, optionally
 * serving buffers alongside.
 *
 * The lifecycle lock is only held while starting and stopping, so `stop`
 * from another process still works while we wait.
 */
pub fn start(config: &Config, creds: Credentials, serve: bool) -> Result<()> {
    let signals = TerminationSignals::block()?;

    let mut container = LxcContainer::new(
        Box::new(LxcRuntime),
        config.layout.clone(),
        config.privileged,
        creds,
    )
    .context("Preparing container directories")?;

    {
        let _lock = Lock::container(&config.layout.config_dir, CONTAINER_NAME)?;
        container
            .start(&config.container_configuration())
            .context("Starting container")?;
    }
    set_json_output("state", &Value::String("running".to_string()));
    outln!("Container started");

    let bridge = if serve {
        match Bridge::spawn(config, creds) {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                stop_container(config, &mut container);
                return Err(e);
            }
        }
    } else {
        None
    };

    let signal = signals.wait()?;
    debug!("Received {}, shutting down", signal);

    if let Some(bridge) = bridge {
        if let Err(e) = bridge.stop() {
            warn!("{:#}", e);
        }
    }
    stop_container(config, &mut container);
    outln!("Container stopped");
    Ok(())
}

fn stop_container(config: &Config, container: &mut LxcContainer) {
    let _lock = match Lock::container(&config.layout.config_dir, CONTAINER_NAME)
    {
        Ok(lock) => lock,
        Err(e) => {
            warn!("{:#}", e);
            return;
        }
    };
    if let Err(e) = container.stop() {
        warn!("Failed to stop container: {}", e);
    }
}
