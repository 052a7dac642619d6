use crate::config::Config;
use crate::container::{CONTAINER_NAME, LxcContainer, LxcRuntime, State};
use crate::outln;
use crate::types::Credentials;
use crate::util::{Lock, set_json_output};
use anyhow::{Context, Result};
use log::trace;
use serde_json::Value;

/// Stops the container, whichever process started it. Stopping a container
/// that isn't running is not an error.
pub fn stop(config: &Config, creds: Credentials) -> Result<()> {
    let _lock = Lock::container(&config.layout.config_dir, CONTAINER_NAME)?;
    let mut container = LxcContainer::new(
        Box::new(LxcRuntime),
        config.layout.clone(),
        config.privileged,
        creds,
    )?;
    container.attach().context("Attaching to container")?;

    let was_running = container.state() == State::Running;
    trace!("Container running: {}", was_running);
    container.stop().context("Stopping container")?;

    set_json_output("stopped", &Value::Bool(was_running));
    if was_running {
        outln!("Container stopped");
    } else {
        outln!("Container is not running");
    }
    Ok(())
}
