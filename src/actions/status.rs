use crate::config::Config;
use crate::container::{CONTAINER_NAME, ContainerRuntime, LxcRuntime};
use crate::outln;
use crate::util::set_json_output;
use anyhow::Result;
use log::trace;
use serde_json::{Value, json};
use std::path::Path;
use walkdir::WalkDir;

/// Reports what the runtime says about the container without attaching a
/// controller to it.
pub fn status(config: &Config) -> Result<()> {
    let handle = LxcRuntime.create(CONTAINER_NAME, &config.layout.config_dir)?;
    let running = handle.is_running();
    let devices = shadow_devices(&config.layout.devices_dir);
    let socket = config.socket_path();
    let serving = socket.exists();

    trace!("{} shadow devices present", devices.len());
    set_json_output(
        "state",
        &Value::String(if running { "running" } else { "inactive" }.to_string()),
    );
    set_json_output("devices", &json!(devices));
    set_json_output("socket", &json!({ "path": socket, "present": serving }));

    outln!("Container: {}", if running { "running" } else { "inactive" });
    outln!(
        "Socket:    {}{}",
        socket.display(),
        if serving { "" } else { " (absent)" }
    );
    if devices.is_empty() {
        outln!("Devices:   none");
    } else {
        outln!("Devices:");
        for device in &devices {
            outln!("  {}", device);
        }
    }
    Ok(())
}

/// Names of the nodes in the private device directory, sorted.
pub fn shadow_devices(devices_dir: &Path) -> Vec<String> {
    WalkDir::new(devices_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scratch_dir;

    #[test]
    fn test_shadow_devices() {
        let dir = scratch_dir("status");
        assert!(shadow_devices(&dir).is_empty());

        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("zero"), "").unwrap();
        std::fs::write(dir.join("null"), "").unwrap();
        std::fs::write(dir.join("nested").join("tty"), "").unwrap();
        assert_eq!(shadow_devices(&dir), vec!["null", "zero"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
