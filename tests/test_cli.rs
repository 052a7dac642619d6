mod fixtures;

use anyhow::Result;
use fixtures::*;
use ::guestbox::graphics::{BufferHandle, SOCKET_NAME, SYNC_BYTE, send_frame, wait_for_ack};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use rstest::*;
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[rstest]
fn test_version(mut guestbox: GuestboxManager) -> Result<()> {
    guestbox.run(&["--version"])?;
    assert!(guestbox.last_stdout.starts_with("guestbox "));
    Ok(())
}

#[rstest]
fn test_bad_arguments(mut guestbox: GuestboxManager) -> Result<()> {
    assert!(guestbox.xfail(&[]));
    assert!(guestbox.xfail(&["--no-such-flag", "status"]));
    assert!(guestbox.xfail(&["launch"]));
    assert!(guestbox.xfail(&["--window-id=abc", "config"]));
    assert!(guestbox.xfail(&["--bind=relative/path", "config"]));
    assert!(guestbox.xfail(&["--device=dev/null", "config"]));
    assert!(guestbox.xfail(&["config", "no_such_key"]));
    Ok(())
}

#[rstest]
fn test_config_defaults(mut guestbox: GuestboxManager) -> Result<()> {
    guestbox.no_default_options = true;
    guestbox.run(&["--no-config", "config", "data_dir"])?;
    assert_eq!(guestbox.last_stdout.trim(), "/var/lib/guestbox");
    guestbox.run(&["--no-config", "config", "socket-path"])?;
    assert_eq!(guestbox.last_stdout.trim(), "/run/guestbox/sfdroid_head");
    guestbox.run(&["--no-config", "config", "privileged", "window_id"])?;
    assert_eq!(guestbox.last_stdout, "privileged=false\nwindow_id=0\n");
    Ok(())
}

#[rstest]
fn test_config_derived_paths(mut guestbox: GuestboxManager) -> Result<()> {
    let data_dir = guestbox.data_dir();
    guestbox.run(&["config", "config_dir", "devices_dir"])?;
    assert_eq!(
        guestbox.last_stdout,
        format!(
            "config_dir={}\ndevices_dir={}\n",
            data_dir.join("containers").display(),
            data_dir.join("devices").display()
        )
    );
    Ok(())
}

#[rstest]
fn test_config_precedence(mut guestbox: GuestboxManager) -> Result<()> {
    guestbox.no_default_options = true;
    guestbox.write_user_config(
        "log_level = \"warn\"\nwindow_id = 3\ndevice = [\"/dev/fuse\"]\n",
    )?;

    guestbox.run(&["config", "window_id"])?;
    assert_eq!(guestbox.last_stdout.trim(), "3");

    assert!(guestbox.epass(&["config", "log_level"], &[("GUESTBOX_LOG_LEVEL", "debug")]));
    assert_eq!(guestbox.last_stdout.trim(), "debug");

    assert!(guestbox.epass(
        &["--log-level=error", "config", "log_level"],
        &[("GUESTBOX_LOG_LEVEL", "debug")]
    ));
    assert_eq!(guestbox.last_stdout.trim(), "error");

    // Device lists add up across layers
    assert!(guestbox.epass(
        &["--device=/dev/kvm", "config", "devices"],
        &[("GUESTBOX_DEVICE", "/dev/ashmem,/dev/fuse")]
    ));
    assert_eq!(guestbox.last_stdout.trim(), "/dev/fuse,/dev/ashmem,/dev/kvm");

    guestbox.run(&["--no-config", "config", "window_id"])?;
    assert_eq!(guestbox.last_stdout.trim(), "0");
    Ok(())
}

#[rstest]
fn test_bad_config_file(mut guestbox: GuestboxManager) -> Result<()> {
    guestbox.no_default_options = true;
    guestbox.write_user_config("no_such_setting = true\n")?;
    assert!(guestbox.xfail(&["config"]));
    assert!(guestbox.pass(&["--no-config", "config"]));
    Ok(())
}

#[rstest]
fn test_invalid_environment(mut guestbox: GuestboxManager) -> Result<()> {
    assert!(guestbox.exfail(&["config"], &[("GUESTBOX_PRIVILEGED", "maybe")]));
    assert!(guestbox.exfail(&["config"], &[("GUESTBOX_LOG_LEVEL", "loud")]));
    assert!(guestbox.epass(
        &["config", "privileged"],
        &[("GUESTBOX_PRIVILEGED", "true")]
    ));
    assert_eq!(guestbox.last_stdout.trim(), "true");
    Ok(())
}

#[rstest]
fn test_id_map(mut guestbox: GuestboxManager) -> Result<()> {
    assert!(guestbox.epass(&["id-map"], &[("SUDO_UID", "1002"), ("SUDO_GID", "1003")]));
    let lines: Vec<&str> = guestbox.last_stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "lxc.id_map = u 0 100000 1000",
            "lxc.id_map = g 0 100000 1000",
            "lxc.id_map = u 1000 1002 1",
            "lxc.id_map = g 1000 1003 1",
            "lxc.id_map = u 1001 101001 64535",
            "lxc.id_map = g 1001 101001 64535",
        ]
    );

    assert!(guestbox.exfail(&["id-map"], &[("SUDO_UID", "0"), ("SUDO_GID", "1003")]));
    assert!(guestbox.exfail(&["id-map"], &[("SUDO_UID", "100500"), ("SUDO_GID", "1003")]));
    assert!(guestbox.exfail(&["id-map"], &[("SUDO_UID", "nobody"), ("SUDO_GID", "1003")]));
    Ok(())
}

#[rstest]
fn test_json_output(mut guestbox: GuestboxManager) -> Result<()> {
    assert!(guestbox.epass(
        &["--json", "id-map"],
        &[("SUDO_UID", "1002"), ("SUDO_GID", "1003")]
    ));
    let json: serde_json::Value = serde_json::from_str(&guestbox.last_stdout)?;
    assert_eq!(json["status"], "success");
    assert_eq!(json["id_map"].as_array().map(|a| a.len()), Some(6));
    assert_eq!(json["id_map"][2]["kind"], "u");
    assert_eq!(json["id_map"][2]["host_start"], 1002);

    guestbox.run(&["--json", "config", "window_id"])?;
    let json: serde_json::Value = serde_json::from_str(&guestbox.last_stdout)?;
    assert_eq!(json["window_id"], "0");

    assert!(guestbox.xfail(&["--json", "config", "no_such_key"]));
    let json: serde_json::Value = serde_json::from_str(&guestbox.last_stdout)?;
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().is_some_and(|e| e.contains("no_such_key")));
    Ok(())
}

#[rstest]
fn test_status_and_stop_when_inactive(mut guestbox: GuestboxManager) -> Result<()> {
    guestbox.run(&["status"])?;
    assert!(guestbox.last_stdout.contains("Container: inactive"));
    assert!(guestbox.last_stdout.contains("(absent)"));
    assert!(guestbox.last_stdout.contains("Devices:   none"));

    guestbox.run(&["stop"])?;
    assert_eq!(guestbox.last_stdout.trim(), "Container is not running");

    guestbox.run(&["--json", "stop"])?;
    let json: serde_json::Value = serde_json::from_str(&guestbox.last_stdout)?;
    assert_eq!(json["stopped"], false);

    guestbox.run(&["--json", "status"])?;
    let json: serde_json::Value = serde_json::from_str(&guestbox.last_stdout)?;
    assert_eq!(json["state"], "inactive");
    assert_eq!(json["socket"]["present"], false);
    Ok(())
}

#[rstest]
fn test_start_requires_root(mut guestbox: GuestboxManager) -> Result<()> {
    if is_root() {
        println!("Skipping, running as root would really start a container");
        return Ok(());
    }
    assert!(guestbox.xfail(&["start"]));
    assert!(guestbox.last_stderr.contains("root"));
    Ok(())
}

#[rstest]
fn test_serve_until_terminated(guestbox: GuestboxManager) -> Result<()> {
    let socket = guestbox.runtime_dir().join(SOCKET_NAME);
    let mut child = Command::new(env!("CARGO_BIN_EXE_guestbox"))
        .env("HOME", guestbox.home())
        .env_remove("SUDO_UID")
        .env_remove("SUDO_GID")
        .arg("--no-config")
        .arg(format!("--data-dir={}", guestbox.data_dir().display()))
        .arg(format!("--runtime-dir={}", guestbox.runtime_dir().display()))
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let deadline = Instant::now() + Duration::from_secs(10);
    let stream = loop {
        match UnixStream::connect(&socket) {
            Ok(stream) => break stream,
            Err(e) if Instant::now() >= deadline => {
                let _ = child.kill();
                return Err(e.into());
            }
            Err(_) => std::thread::sleep(Duration::from_millis(20)),
        }
    };

    let (rx, _tx) = marked_pipe(b"frame");
    let handle = BufferHandle::new(vec![rx], vec![1, 2, 3]);
    send_frame(&stream, &layer_info("layer0"), &handle)?;
    assert_eq!(wait_for_ack(&stream)?, SYNC_BYTE);

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM)?;
    let status = child.wait()?;
    assert!(status.success());
    assert!(!socket.exists());
    Ok(())
}
