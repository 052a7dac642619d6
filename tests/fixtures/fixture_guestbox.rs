use anyhow::Result;
use log::warn;
use rand::Rng;
use rstest::*;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn rid() -> String {
    let mut rng = rand::rng();
    (0..10)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect()
}

/// A unique path under the temp dir, not created.
pub fn scratch_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("guestbox-test-{}-{}", prefix, rid()))
}

/// Runs the binary against private data, runtime and home directories.
pub struct GuestboxManager {
    pub root: PathBuf,
    pub last_stdout: String,
    pub last_stderr: String,
    /* skips the default --no-config/--data-dir/--runtime-dir options */
    pub no_default_options: bool,
    pub debug_mode: bool,
}

impl GuestboxManager {
    pub fn new() -> Self {
        let root = scratch_path("cli");
        #[allow(clippy::panic)]
        if let Err(e) = std::fs::create_dir_all(root.join("home")) {
            panic!("Failed to create {}: {}", root.display(), e);
        }
        Self {
            root,
            last_stdout: String::new(),
            last_stderr: String::new(),
            no_default_options: false,
            debug_mode: false,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("run")
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    #[allow(dead_code)]
    pub fn write_user_config(&self, contents: &str) -> Result<()> {
        let dir = self.home().join(".config/guestbox");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("config.toml"), contents)?;
        Ok(())
    }

    pub fn run_with_env(
        &mut self,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<std::process::Output> {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_guestbox"));
        for var in [
            "SUDO_UID",
            "SUDO_GID",
            "SUDO_HOME",
            "GUESTBOX_LOG_LEVEL",
            "GUESTBOX_DATA_DIR",
            "GUESTBOX_RUNTIME_DIR",
            "GUESTBOX_PRIVILEGED",
            "GUESTBOX_BIND",
            "GUESTBOX_DEVICE",
            "COMPLETE",
        ] {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.home());
        for (key, value) in env {
            cmd.env(key, value);
        }

        if !self.no_default_options {
            cmd.arg("--no-config");
            cmd.arg(format!("--data-dir={}", self.data_dir().display()));
            cmd.arg(format!("--runtime-dir={}", self.runtime_dir().display()));
        }
        cmd.args(args);
        println!(
            "Running command: {} {}",
            cmd.get_program().to_string_lossy(),
            cmd.get_args()
                .map(|c| c.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = cmd.output()?;
        self.last_stdout = String::from_utf8_lossy(&output.stdout).to_string();
        self.last_stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "Command failed with {}\nstdout: {}\nstderr: {}",
                output.status,
                self.last_stdout,
                self.last_stderr
            ));
        }
        Ok(output)
    }

    pub fn run(&mut self, args: &[&str]) -> Result<std::process::Output> {
        self.run_with_env(args, &[])
    }

    #[allow(dead_code)]
    pub fn pass(&mut self, args: &[&str]) -> bool {
        if self.run(args).is_ok() {
            return true;
        }
        println!("last_stderr: {}", self.last_stderr);
        println!("last_stdout: {}", self.last_stdout);
        false
    }

    #[allow(dead_code)]
    pub fn xfail(&mut self, args: &[&str]) -> bool {
        if self.run(args).is_err() {
            return true;
        }
        println!("last_stderr: {}", self.last_stderr);
        println!("last_stdout: {}", self.last_stdout);
        false
    }

    #[allow(dead_code)]
    pub fn epass(&mut self, args: &[&str], env: &[(&str, &str)]) -> bool {
        if self.run_with_env(args, env).is_ok() {
            return true;
        }
        println!("last_stderr: {}", self.last_stderr);
        println!("last_stdout: {}", self.last_stdout);
        false
    }

    #[allow(dead_code)]
    pub fn exfail(&mut self, args: &[&str], env: &[(&str, &str)]) -> bool {
        self.run_with_env(args, env).is_err()
    }
}

impl Drop for GuestboxManager {
    fn drop(&mut self) {
        if self.debug_mode {
            warn!("Debug mode is on, *NOT* cleaning up {}", self.root.display());
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.root.display(), e);
            }
        }
    }
}

#[fixture]
pub fn guestbox() -> GuestboxManager {
    GuestboxManager::new()
}

#[allow(dead_code)]
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[allow(dead_code)]
pub fn exists(path: &Path) -> bool {
    path.exists()
}
