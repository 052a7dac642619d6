use super::cli::Args;
use super::structs::{
    BindMount, Config, DEFAULT_DATA_DIR, DEFAULT_RUNTIME_DIR, PartialConfig,
};
use crate::container::ContainerLayout;
use crate::util::{expand_tilde, resolve_uid_gid_home};
use anyhow::{Context, Result, anyhow};
use log::trace;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub fn resolve_config(cli: Args) -> Result<Config> {
    let home = resolve_uid_gid_home()?.home;
    let (partial_config, sources) = load_partial(cli.no_config, &home)?;
    resolve_layers(partial_config, sources, cli, &home, |var| {
        std::env::var(var).ok()
    })
}

/// Applies the environment and then the command line on top of whatever the
/// config files produced.
pub(crate) fn resolve_layers(
    mut partial_config: PartialConfig,
    mut sources: HashMap<String, String>,
    cli: Args,
    home: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    apply_environment(&mut partial_config, &mut sources, env)?;

    // CLI args have the highest precedence
    if let Some(log_level) = cli.log_level {
        partial_config.log_level = Some(log_level);
        sources.insert("log_level".into(), "cli".into());
    }
    if let Some(data_dir) = cli.data_dir {
        partial_config.data_dir = Some(data_dir);
        sources.insert("data_dir".into(), "cli".into());
    }
    if let Some(runtime_dir) = cli.runtime_dir {
        partial_config.runtime_dir = Some(runtime_dir);
        sources.insert("runtime_dir".into(), "cli".into());
    }
    if cli.privileged {
        partial_config.privileged = Some(true);
        sources.insert("privileged".into(), "cli".into());
    }
    if let Some(window_id) = cli.window_id {
        partial_config.window_id = Some(window_id);
        sources.insert("window_id".into(), "cli".into());
    }
    if let Some(binds) = cli.bind {
        extend(&mut partial_config.bind_mounts, binds);
        sources.insert("bind_mounts".into(), "cli".into());
    }
    if let Some(devices) = cli.device {
        extend(&mut partial_config.devices, devices);
        sources.insert("devices".into(), "cli".into());
    }

    let mut defaulted = |key: &str| {
        sources.entry(key.into()).or_insert_with(|| "default".into());
    };
    defaulted("log_level");
    defaulted("data_dir");
    defaulted("runtime_dir");
    defaulted("privileged");
    defaulted("window_id");
    defaulted("bind_mounts");
    defaulted("devices");

    let data_dir = expand_tilde(
        partial_config.data_dir.as_deref().unwrap_or(DEFAULT_DATA_DIR),
        home,
    );
    let runtime_dir = expand_tilde(
        partial_config
            .runtime_dir
            .as_deref()
            .unwrap_or(DEFAULT_RUNTIME_DIR),
        home,
    );

    let bind_mounts = dedup(partial_config.bind_mounts.unwrap_or_default())
        .iter()
        .map(|b| BindMount::from_str(b))
        .collect::<Result<Vec<_>>>()?;
    let devices = dedup(partial_config.devices.unwrap_or_default())
        .iter()
        .map(|d| expand_tilde(d, home))
        .collect();

    let layout = ContainerLayout::under(&data_dir);
    for key in ["config_dir", "log_dir", "devices_dir", "rootfs_dir"] {
        sources.insert(key.into(), "derived from data_dir".into());
    }
    sources.insert("socket_path".into(), "derived from runtime_dir".into());

    let config = Config {
        log_level: partial_config.log_level.unwrap_or(log::LevelFilter::Info),
        data_dir,
        runtime_dir,
        privileged: partial_config.privileged.unwrap_or(false),
        bind_mounts,
        devices,
        window_id: partial_config.window_id.unwrap_or(0),
        layout,
        sources,
    };
    validate_config(&config)?;

    trace!("Data dir: {}", config.data_dir.display());
    trace!("Runtime dir: {}", config.runtime_dir.display());
    Ok(config)
}

fn apply_environment(
    partial_config: &mut PartialConfig,
    sources: &mut HashMap<String, String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let env = |var: &str| env(var).filter(|v| !v.is_empty());

    if let Some(log_level) = env("GUESTBOX_LOG_LEVEL") {
        let log_level = log::LevelFilter::from_str(&log_level)
            .map_err(|_| anyhow!("Invalid log level: {}", log_level))?;
        partial_config.log_level = Some(log_level);
        sources.insert("log_level".into(), "environment".into());
    }
    if let Some(data_dir) = env("GUESTBOX_DATA_DIR") {
        partial_config.data_dir = Some(data_dir);
        sources.insert("data_dir".into(), "environment".into());
    }
    if let Some(runtime_dir) = env("GUESTBOX_RUNTIME_DIR") {
        partial_config.runtime_dir = Some(runtime_dir);
        sources.insert("runtime_dir".into(), "environment".into());
    }
    if let Some(privileged) = env("GUESTBOX_PRIVILEGED") {
        let privileged = bool::from_str(&privileged).map_err(|_| {
            anyhow!("Invalid value for GUESTBOX_PRIVILEGED: {}", privileged)
        })?;
        partial_config.privileged = Some(privileged);
        sources.insert("privileged".into(), "environment".into());
    }

    // Lists are additive
    if let Some(binds) = env("GUESTBOX_BIND") {
        extend(&mut partial_config.bind_mounts, split_list(&binds));
        sources.insert("bind_mounts".into(), "environment".into());
    }
    if let Some(devices) = env("GUESTBOX_DEVICE") {
        extend(&mut partial_config.devices, split_list(&devices));
        sources.insert("devices".into(), "environment".into());
    }
    Ok(())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn extend(list: &mut Option<Vec<String>>, more: Vec<String>) {
    match list {
        Some(existing) => existing.extend(more),
        None => *list = Some(more),
    }
}

/// Drops repeats, keeping the first occurrence.
fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

pub fn load_partial(
    no_config: bool,
    home: &Path,
) -> Result<(PartialConfig, HashMap<String, String>)> {
    let config_paths = if no_config {
        vec![]
    } else {
        find_config_files(home)
    };
    let mut sources = HashMap::new();
    let mut merged_config = PartialConfig::default();
    if config_paths.is_empty() {
        trace!("No config files found, using default config");
    }

    for path in config_paths.iter() {
        let config_str = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read config file {}", path.display())
        })?;
        let config: PartialConfig = toml::from_str(&config_str).with_context(
            || format!("Failed to parse config file {}", path.display()),
        )?;
        merge_configs(
            &mut merged_config,
            &mut sources,
            config,
            &path.to_string_lossy(),
        );
        trace!("Loaded config file: {}", path.display());
    }

    Ok((merged_config, sources))
}

/// System wide first, so the user's file wins.
fn find_config_files(home: &Path) -> Vec<PathBuf> {
    [
        PathBuf::from("/etc/guestbox.toml"),
        home.join(".config/guestbox/config.toml"),
    ]
    .into_iter()
    .filter(|path| path.is_file())
    .collect()
}

fn merge_configs(
    base: &mut PartialConfig,
    sources: &mut HashMap<String, String>,
    override_config: PartialConfig,
    source: &str,
) {
    if let Some(log_level) = override_config.log_level {
        base.log_level = Some(log_level);
        sources.insert("log_level".into(), source.into());
    }
    if let Some(data_dir) = override_config.data_dir {
        base.data_dir = Some(data_dir);
        sources.insert("data_dir".into(), source.into());
    }
    if let Some(runtime_dir) = override_config.runtime_dir {
        base.runtime_dir = Some(runtime_dir);
        sources.insert("runtime_dir".into(), source.into());
    }
    if let Some(privileged) = override_config.privileged {
        base.privileged = Some(privileged);
        sources.insert("privileged".into(), source.into());
    }
    if let Some(window_id) = override_config.window_id {
        base.window_id = Some(window_id);
        sources.insert("window_id".into(), source.into());
    }
    if let Some(bind_mounts) = override_config.bind_mounts {
        extend(&mut base.bind_mounts, bind_mounts);
        sources.insert("bind_mounts".into(), source.into());
    }
    if let Some(devices) = override_config.devices {
        extend(&mut base.devices, devices);
        sources.insert("devices".into(), source.into());
    }
}

fn validate_config(config: &Config) -> Result<()> {
    for (key, dir) in [
        ("data_dir", &config.data_dir),
        ("runtime_dir", &config.runtime_dir),
    ] {
        if !dir.is_absolute() {
            return Err(anyhow!("{} must be absolute: {}", key, dir.display()));
        }
    }
    if let Some(device) = config.devices.iter().find(|d| !d.is_absolute()) {
        return Err(anyhow!("Device path must be absolute: {}", device.display()));
    }
    Ok(())
}
