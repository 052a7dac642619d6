use super::CONFIG_KEYS;
use clap::Parser;
use clap_complete::engine::{ArgValueCompleter, CompletionCandidate};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None,
    override_usage = "\n    guestbox [OPTIONS] <ACTION> [ACTION_ARGUMENTS...]")]
pub struct Args {
    /**********************/
    /* Flags and settings */
    /**********************/
    /// Set the log level to one of trace, debug, info, warn, or error.
    /// `-v` is shorthand for enabling verbose (trace) logging.
    #[arg(short = 'v',
        long,
        global = true,
        default_missing_value = "trace",
        num_args = 0..=1,
        require_equals = true,
        value_parser = parse_log_level
    )]
    pub log_level: Option<log::LevelFilter>,

    /// Directory holding container configs, logs, shadow devices and the
    /// root filesystem. Defaults to `/var/lib/guestbox`.
    #[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<String>,

    /// Directory the buffer exchange socket is created in. Defaults to
    /// `/run/guestbox`.
    #[arg(long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub runtime_dir: Option<String>,

    /// Run the container without an identifier map and with unshifted device
    /// ownership.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub privileged: bool,

    /// Bind mount files or directories into the container. Format:
    /// source:target or just path (mounts to the same path). Can be given
    /// multiple times or as a comma-separated list.
    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    pub bind: Option<Vec<String>>,

    /// Host devices to shadow into the container on top of the standard
    /// set. Can be given multiple times or as a comma-separated list.
    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        action = clap::ArgAction::Append,
        value_hint = clap::ValueHint::FilePath
    )]
    pub device: Option<Vec<String>>,

    /// Host window the received frames are presented on.
    #[arg(long, global = true)]
    pub window_id: Option<u64>,

    /// Formats action output as a JSON blob.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Do not load config files.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub no_config: bool,

    /***************/
    /* Subcommands */
    /***************/
    #[command(subcommand)]
    pub action: Action,
}

#[derive(clap::Subcommand, Clone, Debug)]
#[command(subcommand_help_heading = "Actions")]
pub enum Action {
    /// Start the container. Stays in the foreground and stops the container
    /// again on SIGINT or SIGTERM.
    Start {
        /// Also run the buffer exchange server while the container is up
        #[arg(long)]
        serve: bool,
    },

    /// Stop the container if it is running
    Stop,

    /// Show whether the container is running and which devices are shadowed
    Status,

    /// Run only the buffer exchange server until SIGINT or SIGTERM
    Serve,

    /// Get current configuration options
    Config {
        /// The keys to get from the configuration
        #[arg(value_name = "KEYS", num_args = 0.., add = ArgValueCompleter::new(config_key_completion))]
        keys: Option<Vec<String>>,
    },

    /// Print the identifier map the container would get for the calling user
    IdMap,
}

pub fn config_key_completion(
    current: &std::ffi::OsStr,
) -> Vec<CompletionCandidate> {
    let Some(current) = current.to_str() else {
        return vec![];
    };
    CONFIG_KEYS
        .iter()
        .filter(|key| key.starts_with(current))
        .map(|key| CompletionCandidate::new(*key))
        .collect()
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter, String> {
    s.parse::<log::LevelFilter>().map_err(|e| e.to_string())
}
