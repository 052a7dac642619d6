#![deny(
    clippy::get_unwrap,
    clippy::panic,
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::use_debug
)]

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser};
use clap_complete::CompleteEnv;
use guestbox::actions;
use guestbox::config::{cli, resolve_config};
use guestbox::logger::GuestboxLogger;
use guestbox::util::{
    drop_privileges, print_json_output, resolve_uid_gid_home, set_json_output,
    set_should_print_output,
};
use log::Log;
use serde_json::Value;

pub fn main() -> Result<()> {
    // Tab completion. This does not return when completion was requested.
    if std::env::var_os("COMPLETE").is_some() {
        let uid_gid_home = resolve_uid_gid_home()?;
        drop_privileges(uid_gid_home.uid, uid_gid_home.gid)?;
        CompleteEnv::with_factory(cli::Args::command).complete();
        return Ok(());
    }

    let logger = GuestboxLogger::new(log::LevelFilter::Trace)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let cli: cli::Args = cli::Args::parse();
    logger.set_level(cli.log_level.unwrap_or(log::LevelFilter::Info));

    let config = resolve_config(cli.clone()).context("Resolving config")?;
    let uid_gid_home =
        resolve_uid_gid_home().context("Resolving uid/gid/home")?;

    // Messages held back while loading the config are filtered by the level
    // it asked for
    logger.set_level(config.log_level);
    logger.print_deferred();

    set_should_print_output(!cli.json);
    let creds = uid_gid_home.credentials();

    let result = match cli.action {
        cli::Action::Start { serve } => actions::start(&config, creds, serve),
        cli::Action::Stop => actions::stop(&config, creds),
        cli::Action::Status => actions::status(&config),
        cli::Action::Serve => actions::serve(&config, creds),
        cli::Action::Config { keys } => actions::config(&config, keys),
        cli::Action::IdMap => actions::id_map(creds),
    };

    if cli.json {
        match &result {
            Ok(()) => {
                set_json_output("status", &Value::String("success".to_string()))
            }
            Err(e) => {
                set_json_output("status", &Value::String("error".to_string()));
                set_json_output("error", &Value::String(format!("{:#}", e)));
            }
        }
        print_json_output()?;
        if result.is_err() {
            logger.flush();
            std::process::exit(1);
        }
    }
    logger.flush();
    result
}
