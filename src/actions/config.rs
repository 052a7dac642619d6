use crate::config::{CONFIG_KEYS, Config};
use crate::outln;
use crate::util::set_json_output;
use anyhow::{Result, anyhow};
use log::debug;
use serde_json::Value;

pub fn config(config: &Config, keys: Option<Vec<String>>) -> Result<()> {
    let keys =
        keys.unwrap_or_else(|| CONFIG_KEYS.map(String::from).to_vec());
    let multi_line = keys.len() > 1;

    for key in keys {
        let (key, value) = config
            .value_of(&key)
            .ok_or_else(|| anyhow!("Unknown key: {}", key))?;
        if let Some(source) = config.sources.get(key) {
            debug!("{}={} set from {}", key, value, source);
        }
        set_json_output(key, &Value::String(value.clone()));

        if multi_line {
            outln!("{}={}", key, value);
        } else {
            outln!("{}", value);
        }
    }

    Ok(())
}
