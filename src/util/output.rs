#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

static JSON_OUTPUT: LazyLock<Mutex<Map<String, Value>>> =
    LazyLock::new(|| Mutex::new(Map::new()));
static SHOULD_PRINT_OUTPUT: AtomicBool = AtomicBool::new(true);

fn json_output() -> MutexGuard<'static, Map<String, Value>> {
    match JSON_OUTPUT.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// With `--json` every action reports through `set_json_output` instead.
pub fn set_should_print_output(should_print: bool) {
    SHOULD_PRINT_OUTPUT.store(should_print, Ordering::Relaxed);
}

pub fn print_output(printed_output: &str) {
    if SHOULD_PRINT_OUTPUT.load(Ordering::Relaxed) {
        println!("{}", printed_output);
    }
}

pub fn set_json_output(key: &str, value: &Value) {
    json_output().insert(key.to_string(), value.clone());
}

#[macro_export]
macro_rules! outln {
    ( $fmt:expr $(, $args:expr)*) => {
        $crate::util::print_output(&format!($fmt $(, $args)*))
    };
}

pub fn print_json_output() -> Result<()> {
    let map = json_output().clone();
    println!(
        "{}",
        serde_json::to_string_pretty(&Value::Object(map))
            .context("Error serializing JSON")?
    );
    Ok(())
}
