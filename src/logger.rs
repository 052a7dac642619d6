use colored::{Color, ColoredString, Colorize};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

/// Logging must keep working after a panic on another thread.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/**
 * Coloured stderr logger.
 *
 * Everything logged before `print_deferred` is held back, so messages
 * emitted while the config is being resolved are filtered by the level
 * the config ends up asking for.
 */
pub struct GuestboxLogger {
    level: Mutex<LevelFilter>,
    output: Mutex<Box<dyn Write + Send>>,
    deferred: Mutex<Option<Vec<(Level, ColoredString)>>>,
}

impl GuestboxLogger {
    pub fn new(level: LevelFilter) -> &'static Self {
        Box::leak(Box::new(Self {
            level: Mutex::new(level),
            output: Mutex::new(Box::new(io::stderr())),
            deferred: Mutex::new(Some(Vec::new())),
        }))
    }

    pub fn init(&'static self) -> Result<&'static Self, log::SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(LevelFilter::Trace);
        Ok(self)
    }

    pub fn set_level(&self, level: LevelFilter) {
        *lock(&self.level) = level;
    }

    /// Writes out held back messages that pass the current level and stops
    /// deferring.
    pub fn print_deferred(&self) {
        let Some(deferred) = lock(&self.deferred).take() else {
            return;
        };
        let level_filter = *lock(&self.level);
        let mut output = lock(&self.output);
        for (level, message) in deferred {
            if level <= level_filter {
                let _ = writeln!(output, "{}", message);
            }
        }
    }

    fn format(record: &Record) -> ColoredString {
        let (level_str, color) = match record.level() {
            Level::Error => (record.level().to_string(), Color::Red),
            Level::Warn => (format!("{} ", record.level()), Color::Yellow),
            Level::Info => (format!("{} ", record.level()), Color::White),
            Level::Debug => (record.level().to_string(), Color::Blue),
            Level::Trace => (record.level().to_string(), Color::BrightBlack),
        };
        format!(
            "[{}] {}: {}",
            level_str.color(color),
            record.target(),
            record.args()
        )
        .color(color)
    }
}

impl Log for GuestboxLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= *lock(&self.level)
    }

    fn log(&self, record: &Record) {
        let line = Self::format(record);
        if let Some(deferred) = lock(&self.deferred).as_mut() {
            deferred.push((record.level(), line));
            return;
        }
        if self.enabled(record.metadata()) {
            let _ = writeln!(lock(&self.output), "{}", line);
        }
    }

    fn flush(&self) {
        let _ = lock(&self.output).flush();
    }
}
