use anyhow::{Context, Result};
use nix::sys::signal::{SigSet, Signal};

/// SIGINT and SIGTERM, blocked so they can be collected synchronously.
pub struct TerminationSignals {
    mask: SigSet,
}

impl TerminationSignals {
    /// Blocks both signals on the calling thread. Threads spawned afterwards
    /// inherit the mask, so only `wait` ever sees them.
    pub fn block() -> Result<TerminationSignals> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.thread_block()
            .context("Failed to block termination signals")?;
        Ok(TerminationSignals { mask })
    }

    pub fn wait(&self) -> Result<Signal> {
        self.mask.wait().context("Failed waiting for signals")
    }
}
