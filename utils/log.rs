//! `log` backend for Cellvisor
//!
//! All diagnostics go through the `log` facade macros. This module routes
//! the records to a console supplied by the platform (usually a UART
//! driver) and serializes output so that lines from different cores do not
//! interleave.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};

use crate::kernel::sync::SpinLock;
use crate::{Error, Result};

/// Byte sink for log output
pub trait Console: Sync {
    fn write_str(&self, s: &str);
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

/// Logger writing `[LEVEL] target: message` lines to a [`Console`]
pub struct HvLogger {
    console: SpinLock<Option<&'static dyn Console>>,
}

impl HvLogger {
    pub const fn new() -> Self {
        Self {
            console: SpinLock::new(None),
        }
    }

    /// Attach the output sink
    pub fn set_console(&self, console: &'static dyn Console) {
        *self.console.lock() = Some(console);
    }
}

impl Default for HvLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for HvLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // The guard is held for the whole line.
        let console = self.console.lock();
        if let Some(console) = *console {
            let mut out = ConsoleWriter(console);
            let _ = writeln!(
                out,
                "[{:<5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: HvLogger = HvLogger::new();

/// Default level selected by the `debug` and `verbose` features
pub fn default_level() -> LevelFilter {
    if cfg!(feature = "verbose") {
        LevelFilter::Trace
    } else if cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install the hypervisor logger
///
/// Fails with [`Error::InvalidState`] if a logger is already installed.
pub fn init(console: &'static dyn Console, level: LevelFilter) -> Result<()> {
    LOGGER.set_console(console);
    log::set_logger(&LOGGER).map_err(|_| Error::InvalidState)?;
    log::set_max_level(level);
    Ok(())
}
