//! Console logger.
//!
//! Implements `log::Log` on stderr. Info lines are printed as-is since the
//! build already tags them (`[step]`, `[skip]`, `[ok]`); other levels get a
//! bracketed level tag.

use log::{Level, LevelFilter, Metadata, Record};

static LOGGER: ConsoleLogger = ConsoleLogger;

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match tag(record.level()) {
            Some(tag) => eprintln!("{tag} {}", record.args()),
            None => eprintln!("{}", record.args()),
        }
    }

    fn flush(&self) {}
}

fn tag(level: Level) -> Option<&'static str> {
    match level {
        Level::Error => Some("[error]"),
        Level::Warn => Some("[warn]"),
        Level::Info => None,
        Level::Debug | Level::Trace => Some("[debug]"),
    }
}

/// Install the logger with `max_level` as the runtime filter.
pub fn init(max_level: LevelFilter) -> anyhow::Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("installing logger: {e}"))?;
    log::set_max_level(max_level);
    Ok(())
}
