//! Minimal stderr logger for the `log` facade.
//!
//! Output: `HH:MM:SS LEVEL [target] message` (UTC).

use std::time::{SystemTime, UNIX_EPOCH};

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let sec_of_day = secs % 86400;

        eprintln!(
            "{:02}:{:02}:{:02} {:<5} [{}] {}",
            sec_of_day / 3600,
            (sec_of_day % 3600) / 60,
            sec_of_day % 60,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

pub fn init(level: log::LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
