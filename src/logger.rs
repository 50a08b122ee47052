use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{stderr, stdout, Write};
use std::sync::{Mutex, Once};

/// Log implementation for the standard output streams.
///
/// Debug and info lines go to stdout, warnings and errors to stderr, so a
/// long-running prober can have its operational stream captured separately
/// from its faults.
pub struct StdLogger(Mutex<()>);

impl StdLogger {
    /// Initialize the process-wide logger.
    ///
    /// Safe to call more than once; only the first call takes effect.
    pub fn init(verbose: bool) {
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            let level = if verbose {
                LevelFilter::Trace
            } else {
                LevelFilter::Info
            };

            log::set_boxed_logger(Box::new(StdLogger(Mutex::new(()))))
                .map(|_| log::set_max_level(level))
                .unwrap();
        });
    }
}

impl Log for StdLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let _guard = self.0.lock().unwrap();
        match record.level() {
            Level::Error | Level::Warn => {
                let stderr = stderr();
                let mut handle = stderr.lock();
                let _ = writeln!(handle, "{}", record.args());
            }
            _ => {
                let stdout = stdout();
                let mut handle = stdout.lock();
                let _ = writeln!(handle, "{}", record.args());
            }
        }
    }

    fn flush(&self) {
        let _ = stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_init() {
        StdLogger::init(true);

        log::trace!("trace log succeeded");
        log::debug!("debug log succeeded");
        log::info!("info log succeeded");
        log::warn!("warn log succeeded");
        log::error!("error log succeeded");
    }

    #[test]
    fn logger_init_twice_is_harmless() {
        StdLogger::init(true);
        StdLogger::init(false);
    }
}
