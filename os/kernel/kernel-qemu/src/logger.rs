use crate::sink::{DebugSink, QemuDebugPort, SinkWriter};
use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing one line per record to a [`DebugSink`]:
/// `[LEVEL] target: message`.
pub struct QemuLogger<S = QemuDebugPort> {
    sink: S,
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self::with_sink(QemuDebugPort, max_level)
    }
}

impl<S: DebugSink> QemuLogger<S> {
    #[must_use]
    pub const fn with_sink(sink: S, max_level: LevelFilter) -> Self {
        Self { sink, max_level }
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

impl<S: DebugSink + Send + Sync + 'static> QemuLogger<S> {
    /// Install as the global logger. Call once during early init.
    ///
    /// # Errors
    /// Another logger is already installed.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S: DebugSink + Send + Sync> Log for QemuLogger<S> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            SinkWriter::new(&self.sink),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<u8>>);

    impl DebugSink for Capture {
        fn put_bytes(&self, bytes: &[u8]) {
            self.0.lock().unwrap().extend_from_slice(bytes);
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn emit(logger: &QemuLogger<Capture>, level: Level, message: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("kernel_alloc::clone")
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn formats_one_line_per_record() {
        let logger = QemuLogger::with_sink(Capture::default(), LevelFilter::Trace);
        emit(&logger, Level::Info, "cloned");
        emit(&logger, Level::Error, "page fault at 0x08000000");
        assert_eq!(
            logger.sink().text(),
            "[INFO] kernel_alloc::clone: cloned\n\
             [ERROR] kernel_alloc::clone: page fault at 0x08000000\n"
        );
    }

    #[test]
    fn honors_the_level_filter() {
        let logger = QemuLogger::with_sink(Capture::default(), LevelFilter::Warn);
        emit(&logger, Level::Debug, "scratch slot 0");
        emit(&logger, Level::Warn, "frame stack full");
        assert_eq!(logger.sink().text(), "[WARN] kernel_alloc::clone: frame stack full\n");
        assert!(!logger.enabled(&Metadata::builder().level(Level::Info).build()));
    }

    #[test]
    fn installs_once() {
        let logger: &'static QemuLogger<Capture> =
            Box::leak(Box::new(QemuLogger::with_sink(Capture::default(), LevelFilter::Info)));
        logger.init().unwrap();
        assert_eq!(log::max_level(), LevelFilter::Info);
        log::info!(target: "boot", "memory manager ready");
        log::debug!(target: "boot", "dropped");
        assert_eq!(logger.sink().text(), "[INFO] boot: memory manager ready\n");

        let again: &'static QemuLogger<Capture> =
            Box::leak(Box::new(QemuLogger::with_sink(Capture::default(), LevelFilter::Info)));
        assert!(again.init().is_err());
    }
}
