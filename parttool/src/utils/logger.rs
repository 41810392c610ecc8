// SPDX-License-Identifier: MIT

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Quiet,
    Normal,
    Verbose,
}

impl LogLevel {
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => LogLevel::Quiet,
            (false, true) => LogLevel::Verbose,
            (false, false) => LogLevel::Normal,
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Quiet => LevelFilter::Error,
            LogLevel::Normal => LevelFilter::Info,
            LogLevel::Verbose => LevelFilter::Debug,
        }
    }
}

struct ToolLogger;

static LOGGER: ToolLogger = ToolLogger;

impl Log for ToolLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => eprintln!("[parttool] {} {}", "error:".red().bold(), record.args()),
            Level::Warn => eprintln!("[parttool] {} {}", "warning:".yellow(), record.args()),
            Level::Info => eprintln!("[parttool] {}", record.args()),
            Level::Debug | Level::Trace => {
                eprintln!("[parttool] {}", format!("{}", record.args()).dimmed())
            }
        }
    }

    fn flush(&self) {}
}

/// Installs the `[parttool]` logger. Safe to call more than once.
pub fn init_logger(level: LogLevel) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level.filter());
}
