//! Alarm and blocked event sinks
//!
//! The capture loop emits its two event kinds through an injected
//! [`EventSink`] rather than a global logger, so tests capture emitted
//! lines deterministically. The production sink forwards every line to
//! `tracing` and optionally appends timestamped copies to the configured
//! alarm/blocked log files.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::config::Config;

/// Destination for the capture loop's alarm and blocked lines.
pub trait EventSink: Send {
    fn alarm(&mut self, message: &str);
    fn blocked(&mut self, message: &str);
}

/// Production sink: tracing plus optional append-mode log files.
pub struct LogSink {
    alarm_file: Option<File>,
    blocked_file: Option<File>,
}

impl LogSink {
    /// Open the configured log files. An unwritable path is a setup-time
    /// failure: the process must terminate before the capture loop starts.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            alarm_file: config.alarm_log.as_deref().map(open_append).transpose()?,
            blocked_file: config.blocked_log.as_deref().map(open_append).transpose()?,
        })
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

fn write_line(file: &mut Option<File>, message: &str) {
    if let Some(f) = file {
        let stamp = Local::now().format("%Y/%m/%d %H:%M:%S%.6f");
        // A failed write must not take down the capture loop.
        let _ = writeln!(f, "{} {}", stamp, message);
    }
}

impl EventSink for LogSink {
    fn alarm(&mut self, message: &str) {
        info!("{}", message);
        write_line(&mut self.alarm_file, message);
    }

    fn blocked(&mut self, message: &str) {
        info!("{}", message);
        write_line(&mut self.blocked_file, message);
    }
}

/// In-memory sink recording every emitted line, for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub alarms: Vec<String>,
    pub blocked: Vec<String>,
}

impl EventSink for MemorySink {
    fn alarm(&mut self, message: &str) {
        self.alarms.push(message.to_string());
    }

    fn blocked(&mut self, message: &str) {
        self.blocked.push(message.to_string());
    }
}
