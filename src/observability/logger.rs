//! Structured JSON logger
//!
//! - One line per event, written synchronously
//! - `event` first, then `severity`, then fields sorted by key
//! - Lines below the logger's minimum level are dropped
//!
//! The logger is a handle passed to whoever logs. Clones share the sink.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::events::Event;

/// Log levels, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    /// Unrecoverable, the log must not be used further
    Fatal = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "INFO" => Ok(Level::Info),
            "WARN" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "FATAL" => Ok(Level::Fatal),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
enum Sink {
    Stdout,
    Stderr,
    Memory(Arc<Mutex<Vec<String>>>),
}

#[derive(Debug, Clone)]
pub struct Logger {
    sink: Sink,
    min_level: Level,
}

impl Default for Logger {
    fn default() -> Self {
        Self::stdout(Level::Info)
    }
}

impl Logger {
    pub fn stdout(min_level: Level) -> Self {
        Self {
            sink: Sink::Stdout,
            min_level,
        }
    }

    pub fn stderr(min_level: Level) -> Self {
        Self {
            sink: Sink::Stderr,
            min_level,
        }
    }

    /// Logger that keeps every line in memory, for tests and embedding.
    pub fn memory(min_level: Level) -> Self {
        Self {
            sink: Sink::Memory(Arc::new(Mutex::new(Vec::new()))),
            min_level,
        }
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    /// Lines captured by a memory logger, without trailing newlines.
    /// Empty for the other sinks.
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(buf) => buf.lock().map(|lines| lines.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn log(&self, level: Level, event: Event, fields: &[(&str, &str)]) {
        if level < self.min_level {
            return;
        }
        let line = format_line(level, event.as_str(), fields);
        match &self.sink {
            Sink::Stdout => write_line(&mut io::stdout(), &line),
            Sink::Stderr => write_line(&mut io::stderr(), &line),
            Sink::Memory(buf) => {
                // A poisoned buffer only loses log lines
                if let Ok(mut lines) = buf.lock() {
                    lines.push(line);
                }
            }
        }
    }

    /// Logs at the event's natural level: FATAL for fatal events, INFO otherwise.
    pub fn event(&self, event: Event, fields: &[(&str, &str)]) {
        let level = if event.is_fatal() { Level::Fatal } else { Level::Info };
        self.log(level, event, fields);
    }

    pub fn trace(&self, event: Event, fields: &[(&str, &str)]) {
        self.log(Level::Trace, event, fields);
    }

    pub fn info(&self, event: Event, fields: &[(&str, &str)]) {
        self.log(Level::Info, event, fields);
    }

    pub fn warn(&self, event: Event, fields: &[(&str, &str)]) {
        self.log(Level::Warn, event, fields);
    }

    pub fn error(&self, event: Event, fields: &[(&str, &str)]) {
        self.log(Level::Error, event, fields);
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) {
    let mut out = String::with_capacity(line.len() + 1);
    out.push_str(line);
    out.push('\n');
    let _ = writer.write_all(out.as_bytes());
    let _ = writer.flush();
}

fn format_line(level: Level, event: &str, fields: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(128);
    output.push_str("{\"event\":\"");
    escape_json_string(&mut output, event);
    output.push_str("\",\"severity\":\"");
    output.push_str(level.as_str());
    output.push('"');

    let mut sorted: Vec<_> = fields.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    for (key, value) in sorted {
        output.push_str(",\"");
        escape_json_string(&mut output, key);
        output.push_str("\":\"");
        escape_json_string(&mut output, value);
        output.push('"');
    }
    output.push('}');
    output
}

fn escape_json_string(output: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if c.is_control() => output.push_str(&format!("\\u{:04x}", c as u32)),
            c => output.push(c),
        }
    }
}
