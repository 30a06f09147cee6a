//! Line serialization shared by the file sink and the trace channel.

use std::fmt::Write as _;

use colored::Colorize;

use crate::{
    event::{EventId, LogEvent, Payload},
    level::LogLevel,
};

pub const EMPTY_STRING: &str = "<EMPTY>";

/// Removes CR, LF and TAB, then trims.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Removes line breaks, tabs and characters not allowed in file names, then trims.
pub fn clean_file_name(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                c,
                '\n' | '\r' | '\t' | '\\' | '/' | '*' | '?' | '|' | '<' | '>' | ':' | '"'
            )
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `name=value` pairs joined by `, `; blank names or values become `<EMPTY>`.
pub fn format_parameters(parameters: &[(String, String)]) -> String {
    let mut out = String::new();
    for (i, (name, value)) in parameters.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let name = non_empty(clean_text(name));
        let value = non_empty(clean_text(value));
        let _ = write!(out, "{name}={value}");
    }
    out
}

fn non_empty(text: String) -> String {
    if text.is_empty() {
        EMPTY_STRING.to_string()
    } else {
        text
    }
}

fn optional_id(id: EventId) -> String {
    if id.is_valid() {
        id.to_string()
    } else {
        String::new()
    }
}

/// Serializes `event` into one newline-terminated line, optionally pointing at
/// its resource file.
pub fn serialize_line(event: &LogEvent, resource: Option<&str>) -> String {
    let mut line = String::with_capacity(96 + event.text.len());
    let parameters = match &event.payload {
        Payload::Parameters(parameters) => format!("{{{}}}", format_parameters(parameters)),
        _ => String::new(),
    };
    let (value, lower, upper) = match event.payload.measurement() {
        Some(m) => (m.value.to_string(), m.lower.to_string(), m.upper.to_string()),
        None => Default::default(),
    };
    let _ = write!(
        line,
        "{} [{}-{}]\t#{}\t{}\t'{}'\t{}\t{}\t{}\t{}\t{}\t{}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S:%3f"),
        event.level.tag(),
        event.kind().tag(),
        event.thread,
        event.id,
        clean_text(&event.text),
        parameters,
        optional_id(event.parent_id),
        optional_id(event.start_id),
        value,
        lower,
        upper,
    );
    line.truncate(line.trim_end().len());
    if let Some(resource) = resource.map(clean_text).filter(|r| !r.is_empty()) {
        let _ = write!(line, "\t{{Resource={resource}}}");
    }
    line.push('\n');
    line
}

fn colored_tag(level: LogLevel) -> String {
    let tag = level.tag();
    match level {
        LogLevel::Fatal => tag.red().bold().to_string(),
        LogLevel::Error => tag.red().to_string(),
        LogLevel::Warning => tag.yellow().to_string(),
        LogLevel::Info => tag.green().to_string(),
        LogLevel::Debug => tag.blue().to_string(),
    }
}

/// Line written to the trace channel: the serialized line prefixed by the
/// logger name, with a coloured level tag.
pub fn trace_line(event: &LogEvent) -> String {
    let line = serialize_line(event, None);
    let plain = format!("[{}-", event.level.tag());
    let colored = format!("[{}-", colored_tag(event.level));
    format!("{} {}", event.logger, line.trim_end().replacen(&plain, &colored, 1))
}

/// Writes `event` to the secondary debug channel (stderr).
pub fn write_trace(event: &LogEvent) {
    eprintln!("{}", trace_line(event));
}
