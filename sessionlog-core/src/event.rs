use std::{fmt, sync::Arc};

use chrono::{DateTime, Local};

use crate::{formatter::Formatted, level::LogLevel};

/// Object payloads are rendered through their `Debug` representation.
pub type LogObject = dyn fmt::Debug + Send + Sync;
/// Exception payloads.
pub type LogError = dyn std::error::Error + Send + Sync;

/// Session-unique event id. Ids start at zero on every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(i64);

impl EventId {
    /// Returned for rejected submissions and used for absent correlation ids.
    pub const INVALID: EventId = EventId(-1);

    pub(crate) const fn new(id: i64) -> Self {
        EventId(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for EventId {
    fn default() -> Self {
        EventId::INVALID
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Text,
    Object,
    Exception,
    Bytes,
    Report,
    Parameters,
    AbsoluteValue,
    RelativeValue,
}

impl PayloadKind {
    /// Tag used in serialized lines.
    pub const fn tag(self) -> &'static str {
        match self {
            PayloadKind::Text => "TEXT",
            PayloadKind::Object => "OBJE",
            PayloadKind::Exception => "EXCE",
            PayloadKind::Bytes => "BYTE",
            PayloadKind::Report => "REPT",
            PayloadKind::Parameters => "PARM",
            PayloadKind::AbsoluteValue => "ABS",
            PayloadKind::RelativeValue => "REL",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PayloadKind::Text => "Text",
            PayloadKind::Object => "Object",
            PayloadKind::Exception => "Exception",
            PayloadKind::Bytes => "Bytes",
            PayloadKind::Report => "Report",
            PayloadKind::Parameters => "Parameters",
            PayloadKind::AbsoluteValue => "AbsoluteValue",
            PayloadKind::RelativeValue => "RelativeValue",
        }
    }

    /// Kinds stored in a side-channel resource file.
    pub const fn has_resource(self) -> bool {
        matches!(
            self,
            PayloadKind::Object | PayloadKind::Exception | PayloadKind::Bytes | PayloadKind::Report
        )
    }
}

/// A scalar measurement with its expected range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Text,
    Object {
        object: Arc<LogObject>,
        formatter: Option<String>,
    },
    Exception {
        error: Arc<LogError>,
        formatter: Option<String>,
    },
    Bytes {
        bytes: Vec<u8>,
        extension: String,
    },
    Report {
        report: String,
        extension: String,
    },
    Parameters(Vec<(String, String)>),
    AbsoluteValue(Measurement),
    RelativeValue(Measurement),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text => PayloadKind::Text,
            Payload::Object { .. } => PayloadKind::Object,
            Payload::Exception { .. } => PayloadKind::Exception,
            Payload::Bytes { .. } => PayloadKind::Bytes,
            Payload::Report { .. } => PayloadKind::Report,
            Payload::Parameters(_) => PayloadKind::Parameters,
            Payload::AbsoluteValue(_) => PayloadKind::AbsoluteValue,
            Payload::RelativeValue(_) => PayloadKind::RelativeValue,
        }
    }

    pub fn measurement(&self) -> Option<Measurement> {
        match self {
            Payload::AbsoluteValue(m) | Payload::RelativeValue(m) => Some(*m),
            _ => None,
        }
    }
}

/// One accepted logging call. Built once on the producer thread, then moved
/// through the queue to the worker and never modified.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub id: EventId,
    pub parent_id: EventId,
    pub start_id: EventId,
    pub thread: String,
    pub timestamp: DateTime<Local>,
    /// Also emit this event on the trace channel (when global trace is on).
    pub trace: bool,
    pub logger: Arc<str>,
    /// Route entry the logger resolved to; `None` is the default entry.
    pub entry_id: Option<usize>,
    pub level: LogLevel,
    pub text: String,
    pub payload: Payload,
    /// Present when synchronous rendering of an object/exception was requested.
    pub rendered: Option<Formatted>,
}

impl LogEvent {
    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}

/// Label of the calling thread: its name, or its numeric id.
pub(crate) fn current_thread_label() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id())
            .chars()
            .filter(char::is_ascii_digit)
            .collect(),
    }
}
