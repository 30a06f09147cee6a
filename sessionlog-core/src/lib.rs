//! # sessionlog-core
//! Core pipeline for sessionlog: session lifecycle, delivery queue and worker,
//! name-pattern routing, file sinks with rotation, formatters and monitors.

mod cleanup;
mod config;
mod error;
mod event;
mod format;
mod formatter;
mod level;
mod logger;
mod monitor;
mod params;
mod plugins;
mod rotation;
mod router;
mod session;
mod sink;
mod wildcard;
mod worker;

pub use cleanup::{folder_index, next_session_folder, prune_sessions, session_folders};
pub use config::{
    FolderMode, LogConfig, PluginSpec, RouteEntry, SESSIONLOG_ENV, SessionLogEnv, process_name,
};
pub use error::{BoxError, Error, Result};
pub use event::{EventId, LogError, LogEvent, LogObject, Measurement, Payload, PayloadKind};
pub use format::{
    EMPTY_STRING, clean_file_name, clean_text, format_parameters, serialize_line, trace_line,
    write_trace,
};
pub use formatter::{
    DebugFormatter, ErrorTextFormatter, FORMATTER_DEBUG, FORMATTER_TEXT, Formatted, Formatter,
    FormatterProvider, describe_error,
};
pub use level::{LevelFlags, LocalTrace, LogLevel};
pub use logger::{EventOptions, Logger, LoggerRoute};
pub use monitor::{MemoryKind, Monitor, MonitorContext, ProcessMonitor, ProcessSettings};
pub use params::Parameters;
pub use plugins::{MONITOR_PROCESS, MonitorFactory, Plugins, SINK_FILE, SinkFactory};
pub use rotation::{
    Rotation, RotationPolicy, RotationStep, remove_file_if_exists, remove_resources,
};
pub use router::SessionInfo;
pub use session::{RESOURCE_FOLDER, SESSION_LOGGER, SessionManager, SessionMode};
pub use sink::{FileSink, Resource, Sink, SinkInit, render_resource};
pub use wildcard::{WILDCARD_ANY, WILDCARD_ONE, WILDCARD_SEPARATOR, WildcardExpression};
