use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    config::LogConfig,
    event::{LogEvent, Payload},
    format::{clean_file_name, serialize_line},
    formatter::Formatted,
    params::Parameters,
    rotation::{Rotation, RotationPolicy, RotationStep, remove_file_if_exists, remove_resources},
};

/// Everything a sink learns about its binding when it is created.
#[derive(Debug, Clone)]
pub struct SinkInit {
    pub session_guid: Uuid,
    pub session_folder: PathBuf,
    pub resource_folder: PathBuf,
    pub config: Arc<LogConfig>,
    pub parameters: Parameters,
    pub logger: Arc<str>,
    /// Registered plugin name of this sink.
    pub kind: String,
    /// Sinks of the same kind serving this logger, and this sink's index among them.
    pub sibling_count: usize,
    pub sibling_index: usize,
    pub rotation: RotationPolicy,
}

impl SinkInit {
    /// `<kind><index+1>` when the logger has several sinks of this kind, empty otherwise.
    pub fn sibling_tag(&self) -> String {
        if self.sibling_count > 1 {
            format!("{}{}", self.kind, self.sibling_index + 1)
        } else {
            String::new()
        }
    }
}

/// Durable output target bound to one logger for one session.
///
/// Only the worker thread calls these methods. Errors are reported by the
/// worker and never stop delivery.
pub trait Sink: Send {
    fn init(&mut self, init: SinkInit) -> io::Result<()>;

    fn write(&mut self, event: &LogEvent) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Releases file handles. The sink may be written to again afterwards.
    fn close(&mut self) -> io::Result<()>;
}

/// Resource content of an event, with its file extension.
pub enum Resource<'a> {
    Binary(&'a [u8], String),
    Text(String, String),
}

impl Resource<'_> {
    pub fn extension(&self) -> &str {
        match self {
            Resource::Binary(_, ext) | Resource::Text(_, ext) => ext,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Resource::Binary(bytes, _) => bytes,
            Resource::Text(text, _) => text.as_bytes(),
        }
    }
}

fn extension_or(extension: &str, fallback: &str) -> String {
    let cleaned = clean_file_name(extension)
        .trim_start_matches('.')
        .to_lowercase();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Renders the side-channel payload of `event`, if its kind has one. Objects
/// and exceptions use the pre-rendered result when present.
pub fn render_resource<'a>(config: &LogConfig, event: &'a LogEvent) -> Option<Resource<'a>> {
    let formatted = |rendered: Formatted| {
        let extension = extension_or(&rendered.extension, "txt");
        Resource::Text(rendered.text, extension)
    };
    match &event.payload {
        Payload::Bytes { bytes, extension } => {
            Some(Resource::Binary(bytes, extension_or(extension, "bin")))
        }
        Payload::Report { report, extension } => {
            Some(Resource::Text(report.clone(), extension_or(extension, "txt")))
        }
        Payload::Object { object, formatter } => Some(formatted(match &event.rendered {
            Some(rendered) => rendered.clone(),
            None => config
                .object_formatters
                .format(event.level, object.as_ref(), formatter.as_deref()),
        })),
        Payload::Exception { error, formatter } => Some(formatted(match &event.rendered {
            Some(rendered) => rendered.clone(),
            None => config
                .exception_formatters
                .format(event.level, error.as_ref(), formatter.as_deref()),
        })),
        _ => None,
    }
}

/// Appends serialized lines to `<logger>_<tag>_<generation>.log` and stores
/// resources as `<id>_<logger>_<tag>_<generation>.<Kind>.<ext>`, rotating by
/// message count.
#[derive(Default)]
pub struct FileSink {
    init: Option<SinkInit>,
    rotation: Rotation,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    fn init_args(&self) -> io::Result<&SinkInit> {
        self.init
            .as_ref()
            .ok_or_else(|| io::Error::other("file sink used before init"))
    }

    fn stem(init: &SinkInit, generation: u64) -> String {
        format!("{}_{}_{}", init.logger, init.sibling_tag(), generation)
    }

    pub fn log_path(&self, generation: u64) -> io::Result<PathBuf> {
        let init = self.init_args()?;
        Ok(init
            .session_folder
            .join(format!("{}.log", Self::stem(init, generation))))
    }

    pub fn generation(&self) -> u64 {
        self.rotation.generation()
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            let path = self.log_path(self.rotation.generation())?;
            let file = File::options().create(true).append(true).open(path)?;
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    /// Deletes an evicted generation; failures are ignored.
    fn evict(&self, generation: u64) {
        let Ok(init) = self.init_args() else {
            return;
        };
        let stem = Self::stem(init, generation);
        if let Err(err) = remove_file_if_exists(&init.session_folder.join(format!("{stem}.log"))) {
            log::debug!(target: "sessionlog::sink", "generation {generation} of '{}' kept: {err}", init.logger);
        }
        if !init.rotation.keep_resources
            && let Err(err) = remove_resources(&init.resource_folder, &stem)
        {
            log::debug!(target: "sessionlog::sink", "resources of '{stem}' kept: {err}");
        }
    }

    fn write_resource(&self, resource: &Resource<'_>, file_name: &str) -> io::Result<()> {
        let init = self.init_args()?;
        fs::write(init.resource_folder.join(file_name), resource.bytes())
    }
}

impl Sink for FileSink {
    fn init(&mut self, init: SinkInit) -> io::Result<()> {
        self.close()?;
        self.rotation = Rotation::new(init.rotation);
        self.init = Some(init);
        Ok(())
    }

    fn write(&mut self, event: &LogEvent) -> io::Result<()> {
        let init = self.init_args()?;
        let resource = render_resource(&init.config, event);
        let resource_name = resource.as_ref().map(|resource| {
            format!(
                "{}_{}.{}.{}",
                event.id,
                Self::stem(init, self.rotation.generation()),
                event.kind().name(),
                resource.extension()
            )
        });
        let line = serialize_line(event, resource_name.as_deref());
        self.writer()?.write_all(line.as_bytes())?;
        let stored = match (&resource, &resource_name) {
            (Some(resource), Some(name)) => self.write_resource(resource, name),
            _ => Ok(()),
        };

        if let RotationStep::Rotate { evict, .. } = self.rotation.record_write() {
            let closed = self.close();
            if let Some(generation) = evict {
                self.evict(generation);
            }
            closed?;
        }
        stored
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}
