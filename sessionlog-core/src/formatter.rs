//! Formatter plugins render object and exception payloads into text plus a
//! file extension. Failures never propagate: they become descriptive text.

use std::{
    any::Any,
    fmt,
    fmt::Write as _,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    error::{BoxError, Error, Result},
    event::{LogError, LogObject},
    level::LogLevel,
    params::Parameters,
};

pub const FORMATTER_TEXT: &str = "txt";
pub const FORMATTER_DEBUG: &str = "dbg";
pub const DEFAULT_EXTENSION: &str = "txt";

/// Result of rendering a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatted {
    pub text: String,
    pub extension: String,
    /// The text describes a formatting failure rather than the payload.
    pub failed: bool,
}

impl Formatted {
    pub fn new(text: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extension: extension.into(),
            failed: false,
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            text: description.into(),
            extension: DEFAULT_EXTENSION.into(),
            failed: true,
        }
    }

    fn from_error(context: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        Self::failure(format!("{context}\n{}", describe_error(err)))
    }
}

/// Renders one family of payloads (`T` is `LogObject` or `LogError`).
pub trait Formatter<T: ?Sized>: Send + Sync {
    fn init(&mut self, _parameters: &Parameters) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    fn format(&self, level: LogLevel, value: &T) -> std::result::Result<Formatted, BoxError>;
}

pub type FormatterFactory<T> = Arc<dyn Fn() -> Box<dyn Formatter<T>> + Send + Sync>;

struct FormatterType<T: ?Sized> {
    name: String,
    parameters: Parameters,
    factory: FormatterFactory<T>,
}

impl<T: ?Sized> Clone for FormatterType<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            parameters: self.parameters.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

/// Named formatters for one payload family, one of which is the default.
pub struct FormatterProvider<T: ?Sized> {
    types: Vec<FormatterType<T>>,
    default: Option<String>,
}

impl<T: ?Sized> Default for FormatterProvider<T> {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            default: None,
        }
    }
}

impl<T: ?Sized> Clone for FormatterProvider<T> {
    fn clone(&self) -> Self {
        Self {
            types: self.types.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for FormatterProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterProvider")
            .field(
                "formatters",
                &self
                    .types
                    .iter()
                    .map(|t| format!("{}({})", t.name, t.parameters))
                    .collect::<Vec<_>>(),
            )
            .field("default", &self.default)
            .finish()
    }
}

impl<T: ?Sized> FormatterProvider<T> {
    /// Registers (or replaces) a formatter under `name`.
    pub fn register<F>(&mut self, name: &str, parameters: &str, is_default: bool, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Formatter<T>> + Send + Sync + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidPluginName {
                kind: "formatter",
                name: name.into(),
            });
        }
        let formatter = FormatterType {
            name: name.to_string(),
            parameters: Parameters::parse(parameters)?,
            factory: Arc::new(factory),
        };
        match self.position(name) {
            Some(i) => self.types[i] = formatter,
            None => self.types.push(formatter),
        }
        if is_default {
            self.default = Some(name.to_string());
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name.as_str())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.types
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Renders `value` with the named formatter (or the default one).
    /// Lookup, init and format failures, including panics, come back as text.
    pub fn format(&self, level: LogLevel, value: &T, name: Option<&str>) -> Formatted {
        let lookup = name.or(self.default.as_deref());
        let Some(formatter_type) = lookup.and_then(|n| self.position(n)).map(|i| &self.types[i]) else {
            return Formatted::failure(format!(
                "Log formatting failed; formatter '{}' could not be found",
                lookup.unwrap_or("<default>")
            ));
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut formatter = (formatter_type.factory)();
            formatter.init(&formatter_type.parameters)?;
            formatter.format(level, value)
        }));
        match outcome {
            Ok(Ok(formatted)) => formatted,
            Ok(Err(err)) => Formatted::from_error(
                &format!(
                    "Log formatting failed; formatter '{}' returned an error",
                    formatter_type.name
                ),
                err.as_ref(),
            ),
            Err(panic) => Formatted::failure(format!(
                "Log formatting failed; formatter '{}' panicked: {}",
                formatter_type.name,
                panic_message(panic.as_ref())
            )),
        }
    }

    fn with_builtin<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Formatter<T>> + Send + Sync + 'static,
    {
        self.types.push(FormatterType {
            name: name.to_string(),
            parameters: Parameters::default(),
            factory: Arc::new(factory),
        });
        if self.default.is_none() {
            self.default = Some(name.to_string());
        }
        self
    }
}

impl FormatterProvider<LogObject> {
    /// Object formatters: `txt` (pretty `Debug`, default) and `dbg` (compact `Debug`).
    pub fn objects() -> Self {
        Self::default()
            .with_builtin(FORMATTER_TEXT, || Box::new(DebugFormatter::pretty()))
            .with_builtin(FORMATTER_DEBUG, || Box::new(DebugFormatter::compact()))
    }
}

impl FormatterProvider<LogError> {
    /// Exception formatters: `txt` (message and source chain, default).
    pub fn exceptions() -> Self {
        Self::default().with_builtin(FORMATTER_TEXT, || Box::new(ErrorTextFormatter::default()))
    }
}

/// Renders objects through `Debug`.
pub struct DebugFormatter {
    pretty: bool,
    extension: String,
}

impl DebugFormatter {
    pub fn pretty() -> Self {
        Self {
            pretty: true,
            extension: DEFAULT_EXTENSION.into(),
        }
    }

    pub fn compact() -> Self {
        Self {
            pretty: false,
            extension: DEFAULT_EXTENSION.into(),
        }
    }
}

impl Formatter<LogObject> for DebugFormatter {
    fn init(&mut self, parameters: &Parameters) -> std::result::Result<(), BoxError> {
        self.extension = parameters.get_str("extension", DEFAULT_EXTENSION).to_string();
        Ok(())
    }

    fn format(&self, _level: LogLevel, value: &LogObject) -> std::result::Result<Formatted, BoxError> {
        let text = if self.pretty {
            format!("{value:#?}")
        } else {
            format!("{value:?}")
        };
        Ok(Formatted::new(text, self.extension.clone()))
    }
}

/// Renders an error, its `source()` chain and its `Debug` form.
#[derive(Default)]
pub struct ErrorTextFormatter {
    extension: Option<String>,
}

impl Formatter<LogError> for ErrorTextFormatter {
    fn init(&mut self, parameters: &Parameters) -> std::result::Result<(), BoxError> {
        self.extension = parameters.get("extension").map(String::from);
        Ok(())
    }

    fn format(&self, _level: LogLevel, value: &LogError) -> std::result::Result<Formatted, BoxError> {
        let mut text = describe_error(value);
        let _ = write!(text, "\nDebug: {value:?}");
        Ok(Formatted::new(
            text,
            self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION),
        ))
    }
}

/// Message of `err` followed by one line per error in its source chain.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = format!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(text, "\nCaused by: {cause}");
        source = cause.source();
    }
    text
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "outer failure")
        }
    }

    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    struct Failing;
    impl Formatter<LogObject> for Failing {
        fn format(&self, _: LogLevel, _: &LogObject) -> std::result::Result<Formatted, BoxError> {
            Err("renderer exploded".into())
        }
    }

    struct Panicking;
    impl Formatter<LogObject> for Panicking {
        fn format(&self, _: LogLevel, _: &LogObject) -> std::result::Result<Formatted, BoxError> {
            panic!("renderer panicked")
        }
    }

    #[test]
    fn test_default_object_formatter_is_pretty_debug() {
        let provider = FormatterProvider::objects();
        let formatted = provider.format(LogLevel::Info, &Point { x: 1, y: 2 }, None);
        assert!(!formatted.failed);
        assert_eq!(formatted.extension, "txt");
        assert!(formatted.text.contains("x: 1,\n"));
        let compact = provider.format(LogLevel::Info, &Point { x: 1, y: 2 }, Some("DBG"));
        assert_eq!(compact.text, "Point { x: 1, y: 2 }");
    }

    #[test]
    fn test_exception_formatter_walks_sources() {
        let provider = FormatterProvider::exceptions();
        let err = Outer(std::io::Error::other("disk gone"));
        let formatted = provider.format(LogLevel::Error, &err, None);
        assert!(formatted.text.starts_with("Error: outer failure"));
        assert!(formatted.text.contains("Caused by: disk gone"));
    }

    #[test]
    fn test_failures_become_text() {
        let mut provider = FormatterProvider::objects();
        provider.register("boom", "", false, || Box::new(Failing)).unwrap();
        provider.register("panic", "", false, || Box::new(Panicking)).unwrap();

        let failed = provider.format(LogLevel::Info, &1, Some("boom"));
        assert!(failed.failed);
        assert!(failed.text.contains("renderer exploded"));

        let panicked = provider.format(LogLevel::Info, &1, Some("panic"));
        assert!(panicked.failed);
        assert!(panicked.text.contains("renderer panicked"));

        let missing = provider.format(LogLevel::Info, &1, Some("xml"));
        assert!(missing.failed);
        assert!(missing.text.contains("'xml' could not be found"));
    }

    #[test]
    fn test_extension_parameter_and_replacement() {
        let mut provider = FormatterProvider::objects();
        provider
            .register("txt", "extension=log", true, || Box::new(DebugFormatter::pretty()))
            .unwrap();
        assert_eq!(provider.names().count(), 2);
        assert_eq!(provider.format(LogLevel::Info, &"v", None).extension, "log");
        assert!(provider.register(" ", "", false, || Box::new(DebugFormatter::pretty())).is_err());
    }
}
