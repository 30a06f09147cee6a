use std::{
    fmt,
    ops::{BitAnd, BitOr, BitOrAssign},
    str::FromStr,
};

/// Severity of a log event. Each level occupies one bit so that levels can be
/// combined into [`LevelFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum LogLevel {
    Debug = 0x0001,
    Info = 0x0002,
    Warning = 0x0004,
    Error = 0x0008,
    Fatal = 0x0010,
}

impl LogLevel {
    pub const fn bits(self) -> u16 {
        self as u16
    }

    /// Fixed-width tag used in serialized lines.
    pub const fn tag(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNG",
            LogLevel::Info => "INFOR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "Debug",
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Fatal => "Fatal",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

/// Bitmask of enabled levels.
///
/// [`LevelFlags::GLOBAL`] is a marker bit: a local mask carrying it inherits
/// the global levels of the session configuration on top of its own bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LevelFlags(u16);

impl LevelFlags {
    pub const NONE: LevelFlags = LevelFlags(0);
    pub const DEBUG: LevelFlags = LevelFlags(LogLevel::Debug.bits());
    pub const INFO: LevelFlags = LevelFlags(LogLevel::Info.bits());
    pub const WARNING: LevelFlags = LevelFlags(LogLevel::Warning.bits());
    pub const ERROR: LevelFlags = LevelFlags(LogLevel::Error.bits());
    pub const FATAL: LevelFlags = LevelFlags(LogLevel::Fatal.bits());
    pub const ALL: LevelFlags = LevelFlags(0x001F);
    pub const GLOBAL: LevelFlags = LevelFlags(0x8000);

    pub const fn from_bits(bits: u16) -> Self {
        LevelFlags(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: LevelFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Levels at or above `level`.
    pub const fn at_least(level: LogLevel) -> Self {
        LevelFlags(Self::ALL.0 & !(level.bits() - 1))
    }

    /// Levels actually enabled once the global marker is resolved against `global`.
    pub const fn resolve(self, global: LevelFlags) -> LevelFlags {
        if self.0 & Self::GLOBAL.0 != 0 {
            LevelFlags((self.0 | global.0) & Self::ALL.0)
        } else {
            LevelFlags(self.0 & Self::ALL.0)
        }
    }

    /// A level is enabled when its bit overlaps the mask.
    pub const fn allows(self, level: LogLevel) -> bool {
        self.0 & level.bits() != 0
    }

    /// Most verbose enabled level, if any.
    pub fn most_verbose(self) -> Option<LogLevel> {
        [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Fatal,
        ]
        .into_iter()
        .find(|level| self.allows(*level))
    }
}

impl From<LogLevel> for LevelFlags {
    fn from(level: LogLevel) -> Self {
        LevelFlags(level.bits())
    }
}

impl BitOr for LevelFlags {
    type Output = LevelFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        LevelFlags(self.0 | rhs.0)
    }
}

impl BitOr<LogLevel> for LevelFlags {
    type Output = LevelFlags;
    fn bitor(self, rhs: LogLevel) -> Self::Output {
        LevelFlags(self.0 | rhs.bits())
    }
}

impl BitOrAssign for LevelFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for LevelFlags {
    type Output = LevelFlags;
    fn bitand(self, rhs: Self) -> Self::Output {
        LevelFlags(self.0 & rhs.0)
    }
}

/// Per-entry override of the global trace flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalTrace {
    #[default]
    Global,
    Off,
    On,
}

impl LocalTrace {
    pub const fn resolve(self, global_trace: bool) -> bool {
        match self {
            LocalTrace::Global => global_trace,
            LocalTrace::Off => false,
            LocalTrace::On => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_marker_superimposes_global_levels() {
        let local = LevelFlags::GLOBAL | LogLevel::Debug;
        let resolved = local.resolve(LevelFlags::ERROR | LevelFlags::FATAL);
        assert!(resolved.allows(LogLevel::Debug));
        assert!(resolved.allows(LogLevel::Error));
        assert!(!resolved.allows(LogLevel::Info));
    }

    #[test]
    fn test_local_mask_without_marker_ignores_global() {
        let resolved = LevelFlags::WARNING.resolve(LevelFlags::ALL);
        assert!(resolved.allows(LogLevel::Warning));
        assert!(!resolved.allows(LogLevel::Error));
    }

    #[test]
    fn test_overlap_means_enabled() {
        // A zero intersection is disabled; both the query and the gate use this polarity.
        assert!(!LevelFlags::NONE.allows(LogLevel::Fatal));
        assert!(LevelFlags::ALL.allows(LogLevel::Fatal));
    }

    #[test]
    fn test_at_least() {
        let flags = LevelFlags::at_least(LogLevel::Warning);
        assert_eq!(flags, LevelFlags::WARNING | LevelFlags::ERROR | LevelFlags::FATAL);
        assert_eq!(flags.most_verbose(), Some(LogLevel::Warning));
        assert_eq!(LevelFlags::at_least(LogLevel::Debug), LevelFlags::ALL);
    }

    #[test]
    fn test_from_log_level() {
        assert_eq!(LogLevel::from(log::Level::Warn), LogLevel::Warning);
        assert_eq!(LogLevel::from(log::Level::Trace), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warning));
    }
}
