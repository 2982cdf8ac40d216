//! Console error types

/// Console error with code and message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleError {
    /// E01: Unknown command
    UnknownCommand,
    /// E02: Invalid value format
    InvalidValue,
    /// E03: Missing required argument
    MissingArg,
    /// E04: Value out of allowed range
    OutOfRange,
    /// E05: Command name or alias already registered
    DuplicateCommand,
    /// E06: Command table is full
    TableFull,
    /// E07: Device does not implement the requested action
    Unsupported,
    /// E08: Bus transaction failed
    BusError,
}

impl ConsoleError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCommand => "E01",
            Self::InvalidValue => "E02",
            Self::MissingArg => "E03",
            Self::OutOfRange => "E04",
            Self::DuplicateCommand => "E05",
            Self::TableFull => "E06",
            Self::Unsupported => "E07",
            Self::BusError => "E08",
        }
    }

    /// Get error message
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnknownCommand => "unknown command",
            Self::InvalidValue => "invalid value",
            Self::MissingArg => "missing argument",
            Self::OutOfRange => "out of range",
            Self::DuplicateCommand => "duplicate command",
            Self::TableFull => "command table full",
            Self::Unsupported => "unsupported action",
            Self::BusError => "bus error",
        }
    }
}

impl core::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}
