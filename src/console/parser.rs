//! Command line tokenizer
//!
//! Splits a line on whitespace. The first token is the command, the rest
//! are arguments. Sub-routers re-root the line with [`ParsedLine::sub_line`]
//! to hand the tail to a nested handler.

use super::ConsoleError;

/// Maximum number of arguments retained after the command token.
pub const MAX_ARGS: usize = 8;

/// A tokenized command line.
#[derive(Debug, Clone)]
pub struct ParsedLine<'a> {
    /// The command name (first token)
    pub command: &'a str,
    /// Up to [`MAX_ARGS`] arguments
    args: [Option<&'a str>; MAX_ARGS],
}

impl<'a> ParsedLine<'a> {
    /// Create empty line
    pub const fn empty() -> Self {
        Self {
            command: "",
            args: [None; MAX_ARGS],
        }
    }

    /// Get argument by index (0-based)
    pub fn arg(&self, idx: usize) -> Option<&'a str> {
        self.args.get(idx).copied().flatten()
    }

    /// Number of arguments present
    pub fn argc(&self) -> usize {
        self.args.iter().filter(|a| a.is_some()).count()
    }

    /// Parse argument `idx` as an integer.
    ///
    /// Missing argument maps to `MissingArg`, malformed to `InvalidValue`.
    pub fn arg_as_u32(&self, idx: usize) -> Result<u32, ConsoleError> {
        let raw = self.arg(idx).ok_or(ConsoleError::MissingArg)?;
        parse_u32(raw).ok_or(ConsoleError::InvalidValue)
    }

    /// Re-root the line for a sub-router.
    ///
    /// Skips the first `skip` arguments, promotes the next one to the
    /// command position, and keeps the remainder as arguments. With
    /// `skip = 0` this turns `mcp info` into a line whose command is
    /// `info`; with `skip = 1`, `i2c 0 scan` becomes a line whose command
    /// is `scan`. Running past the end yields an empty line.
    pub fn sub_line(&self, skip: usize) -> ParsedLine<'a> {
        let mut sub = ParsedLine::empty();
        sub.command = self.arg(skip).unwrap_or("");
        let mut out = 0;
        for idx in (skip + 1)..MAX_ARGS {
            if let Some(a) = self.arg(idx) {
                sub.args[out] = Some(a);
                out += 1;
            }
        }
        sub
    }
}

/// Parse a command line into command and arguments.
///
/// Tokens beyond [`MAX_ARGS`] arguments are dropped.
pub fn parse_line(line: &str) -> ParsedLine<'_> {
    let mut parts = line.split_whitespace();

    let command = parts.next().unwrap_or("");

    let mut args = [None; MAX_ARGS];
    for (i, arg) in parts.take(MAX_ARGS).enumerate() {
        args[i] = Some(arg);
    }

    ParsedLine { command, args }
}

/// Integer parse accepting decimal or `0x`-prefixed hex.
///
/// I2C addresses read better in hex; everything else is decimal.
pub fn parse_u32(raw: &str) -> Option<u32> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}
