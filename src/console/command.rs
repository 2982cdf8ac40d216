//! Command table and dispatch
//!
//! Commands are registered at setup time and resolved per line: full name
//! first (case-insensitive), then single-character alias (exact case).
//! Handlers write into a caller-supplied sink and never touch I/O directly.

use core::fmt::Write;

use heapless::Vec;

use super::parser::ParsedLine;
use super::ConsoleError;

/// Default command table capacity.
pub const MAX_COMMANDS: usize = 16;

/// Handler signature.
///
/// Receives the application context, the command table (so `help` can
/// enumerate its peers), the parsed line, and the response sink.
pub type Handler<Ctx> =
    fn(&mut Ctx, &CommandSet<Ctx>, &ParsedLine<'_>, &mut dyn Write) -> Result<(), ConsoleError>;

/// Command descriptor
pub struct CommandDescriptor<Ctx> {
    pub name: &'static str,
    /// Single-character shortcut; `None` for name-only commands.
    pub alias: Option<char>,
    pub help: &'static str,
    pub usage: &'static str,
    /// Dispatch is refused below this argument count.
    pub min_args: usize,
    pub handler: Handler<Ctx>,
}

/// Registered command table.
///
/// Owned by the console; populated once during application wiring and
/// read-mostly thereafter.
pub struct CommandSet<Ctx> {
    commands: Vec<CommandDescriptor<Ctx>, MAX_COMMANDS>,
}

impl<Ctx> CommandSet<Ctx> {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self { commands: Vec::new() }
    }

    /// Register a command.
    ///
    /// Rejects duplicate names and duplicate non-`None` aliases with no
    /// change to the table.
    pub fn define(&mut self, desc: CommandDescriptor<Ctx>) -> Result<(), ConsoleError> {
        let clash = self.commands.iter().any(|c| {
            c.name.eq_ignore_ascii_case(desc.name)
                || (c.alias.is_some() && c.alias == desc.alias)
        });
        if clash {
            return Err(ConsoleError::DuplicateCommand);
        }
        self.commands
            .push(desc)
            .map_err(|_| ConsoleError::TableFull)
    }

    /// Resolve a token to a descriptor.
    ///
    /// Full name match is case-insensitive. A single-character token that
    /// matches no name falls back to alias lookup (exact case).
    pub fn resolve(&self, token: &str) -> Option<&CommandDescriptor<Ctx>> {
        if let Some(desc) = self
            .commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(token))
        {
            return Some(desc);
        }

        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(alias), None) => self.commands.iter().find(|c| c.alias == Some(alias)),
            _ => None,
        }
    }

    /// Resolve and dispatch a parsed line.
    ///
    /// Refuses dispatch when the argument count is below the descriptor's
    /// minimum; the handler is not invoked in that case.
    pub fn run(
        &self,
        ctx: &mut Ctx,
        line: &ParsedLine<'_>,
        out: &mut dyn Write,
    ) -> Result<(), ConsoleError> {
        let desc = self.resolve(line.command).ok_or(ConsoleError::UnknownCommand)?;
        if line.argc() < desc.min_args {
            return Err(ConsoleError::MissingArg);
        }
        (desc.handler)(ctx, self, line, out)
    }

    /// Iterate registered descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor<Ctx>> {
        self.commands.iter()
    }

    /// Command names, for tab completion.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + Clone + '_ {
        self.commands.iter().map(|c| c.name)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Write the one-line help entry for a single descriptor.
    pub fn write_usage(desc: &CommandDescriptor<Ctx>, out: &mut dyn Write) {
        let _ = writeln!(out, "{}: {}", desc.name, desc.help);
        if !desc.usage.is_empty() {
            let _ = writeln!(out, "  Usage: {}", desc.usage);
        }
    }

    /// Write the full help listing.
    pub fn write_listing(&self, out: &mut dyn Write) {
        for c in self.commands.iter() {
            match c.alias {
                Some(a) => {
                    let _ = writeln!(out, "  {:<10} ({})  {}", c.name, a, c.help);
                }
                None => {
                    let _ = writeln!(out, "  {:<10}      {}", c.name, c.help);
                }
            }
        }
    }
}

impl<Ctx> Default for CommandSet<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::parser::parse_line;

    struct TestCtx {
        hits: u32,
    }

    fn cmd_hit(
        ctx: &mut TestCtx,
        _set: &CommandSet<TestCtx>,
        _line: &ParsedLine<'_>,
        _out: &mut dyn Write,
    ) -> Result<(), ConsoleError> {
        ctx.hits += 1;
        Ok(())
    }

    fn table() -> CommandSet<TestCtx> {
        let mut set = CommandSet::new();
        set.define(CommandDescriptor {
            name: "help",
            alias: Some('?'),
            help: "Prints help to console.",
            usage: "[command]",
            min_args: 0,
            handler: cmd_hit,
        })
        .unwrap();
        set.define(CommandDescriptor {
            name: "i2c",
            alias: Some('I'),
            help: "I2C tools",
            usage: "i2c <bus> <action> [addr]",
            min_args: 1,
            handler: cmd_hit,
        })
        .unwrap();
        set
    }

    #[test]
    fn test_resolve_by_name_case_insensitive() {
        let set = table();
        assert!(set.resolve("help").is_some());
        assert!(set.resolve("HELP").is_some());
        assert!(set.resolve("nope").is_none());
    }

    #[test]
    fn test_resolve_by_alias_exact_case() {
        let set = table();
        assert_eq!(set.resolve("?").unwrap().name, "help");
        assert_eq!(set.resolve("I").unwrap().name, "i2c");
        assert!(set.resolve("i").is_none());
    }

    #[test]
    fn test_min_args_refusal() {
        let set = table();
        let mut ctx = TestCtx { hits: 0 };
        let mut out = heapless::String::<64>::new();
        let err = set.run(&mut ctx, &parse_line("i2c"), &mut out);
        assert_eq!(err, Err(ConsoleError::MissingArg));
        assert_eq!(ctx.hits, 0, "handler must not run");
        assert!(set.run(&mut ctx, &parse_line("i2c 0"), &mut out).is_ok());
        assert_eq!(ctx.hits, 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut set = table();
        let err = set.define(CommandDescriptor {
            name: "HELP",
            alias: None,
            help: "",
            usage: "",
            min_args: 0,
            handler: cmd_hit,
        });
        assert_eq!(err, Err(ConsoleError::DuplicateCommand));
        assert_eq!(set.len(), 2);

        let err = set.define(CommandDescriptor {
            name: "other",
            alias: Some('?'),
            help: "",
            usage: "",
            min_args: 0,
            handler: cmd_hit,
        });
        assert_eq!(err, Err(ConsoleError::DuplicateCommand));
    }

    #[test]
    fn test_none_alias_never_matches() {
        let mut set: CommandSet<TestCtx> = CommandSet::new();
        set.define(CommandDescriptor {
            name: "console",
            alias: None,
            help: "Console conf.",
            usage: "",
            min_args: 0,
            handler: cmd_hit,
        })
        .unwrap();
        assert!(set.resolve("c").is_none());
        assert!(set.resolve("console").is_some());
    }
}
