//! Console state machine integrating all components
//!
//! Input bytes arrive from a [`Transport`]; command handlers only ever see
//! a `core::fmt::Write` sink, so prompt emission, echo, and line
//! termination stay out of command logic.

use core::cell::Cell;
use core::fmt::Write;

use super::command::{CommandDescriptor, CommandSet};
use super::parser::parse_line;
use super::{Completer, ConsoleError, History, LineBuffer};

/// Version string (set by build.rs, includes git hash)
pub const VERSION: &str = env!("VERSION_STRING");

/// Default prompt.
pub const PROMPT: &str = "JuiceMonitor # ";

/// Output line terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineTerm {
    Lf,
    /// Best setting for "idf.py monitor"
    Crlf,
}

impl LineTerm {
    pub fn as_str(self) -> &'static str {
        match self {
            LineTerm::Lf => "\n",
            LineTerm::Crlf => "\r\n",
        }
    }
}

/// Runtime console configuration.
///
/// Cell-based so the `console` command can adjust it through the shared
/// reference the application context holds. All access happens inside one
/// cooperative cycle; there is nothing to lock.
pub struct ConsoleOptions {
    echo: Cell<bool>,
    emit_prompt: Cell<bool>,
    help_on_fail: Cell<bool>,
    tx_term: Cell<LineTerm>,
    prompt: Cell<&'static str>,
}

impl ConsoleOptions {
    pub const fn new() -> Self {
        Self {
            echo: Cell::new(true),
            emit_prompt: Cell::new(true),
            help_on_fail: Cell::new(true),
            tx_term: Cell::new(LineTerm::Crlf),
            prompt: Cell::new(PROMPT),
        }
    }

    pub fn local_echo(&self) -> bool {
        self.echo.get()
    }

    pub fn set_local_echo(&self, on: bool) {
        self.echo.set(on);
    }

    pub fn emit_prompt(&self) -> bool {
        self.emit_prompt.get()
    }

    pub fn set_emit_prompt(&self, on: bool) {
        self.emit_prompt.set(on);
    }

    pub fn help_on_fail(&self) -> bool {
        self.help_on_fail.get()
    }

    pub fn set_help_on_fail(&self, on: bool) {
        self.help_on_fail.set(on);
    }

    pub fn tx_term(&self) -> LineTerm {
        self.tx_term.get()
    }

    pub fn set_tx_term(&self, term: LineTerm) {
        self.tx_term.set(term);
    }

    pub fn prompt(&self) -> &'static str {
        self.prompt.get()
    }

    pub fn set_prompt(&self, prompt: &'static str) {
        self.prompt.set(prompt);
    }
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-oriented console transport.
///
/// `read_byte` must never block; `None` means no input pending. The byte
/// count moved through a transport during a cycle is the console's
/// activity signal.
pub trait Transport {
    fn read_byte(&mut self) -> Option<u8>;
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// `fmt::Write` adapter over a [`Transport`].
///
/// Translates `\n` to the configured terminator and counts bytes written.
pub struct TransportWriter<'t, T: Transport> {
    transport: &'t mut T,
    term: LineTerm,
    written: usize,
}

impl<'t, T: Transport> TransportWriter<'t, T> {
    pub fn new(transport: &'t mut T, term: LineTerm) -> Self {
        Self {
            transport,
            term,
            written: 0,
        }
    }

    /// Bytes pushed to the transport so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl<'t, T: Transport> Write for TransportWriter<'t, T> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let term = self.term.as_str().as_bytes();
        let mut rest = s.as_bytes();
        while let Some(nl) = rest.iter().position(|&b| b == b'\n') {
            self.transport.write_bytes(&rest[..nl]);
            self.transport.write_bytes(term);
            self.written += nl + term.len();
            rest = &rest[nl + 1..];
        }
        if !rest.is_empty() {
            self.transport.write_bytes(rest);
            self.written += rest.len();
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum EscapeState {
    Normal,
    Escape,  // Got ESC
    Bracket, // Got ESC [
}

/// Console state machine.
///
/// Owns the command table, line editing state, and history; borrows the
/// options it shares with the application context.
pub struct Console<'o, Ctx> {
    commands: CommandSet<Ctx>,
    line: LineBuffer,
    history: History,
    completer: Completer,
    opts: &'o ConsoleOptions,
    escape_state: EscapeState,
    /// Previous input byte, for CRLF tolerance
    last_byte: u8,
}

impl<'o, Ctx> Console<'o, Ctx> {
    /// Create a console with an empty command table.
    pub fn new(opts: &'o ConsoleOptions) -> Self {
        Self {
            commands: CommandSet::new(),
            line: LineBuffer::new(),
            history: History::new(),
            completer: Completer::new(),
            opts,
            escape_state: EscapeState::Normal,
            last_byte: 0,
        }
    }

    /// Register a command (the `defineCommand` surface).
    pub fn define(&mut self, desc: CommandDescriptor<Ctx>) -> Result<(), ConsoleError> {
        self.commands.define(desc)
    }

    /// Access the command table.
    pub fn commands(&self) -> &CommandSet<Ctx> {
        &self.commands
    }

    /// Drain all pending transport input through the console.
    ///
    /// Returns the number of bytes moved (consumed plus produced), the
    /// cycle-activity indicator.
    pub fn service<T: Transport>(&mut self, ctx: &mut Ctx, transport: &mut T) -> usize {
        let mut moved = 0;
        while let Some(byte) = transport.read_byte() {
            moved += 1;
            let mut w = TransportWriter::new(transport, self.opts.tx_term());
            let _ = self.process_byte(ctx, byte, &mut w);
            moved += w.written();
        }
        moved
    }

    /// Process a single input byte.
    ///
    /// Returns Some(result) if a command line completed, None if more
    /// input is needed.
    pub fn process_byte(
        &mut self,
        ctx: &mut Ctx,
        byte: u8,
        out: &mut dyn Write,
    ) -> Option<Result<(), ConsoleError>> {
        let prev = self.last_byte;
        self.last_byte = byte;

        match self.escape_state {
            EscapeState::Normal => self.process_normal(ctx, byte, prev, out),
            EscapeState::Escape => {
                if byte == b'[' {
                    self.escape_state = EscapeState::Bracket;
                } else {
                    self.escape_state = EscapeState::Normal;
                }
                None
            }
            EscapeState::Bracket => {
                self.escape_state = EscapeState::Normal;
                match byte {
                    b'A' => self.handle_up(out),   // Up arrow
                    b'B' => self.handle_down(out), // Down arrow
                    _ => {}
                }
                None
            }
        }
    }

    fn process_normal(
        &mut self,
        ctx: &mut Ctx,
        byte: u8,
        prev: u8,
        out: &mut dyn Write,
    ) -> Option<Result<(), ConsoleError>> {
        match byte {
            // LF immediately after CR is the tail of a CRLF terminator
            b'\n' if prev == b'\r' => None,

            // Enter
            b'\r' | b'\n' => {
                let _ = writeln!(out);
                if self.line.is_empty() {
                    self.print_prompt(out);
                    return None;
                }

                // The line buffer must be released before dispatch; handlers
                // may emit multi-line output while it is being rebuilt.
                let mut raw = [0u8; super::line_buffer::LINE_SIZE];
                let len = self.line.len();
                raw[..len].copy_from_slice(self.line.as_str().as_bytes());
                self.line.clear();

                let raw = core::str::from_utf8(&raw[..len]).unwrap_or("");
                self.history.push(raw);
                let result = self.process_line(ctx, raw, out);
                self.print_prompt(out);
                Some(result)
            }

            // Backspace
            0x7F | 0x08 => {
                if !self.line.is_empty() {
                    self.line.backspace();
                    if self.opts.local_echo() {
                        // Echo: backspace, space, backspace
                        let _ = write!(out, "\x08 \x08");
                    }
                }
                self.completer.reset();
                self.history.reset_nav();
                None
            }

            // Tab
            b'\t' => {
                self.handle_tab(out);
                None
            }

            // Escape
            0x1B => {
                self.escape_state = EscapeState::Escape;
                None
            }

            // Ctrl+C
            0x03 => {
                let _ = writeln!(out, "^C");
                self.line.clear();
                self.print_prompt(out);
                None
            }

            // Ctrl+U (clear line)
            0x15 => {
                if self.opts.local_echo() {
                    for _ in 0..self.line.len() {
                        let _ = write!(out, "\x08 \x08");
                    }
                }
                self.line.clear();
                None
            }

            // Printable character
            0x20..=0x7E => {
                self.line.push(byte);
                if self.opts.local_echo() {
                    let _ = write!(out, "{}", byte as char);
                }
                self.completer.reset();
                self.history.reset_nav();
                None
            }

            _ => None,
        }
    }

    /// Parse and dispatch one complete line.
    ///
    /// On failure the error line is written to `out`, followed (when
    /// help-on-fail is enabled) by the failing command's usage or, for an
    /// unknown command, the full help listing.
    pub fn process_line(
        &mut self,
        ctx: &mut Ctx,
        raw: &str,
        out: &mut dyn Write,
    ) -> Result<(), ConsoleError> {
        let line = parse_line(raw);
        if line.command.is_empty() {
            return Ok(());
        }

        let result = self.commands.run(ctx, &line, out);
        if let Err(e) = result {
            let _ = writeln!(out, "{}", e);
            if self.opts.help_on_fail() {
                match e {
                    ConsoleError::UnknownCommand => self.commands.write_listing(out),
                    _ => {
                        if let Some(desc) = self.commands.resolve(line.command) {
                            CommandSet::write_usage(desc, out);
                        }
                    }
                }
            }
        }
        result
    }

    fn handle_tab(&mut self, out: &mut dyn Write) {
        let input = self.line.as_str();

        // Only the command word completes; arguments are device-specific.
        let word_count = input.split_whitespace().count();
        if word_count > 1 || input.ends_with(' ') {
            return;
        }

        let completion = self.completer.complete(input, self.commands.names());
        let prefix_len = input.len();

        if let Some(completed) = completion {
            // Clear current word and replace with completion
            for _ in 0..prefix_len {
                self.line.backspace();
                let _ = write!(out, "\x08 \x08");
            }
            for c in completed.bytes() {
                self.line.push(c);
                let _ = write!(out, "{}", c as char);
            }
        }
    }

    fn handle_up(&mut self, out: &mut dyn Write) {
        if let Some(prev) = self.history.get_prev() {
            let visible = self.line.len();
            let mut buf = [0u8; super::line_buffer::LINE_SIZE];
            let len = prev.len().min(buf.len());
            buf[..len].copy_from_slice(&prev.as_bytes()[..len]);
            self.replace_line(&buf[..len], visible, out);
        }
    }

    fn handle_down(&mut self, out: &mut dyn Write) {
        let visible = self.line.len();
        let mut buf = [0u8; super::line_buffer::LINE_SIZE];
        let len = match self.history.get_next() {
            Some(next) => {
                let len = next.len().min(buf.len());
                buf[..len].copy_from_slice(&next.as_bytes()[..len]);
                len
            }
            // Past the newest entry: clear to empty live input
            None => 0,
        };
        self.replace_line(&buf[..len], visible, out);
    }

    fn replace_line(&mut self, new_line: &[u8], visible: usize, out: &mut dyn Write) {
        // Clear displayed line
        for _ in 0..visible {
            let _ = write!(out, "\x08 \x08");
        }

        let s = core::str::from_utf8(new_line).unwrap_or("");
        self.line.set(s);
        let _ = write!(out, "{}", s);
    }

    /// Print the prompt (when enabled).
    pub fn print_prompt(&self, out: &mut dyn Write) {
        if self.opts.emit_prompt() {
            let _ = write!(out, "{}", self.opts.prompt());
        }
    }

    /// Print welcome banner
    pub fn print_banner(&self, out: &mut dyn Write) {
        let _ = writeln!(out, "\n{}", VERSION);
        let _ = writeln!(out, "Type 'help' for commands.");
        self.print_prompt(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullCtx;

    fn feed(console: &mut Console<'_, NullCtx>, ctx: &mut NullCtx, bytes: &[u8]) -> String {
        let mut out = String::new();
        for &b in bytes {
            console.process_byte(ctx, b, &mut out);
        }
        out
    }

    fn echo_cmd(
        _ctx: &mut NullCtx,
        _set: &CommandSet<NullCtx>,
        line: &crate::console::ParsedLine<'_>,
        out: &mut dyn Write,
    ) -> Result<(), ConsoleError> {
        let _ = writeln!(out, "ran:{}", line.argc());
        Ok(())
    }

    fn console_with_ping(opts: &ConsoleOptions) -> Console<'_, NullCtx> {
        let mut c = Console::new(opts);
        c.define(CommandDescriptor {
            name: "ping",
            alias: Some('p'),
            help: "Test command",
            usage: "ping [n]",
            min_args: 0,
            handler: echo_cmd,
        })
        .unwrap();
        c
    }

    #[test]
    fn test_line_dispatch_on_enter() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"ping 1 2\n");
        assert!(out.contains("ran:2"));
        assert!(out.ends_with(PROMPT));
    }

    #[test]
    fn test_crlf_executes_once() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"ping\r\n");
        assert_eq!(out.matches("ran:0").count(), 1);
    }

    #[test]
    fn test_backspace_edits_line() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"pinx\x7fg\n");
        assert!(out.contains("ran:0"));
    }

    #[test]
    fn test_unknown_command_emits_listing() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"bogus\n");
        assert!(out.contains("E01"));
        assert!(out.contains("ping"), "help listing expected: {}", out);
    }

    #[test]
    fn test_help_on_fail_disable() {
        let opts = ConsoleOptions::new();
        opts.set_help_on_fail(false);
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"bogus\n");
        assert!(out.contains("E01"));
        assert!(!out.contains("Test command"));
    }

    #[test]
    fn test_echo_disabled() {
        let opts = ConsoleOptions::new();
        opts.set_local_echo(false);
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"ping");
        assert!(!out.contains("ping"));
    }

    #[test]
    fn test_history_recall_with_arrows() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        feed(&mut c, &mut ctx, b"ping 9\n");
        // Up arrow recalls, Enter re-runs
        let out = feed(&mut c, &mut ctx, b"\x1b[A\n");
        assert!(out.contains("ran:1"));
    }

    #[test]
    fn test_tab_completion_fills_command() {
        let opts = ConsoleOptions::new();
        let mut c = console_with_ping(&opts);
        let mut ctx = NullCtx;
        let out = feed(&mut c, &mut ctx, b"pi\t\n");
        assert!(out.contains("ran:0"));
    }

    #[test]
    fn test_transport_writer_translates_newlines() {
        struct Sink(Vec<u8>);
        impl Transport for Sink {
            fn read_byte(&mut self) -> Option<u8> {
                None
            }
            fn write_bytes(&mut self, bytes: &[u8]) {
                self.0.extend_from_slice(bytes);
            }
        }

        let mut sink = Sink(Vec::new());
        let mut w = TransportWriter::new(&mut sink, LineTerm::Crlf);
        let _ = writeln!(w, "a\nb");
        assert_eq!(sink.0, b"a\r\nb\r\n");

        let mut sink = Sink(Vec::new());
        let mut w = TransportWriter::new(&mut sink, LineTerm::Lf);
        let _ = writeln!(w, "a");
        assert_eq!(sink.0, b"a\n");
    }
}
