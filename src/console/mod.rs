//! Serial console: line editing, command table, dispatch
//!
//! Lazy polling from the service loop - no dedicated task.
//! Zero heap allocation - bounded buffers throughout.

pub mod command;
pub mod completion;
pub mod console;
pub mod error;
pub mod history;
pub mod line_buffer;
pub mod parser;

pub use command::{CommandDescriptor, CommandSet, Handler, MAX_COMMANDS};
pub use completion::Completer;
pub use console::{Console, ConsoleOptions, LineTerm, Transport, TransportWriter, PROMPT, VERSION};
pub use error::ConsoleError;
pub use history::History;
pub use line_buffer::LineBuffer;
pub use parser::{parse_line, ParsedLine, MAX_ARGS};
