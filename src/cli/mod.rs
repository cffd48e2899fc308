mod commands;
mod input;

pub use commands::{Cli, Commands};
pub use input::TerminalInput;
