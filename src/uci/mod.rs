//! The UCI protocol codec: one inbound line to one [`UciMessage`], one
//! outbound command struct to one wire string. Pure functions, no I/O.

pub mod commands;
pub mod parser;

pub use commands::{go_command, position_command, set_option_command};
pub use parser::{parse_line, UciMessage};
