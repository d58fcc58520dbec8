mod command_parser;
mod command_registry;

pub use command_parser::{parse_command, FormCommand};
pub use command_registry::{find_command, help_lines, CommandSpec, FORM_COMMANDS};
