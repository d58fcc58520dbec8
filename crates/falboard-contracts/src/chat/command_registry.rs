#[derive(Clone, Copy, Debug)]
pub struct CommandSpec {
    pub command: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
}

pub const FORM_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "models",
        usage: "/models",
        summary: "list registered models",
    },
    CommandSpec {
        command: "model",
        usage: "/model <id>",
        summary: "select a model and reset every field",
    },
    CommandSpec {
        command: "show",
        usage: "/show",
        summary: "render the form for the selected model",
    },
    CommandSpec {
        command: "set",
        usage: "/set <field> <value>",
        summary: "update one field",
    },
    CommandSpec {
        command: "seed",
        usage: "/seed",
        summary: "randomize the seed field",
    },
    CommandSpec {
        command: "stream",
        usage: "/stream [on|off]",
        summary: "set or toggle the streaming flag",
    },
    CommandSpec {
        command: "submit",
        usage: "/submit",
        summary: "send the current form",
    },
    CommandSpec {
        command: "status",
        usage: "/status",
        summary: "show the request state",
    },
    CommandSpec {
        command: "wait",
        usage: "/wait",
        summary: "block until the running request finishes",
    },
    CommandSpec {
        command: "help",
        usage: "/help",
        summary: "list commands",
    },
    CommandSpec {
        command: "quit",
        usage: "/quit",
        summary: "leave the form",
    },
];

pub fn find_command(command: &str) -> Option<&'static CommandSpec> {
    FORM_COMMANDS.iter().find(|spec| spec.command == command)
}

pub fn help_lines() -> Vec<String> {
    FORM_COMMANDS
        .iter()
        .map(|spec| format!("{:<22} {}", spec.usage, spec.summary))
        .collect()
}
