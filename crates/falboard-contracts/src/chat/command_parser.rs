use crate::models::parse_bool;

use super::command_registry::find_command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormCommand {
    Noop,
    Help,
    Models,
    SelectModel(String),
    Show,
    Set { field: String, value: String },
    RandomizeSeed,
    Stream(Option<bool>),
    Submit,
    Status,
    Wait,
    Quit,
    /// Bare text: set the prompt and submit.
    Prompt(String),
    Invalid(String),
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

pub fn parse_command(text: &str) -> FormCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return FormCommand::Noop;
    }
    let Some(tail) = trimmed.strip_prefix('/') else {
        return FormCommand::Prompt(trimmed.to_string());
    };

    let (command, remainder) = match tail.split_once(char::is_whitespace) {
        Some((command, remainder)) => (command.to_ascii_lowercase(), remainder.trim()),
        None => (tail.to_ascii_lowercase(), ""),
    };
    let Some(spec) = find_command(&command) else {
        return FormCommand::Invalid(format!("Unknown command /{command}. Try /help."));
    };

    match spec.command {
        "models" => FormCommand::Models,
        "show" => FormCommand::Show,
        "seed" => FormCommand::RandomizeSeed,
        "submit" => FormCommand::Submit,
        "status" => FormCommand::Status,
        "wait" => FormCommand::Wait,
        "help" => FormCommand::Help,
        "quit" => FormCommand::Quit,
        "model" => {
            let args = split_args(remainder);
            match args.first() {
                Some(model) if args.len() == 1 => FormCommand::SelectModel(model.clone()),
                _ => FormCommand::Invalid(format!("usage: {}", spec.usage)),
            }
        }
        "set" => {
            let mut args = split_args(remainder).into_iter();
            match args.next() {
                Some(field) => FormCommand::Set {
                    field,
                    value: args.collect::<Vec<String>>().join(" "),
                },
                None => FormCommand::Invalid(format!("usage: {}", spec.usage)),
            }
        }
        "stream" => {
            if remainder.is_empty() {
                return FormCommand::Stream(None);
            }
            match parse_bool(remainder) {
                Some(flag) => FormCommand::Stream(Some(flag)),
                None => FormCommand::Invalid(format!("usage: {}", spec.usage)),
            }
        }
        _ => FormCommand::Invalid(format!("usage: {}", spec.usage)),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, FormCommand};

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_command("   "), FormCommand::Noop);
    }

    #[test]
    fn bare_text_becomes_prompt() {
        assert_eq!(
            parse_command("  a fox in the snow "),
            FormCommand::Prompt("a fox in the snow".to_string())
        );
    }

    #[test]
    fn set_keeps_quoted_values_together() {
        assert_eq!(
            parse_command("/set prompt \"a serene lake, digital art\""),
            FormCommand::Set {
                field: "prompt".to_string(),
                value: "a serene lake, digital art".to_string(),
            }
        );
        assert_eq!(
            parse_command("/SET num_images 3"),
            FormCommand::Set {
                field: "num_images".to_string(),
                value: "3".to_string(),
            }
        );
    }

    #[test]
    fn set_without_value_clears_field() {
        assert_eq!(
            parse_command("/set prompt"),
            FormCommand::Set {
                field: "prompt".to_string(),
                value: String::new(),
            }
        );
    }

    #[test]
    fn model_requires_exactly_one_id() {
        assert_eq!(
            parse_command("/model fal-ai/flux/schnell"),
            FormCommand::SelectModel("fal-ai/flux/schnell".to_string())
        );
        assert!(matches!(parse_command("/model"), FormCommand::Invalid(_)));
    }

    #[test]
    fn stream_toggles_or_sets() {
        assert_eq!(parse_command("/stream"), FormCommand::Stream(None));
        assert_eq!(parse_command("/stream on"), FormCommand::Stream(Some(true)));
        assert_eq!(parse_command("/stream off"), FormCommand::Stream(Some(false)));
        assert!(matches!(parse_command("/stream later"), FormCommand::Invalid(_)));
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            parse_command("/blend a b"),
            FormCommand::Invalid("Unknown command /blend. Try /help.".to_string())
        );
    }
}
