use super::command_registry::{CommandKind, CommandSpec, NO_ARG_COMMANDS, OPTIONAL_ARG_COMMANDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    Noop,
    Generate { prompt: String },
    /// `target` is an id or id prefix; `None` means the most recent original.
    Split { target: Option<String> },
    Layers,
    Help,
    Unknown { command: String, arg: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub action: IntentAction,
    pub raw: String,
}

impl Intent {
    fn new(action: IntentAction, raw: &str) -> Self {
        Self {
            action,
            raw: raw.to_string(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<CommandKind> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn kind_to_action(kind: CommandKind, arg: &str) -> IntentAction {
    match kind {
        CommandKind::Split => IntentAction::Split {
            target: parse_args(arg).into_iter().next(),
        },
        CommandKind::Layers => IntentAction::Layers,
        CommandKind::Help => IntentAction::Help,
    }
}

/// Turns one line of chat input into an action. Anything that is not a
/// known slash command is treated as a generation prompt, kept exactly as
/// typed; trimming only decides whether the line is blank.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new(IntentAction::Noop, text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(kind) = find_action(&command, OPTIONAL_ARG_COMMANDS) {
                return Intent::new(kind_to_action(kind, arg), text);
            }
            if let Some(kind) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(kind_to_action(kind, ""), text);
            }
            return Intent::new(
                IntentAction::Unknown {
                    command,
                    arg: arg.to_string(),
                },
                text,
            );
        }
    }

    Intent::new(
        IntentAction::Generate {
            prompt: text.to_string(),
        },
        text,
    )
}

#[cfg(test)]
mod tests {
    use super::{parse_intent, IntentAction};

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, IntentAction::Noop);
        assert_eq!(parse_intent("").action, IntentAction::Noop);
    }

    #[test]
    fn plain_text_is_a_prompt() {
        let intent = parse_intent("  red sports car on a beach ");
        assert_eq!(
            intent.action,
            IntentAction::Generate {
                prompt: "  red sports car on a beach ".to_string()
            }
        );
        assert_eq!(intent.raw, "  red sports car on a beach ");
    }

    #[test]
    fn split_with_and_without_target() {
        assert_eq!(
            parse_intent("/split 3f2a").action,
            IntentAction::Split {
                target: Some("3f2a".to_string())
            }
        );
        assert_eq!(
            parse_intent("/SPLIT \"3f2a\" extra").action,
            IntentAction::Split {
                target: Some("3f2a".to_string())
            }
        );
        assert_eq!(
            parse_intent("/split").action,
            IntentAction::Split { target: None }
        );
    }

    #[test]
    fn no_arg_commands_ignore_trailing_text() {
        assert_eq!(parse_intent("/layers now").action, IntentAction::Layers);
        assert_eq!(parse_intent("/help").action, IntentAction::Help);
    }

    #[test]
    fn unknown_command_keeps_name_and_arg() {
        assert_eq!(
            parse_intent("/blend a.png b.png").action,
            IntentAction::Unknown {
                command: "blend".to_string(),
                arg: "a.png b.png".to_string()
            }
        );
    }

    #[test]
    fn bare_slash_is_a_prompt() {
        assert_eq!(
            parse_intent("/ 50% off").action,
            IntentAction::Generate {
                prompt: "/ 50% off".to_string()
            }
        );
    }
}
