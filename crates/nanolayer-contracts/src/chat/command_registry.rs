#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: CommandKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandKind {
    Split,
    Layers,
    Help,
}

pub(crate) const OPTIONAL_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "split",
    action: CommandKind::Split,
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "layers",
        action: CommandKind::Layers,
    },
    CommandSpec {
        command: "help",
        action: CommandKind::Help,
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &["/split [asset-id]", "/layers", "/help"];
