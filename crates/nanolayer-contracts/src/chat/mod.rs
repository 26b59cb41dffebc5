mod command_registry;
mod intent_parser;
mod messages;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use intent_parser::{parse_intent, Intent, IntentAction};
pub use messages::{ChatMessage, ConversationLog, MessageRole};
