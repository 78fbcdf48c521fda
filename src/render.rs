//! Plain-text formatting of the chat for the terminal shell.

use std::time::Duration;

use chrono::Local;

use crate::models::{Message, MessageRole};

const DIVIDER_WIDTH: usize = 60;

pub const BANNER: &str = r"
    ╔═══════════════════════════════════════════════════════════╗
    ║       CAG - Context Augmented Generation Assistant        ║
    ║              Ask anything about the menu                  ║
    ╚═══════════════════════════════════════════════════════════╝
";

pub const HELP: &str = "\
Available commands:
  <question>            Ask anything about the menu, wines, prices...
  help                  Show this help message
  history               Show the conversation so far
  clear                 Start a new conversation
  health                Check the CAG backend
  quit | exit | q       Leave the chat
Press Ctrl-C while waiting to cancel the current question.";

pub fn divider() -> String {
    "=".repeat(DIVIDER_WIDTH)
}

fn label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "You",
        MessageRole::Assistant => "Assistant",
        MessageRole::System => "System",
    }
}

/// One message as printed in the transcript.
pub fn render_message(message: &Message) -> String {
    let time = message.timestamp.with_timezone(&Local).format("%H:%M");
    let header = format!("[{time}] {}", label(message.role));

    if message.processing {
        return format!("{header} is thinking…");
    }
    if message.error {
        return format!("{header} ✖ {}", message.content);
    }
    match message.role {
        MessageRole::Assistant => {
            let rule = divider();
            format!("{header}:\n{rule}\n{}\n{rule}", message.content.trim_end())
        }
        _ => format!("{header}: {}", message.content),
    }
}

pub fn render_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages yet. Ask a question to start chatting.".to_string();
    }
    messages.iter().map(render_message).collect::<Vec<_>>().join("\n\n")
}

/// Single-line poll status, meant to be overwritten in place with `\r`.
pub fn progress_line(status: &str, elapsed: Duration) -> String {
    format!("⏳ Status: {status} ({:.1}s)", elapsed.as_secs_f64())
}
