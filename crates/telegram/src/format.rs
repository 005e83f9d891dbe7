use {
    serde::{Deserialize, Serialize},
    std::fmt::Write,
};

use crate::types::FetchedMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

pub fn format_messages(messages: &[FetchedMessage], format: OutputFormat) -> crate::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(messages)?),
        OutputFormat::Markdown => Ok(to_markdown(messages)),
    }
}

/// Messages grouped under a `## chat (type)` heading whenever the chat
/// changes. Media-only messages render as `[media]`; empty ones are skipped.
pub fn to_markdown(messages: &[FetchedMessage]) -> String {
    let mut out = String::new();
    let mut current_chat: Option<&str> = None;

    for msg in messages {
        if current_chat != Some(msg.chat.as_str()) {
            current_chat = Some(msg.chat.as_str());
            let _ = write!(out, "\n## {} ({})\n\n", msg.chat, msg.chat_type.as_str());
        }

        let text = if msg.text.is_empty() && msg.has_media {
            "[media]"
        } else {
            msg.text.as_str()
        };
        if text.is_empty() {
            continue;
        }

        let date = msg
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let _ = writeln!(out, "**{date}** - {}:", msg.sender);
        let _ = writeln!(out, "> {text}\n");
    }

    out
}
