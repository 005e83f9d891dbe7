use std::path::PathBuf;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    teloxide::types::{Chat, ChatId, Message, Update, UpdateKind, User},
};

/// Concrete destination of a Telegram call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramTarget {
    /// Every chat the bot can see. Only meaningful for fetches.
    AllChats,
    Chat(ChatRef),
}

impl TelegramTarget {
    pub fn chat(id: i64, name: impl Into<String>) -> Self {
        Self::Chat(ChatRef {
            id: ChatId(id),
            name: name.into(),
        })
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::AllChats => "all chats",
            Self::Chat(chat) => &chat.name,
        }
    }

    /// Whether `msg` belongs to this target.
    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            Self::AllChats => true,
            Self::Chat(chat) => msg.chat.id == chat.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: ChatId,
    pub name: String,
}

/// Payload of one Telegram call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelegramCall {
    SendText {
        text: String,
    },
    /// Images are sent as photos, anything else as a document.
    SendFile {
        path: PathBuf,
        caption: Option<String>,
    },
    /// One `getUpdates` page. An offset confirms every update before it.
    FetchUpdates {
        offset: Option<i32>,
        limit: u8,
    },
    /// `getFile` followed by a download of its body into `dir`. A `name`
    /// without an extension takes the one Telegram stored the file under.
    DownloadFile {
        file_id: String,
        dir: PathBuf,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub enum TelegramResponse {
    Sent(SentMessage),
    Updates(UpdatesPage),
    Downloaded(SavedFile),
}

impl TelegramResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sent(_) => "sent message",
            Self::Updates(_) => "updates page",
            Self::Downloaded(_) => "downloaded file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub chat: String,
    pub message_id: i32,
    pub reply_to: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<SentFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentFile {
    pub name: String,
    pub size: u64,
    pub path: String,
}

/// A file written to disk by a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatesPage {
    /// Messages of this page that belong to the requested target.
    pub messages: Vec<FetchedMessage>,
    /// Raw updates returned, before filtering by target.
    pub update_count: usize,
    /// Offset that confirms everything on this page.
    pub next_offset: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
    Channel,
    Unknown,
}

impl ChatType {
    pub fn of(chat: &Chat) -> Self {
        if chat.is_private() {
            Self::Private
        } else if chat.is_group() || chat.is_supergroup() {
            Self::Group
        } else if chat.is_channel() {
            Self::Channel
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    Video,
    Audio,
    Voice,
    Animation,
    VideoNote,
    Sticker,
}

/// Downloadable attachment of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// A message flattened for markdown/JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub id: i32,
    pub chat_id: i64,
    pub chat: String,
    pub chat_type: ChatType,
    pub sender: String,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    pub has_media: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
}

impl FetchedMessage {
    pub fn from_message(msg: &Message) -> Self {
        let sender = msg
            .from
            .as_ref()
            .map(user_display_name)
            .or_else(|| msg.sender_chat.as_ref().map(chat_display_name))
            .unwrap_or_else(|| "Unknown".to_string());

        let media = media_ref(msg);
        Self {
            id: msg.id.0,
            chat_id: msg.chat.id.0,
            chat: chat_display_name(&msg.chat),
            chat_type: ChatType::of(&msg.chat),
            sender,
            text: msg
                .text()
                .or_else(|| msg.caption())
                .unwrap_or_default()
                .to_string(),
            date: Some(msg.date),
            has_media: media.is_some(),
            media,
        }
    }
}

/// Title for groups and channels, full name for private chats.
pub fn chat_display_name(chat: &Chat) -> String {
    if let Some(title) = chat.title() {
        return title.to_string();
    }
    let first = chat.first_name().unwrap_or_default();
    let last = chat.last_name().unwrap_or_default();
    let name = format!("{first} {last}").trim().to_string();
    if !name.is_empty() {
        return name;
    }
    chat.username()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| chat.id.0.to_string())
}

fn user_display_name(user: &User) -> String {
    let last = user.last_name.as_deref().unwrap_or("");
    let name = format!("{} {last}", user.first_name).trim().to_string();
    if name.is_empty() {
        user.username.clone().unwrap_or_else(|| "Unknown".into())
    } else {
        name
    }
}

/// The attachment of `msg`, if any. Photos use their largest size.
fn media_ref(msg: &Message) -> Option<MediaRef> {
    let (kind, file, file_name) = if let Some(sizes) = msg.photo() {
        (MediaKind::Photo, &sizes.last()?.file, None)
    } else if let Some(doc) = msg.document() {
        (MediaKind::Document, &doc.file, doc.file_name.as_ref())
    } else if let Some(video) = msg.video() {
        (MediaKind::Video, &video.file, video.file_name.as_ref())
    } else if let Some(audio) = msg.audio() {
        (MediaKind::Audio, &audio.file, audio.file_name.as_ref())
    } else if let Some(voice) = msg.voice() {
        (MediaKind::Voice, &voice.file, None)
    } else if let Some(animation) = msg.animation() {
        (MediaKind::Animation, &animation.file, animation.file_name.as_ref())
    } else if let Some(note) = msg.video_note() {
        (MediaKind::VideoNote, &note.file, None)
    } else if let Some(sticker) = msg.sticker() {
        (MediaKind::Sticker, &sticker.file, None)
    } else {
        return None;
    };

    Some(MediaRef {
        kind,
        file_id: file.id.clone(),
        file_name: file_name.cloned(),
    })
}

/// The message carried by an update, for message-like update kinds.
pub fn update_message(update: &Update) -> Option<&Message> {
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => Some(msg),
        _ => None,
    }
}
