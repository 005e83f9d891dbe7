use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    secrecy::ExposeSecret,
    serde::Serialize,
    teloxide::Bot,
    tracing::{debug, info, warn},
};

use {
    skillbox_config::TelegramConfig,
    skillbox_dispatch::{
        CallRequest, DispatchConfig, DispatchError, DispatchResult, ErrorKind, ThrottledDispatcher,
    },
};

use crate::{
    Error, Result,
    primitive::TelegramPrimitive,
    resolver::{ChatResolver, DestinationForm, alias_for_id},
    types::{ChatType, FetchedMessage, SentFile, TelegramCall, TelegramResponse, UpdatesPage},
};

/// Upper bound on pages drained by [`fetch_unread`].
const MAX_UNREAD_PAGES: usize = 50;

pub type TelegramDispatcher = ThrottledDispatcher<TelegramPrimitive, ChatResolver>;

/// Build a bot client from config.
pub fn build_bot(config: &TelegramConfig) -> Result<Bot> {
    if !config.is_configured() {
        return Err(Error::NotConfigured);
    }

    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| Error::HttpClient(e.to_string()))?;
    let mut bot = Bot::with_client(config.token.expose_secret(), client);

    if let Some(raw) = config.api_url.as_deref() {
        let url = reqwest::Url::parse(raw).map_err(|e| Error::InvalidApiUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        bot = bot.set_api_url(url);
    }
    Ok(bot)
}

/// A dispatcher wired to the Bot API with the configured chat aliases.
pub fn connect(config: &TelegramConfig, dispatch: DispatchConfig) -> Result<TelegramDispatcher> {
    let bot = build_bot(config)?;
    debug!(
        aliases = config.chats.len(),
        min_spacing_ms = dispatch.min_spacing_ms,
        "telegram dispatcher ready"
    );
    Ok(ThrottledDispatcher::new(
        TelegramPrimitive::new(bot.clone()),
        ChatResolver::new(bot, config.chats.clone()),
        dispatch,
    ))
}

// ── Sending ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub chat: String,
    pub text: Option<String>,
    pub file: Option<PathBuf>,
    pub reply_to: Option<i32>,
}

/// JSON-printable outcome of one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<SentFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Underlying API calls made, throttle retries included.
    pub calls: u32,
}

impl SendReport {
    /// A send rejected before it was submitted.
    pub fn rejected(error: impl ToString) -> Self {
        Self {
            sent: false,
            request_id: None,
            chat: None,
            message_id: None,
            reply_to: None,
            file: None,
            error: Some(error.to_string()),
            error_kind: None,
            calls: 0,
        }
    }

    pub fn from_result(result: DispatchResult<TelegramResponse>) -> Self {
        let request_id = Some(result.request_id.0);
        let calls = result.calls;
        match result.outcome {
            Ok(TelegramResponse::Sent(sent)) => Self {
                sent: true,
                request_id,
                chat: Some(sent.chat),
                message_id: Some(sent.message_id),
                reply_to: sent.reply_to,
                file: sent.file,
                error: None,
                error_kind: None,
                calls,
            },
            Ok(other) => Self {
                request_id,
                error_kind: Some(ErrorKind::Permanent),
                calls,
                ..Self::rejected(format!("unexpected {} in reply to a send", other.kind()))
            },
            Err(err) => Self {
                request_id,
                chat: Some(result.destination),
                error_kind: Some(err.kind()),
                calls,
                ..Self::rejected(err)
            },
        }
    }
}

/// Validate options and build the request, without touching the network.
pub fn build_send_request(opts: &SendOptions) -> Result<CallRequest<TelegramCall>> {
    if DestinationForm::parse(&opts.chat) == DestinationForm::AllChats {
        return Err(Error::message("Must provide --chat"));
    }

    let text = opts.text.as_deref().filter(|t| !t.is_empty());
    let payload = match (&opts.file, text) {
        (Some(path), caption) => {
            if !path.is_file() {
                return Err(Error::FileNotFound(path.clone()));
            }
            TelegramCall::SendFile {
                path: path.clone(),
                caption: caption.map(str::to_string),
            }
        },
        (None, Some(text)) => TelegramCall::SendText {
            text: text.to_string(),
        },
        (None, None) => return Err(Error::message("Must provide --text or --file")),
    };

    let mut request = CallRequest::new(opts.chat.trim(), payload);
    if let Some(id) = opts.reply_to {
        request = request.reply_to(id.to_string());
    }
    Ok(request)
}

pub async fn send(dispatcher: &TelegramDispatcher, opts: &SendOptions) -> SendReport {
    let request = match build_send_request(opts) {
        Ok(request) => request,
        Err(e) => return SendReport::rejected(e),
    };
    let report = SendReport::from_result(dispatcher.submit_with_retries(request).await);
    if report.sent {
        info!(chat = ?report.chat, message_id = ?report.message_id, "telegram message sent");
    }
    report
}

/// Send several texts to one chat, strictly in order.
///
/// Reports are parallel to `texts`. Blank texts are never submitted and get
/// a rejected report in their position.
pub async fn send_batch(
    dispatcher: &TelegramDispatcher,
    chat: &str,
    texts: impl IntoIterator<Item = String>,
) -> Vec<SendReport> {
    let chat = chat.trim();
    let texts: Vec<_> = texts.into_iter().collect();
    let requests = texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|text| {
            CallRequest::new(chat, TelegramCall::SendText {
                text: text.clone(),
            })
        });
    let mut results = dispatcher.submit_batch(requests).await.into_iter();

    let reports: Vec<_> = texts
        .iter()
        .map(|text| {
            if text.trim().is_empty() {
                return SendReport {
                    chat: Some(chat.to_string()),
                    ..SendReport::rejected("Message text is empty")
                };
            }
            results.next().map_or_else(
                || SendReport::rejected("no result for submitted message"),
                SendReport::from_result,
            )
        })
        .collect();

    let failed = reports.iter().filter(|r| !r.sent).count();
    if failed > 0 {
        warn!(chat, failed, total = reports.len(), "some telegram sends failed");
    }
    reports
}

// ── Fetching ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Chat to read, or every chat when `None`.
    pub chat: Option<String>,
    pub limit: usize,
    /// Only messages from the last N days.
    pub days: Option<u32>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chat: None,
            limit: 50,
            days: None,
        }
    }
}

/// Messages of the oldest pending page, without confirming them, oldest
/// first.
///
/// `getUpdates` only moves past a page by confirming it, so a backlog larger
/// than one page (at most 100 updates) shows its oldest part here until
/// [`fetch_unread`] drains it.
pub async fn fetch_recent(
    dispatcher: &TelegramDispatcher,
    page_size: u8,
    opts: &FetchOptions,
    now: DateTime<Utc>,
) -> std::result::Result<Vec<FetchedMessage>, DispatchError> {
    let destination = opts.chat.clone().unwrap_or_default();
    let page = peek(dispatcher, destination, page_size).await?;

    let cutoff = opts.days.map(|d| now - chrono::Duration::days(i64::from(d)));
    let mut messages: Vec<_> = page
        .messages
        .into_iter()
        .filter(|m| match (cutoff, m.date) {
            (Some(cutoff), Some(date)) => date >= cutoff,
            _ => true,
        })
        .collect();

    if messages.len() > opts.limit {
        messages.drain(..messages.len() - opts.limit);
    }
    Ok(messages)
}

/// Drain every pending update page, confirming what was read.
///
/// Paging confirms whole pages, so updates from other chats are confirmed
/// too when `chat` is set.
pub async fn fetch_unread(
    dispatcher: &TelegramDispatcher,
    page_size: u8,
    chat: Option<&str>,
) -> std::result::Result<Vec<FetchedMessage>, DispatchError> {
    let destination = chat.unwrap_or_default().to_string();
    let page_size = page_size.clamp(1, 100);
    let mut offset = None;
    let mut messages = Vec::new();

    for page_number in 0..MAX_UNREAD_PAGES {
        let result = dispatcher
            .submit(CallRequest::new(destination.clone(), TelegramCall::FetchUpdates {
                offset,
                limit: page_size,
            }))
            .await;
        let page = updates_page(result)?;

        debug!(
            page = page_number,
            updates = page.update_count,
            matched = page.messages.len(),
            "read unread page"
        );
        messages.extend(page.messages);
        if page.next_offset.is_some() {
            offset = page.next_offset;
        }
        if page.update_count < usize::from(page_size) {
            break;
        }
    }

    // The last page is only confirmed by a request past it.
    if offset.is_some() {
        dispatcher
            .submit(CallRequest::new(destination, TelegramCall::FetchUpdates {
                offset,
                limit: 1,
            }))
            .await
            .into_result()?;
    }

    Ok(messages)
}

/// One unconfirmed `getUpdates` page for `destination`.
async fn peek(
    dispatcher: &TelegramDispatcher,
    destination: String,
    page_size: u8,
) -> std::result::Result<UpdatesPage, DispatchError> {
    let page_size = page_size.clamp(1, 100);
    let result = dispatcher
        .submit(CallRequest::new(destination, TelegramCall::FetchUpdates {
            offset: None,
            limit: page_size,
        }))
        .await;
    let page = updates_page(result)?;
    if page.update_count >= usize::from(page_size) {
        warn!(
            updates = page.update_count,
            "pending updates fill a whole page; newer ones are not visible until confirmed"
        );
    }
    Ok(page)
}

/// The page carried by a fetch result. Any other response is a failure of
/// that request.
fn updates_page(
    result: DispatchResult<TelegramResponse>,
) -> std::result::Result<UpdatesPage, DispatchError> {
    match result.outcome? {
        TelegramResponse::Updates(page) => Ok(page),
        other => Err(DispatchError::Permanent {
            request_id: result.request_id,
            destination: result.destination,
            message: format!("unexpected {} in reply to a fetch", other.kind()),
        }),
    }
}

// ── Downloading ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub chat: String,
    /// Most attachments to save, newest first.
    pub limit: usize,
    pub output_dir: PathBuf,
    /// Only this message's attachment.
    pub message_id: Option<i32>,
}

/// JSON-printable outcome of one attachment download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub downloaded: bool,
    pub message_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub calls: u32,
}

impl DownloadReport {
    fn failed(message_id: i32, error: impl ToString) -> Self {
        Self {
            downloaded: false,
            message_id,
            chat: None,
            file: None,
            path: None,
            size: None,
            date: None,
            request_id: None,
            error: Some(error.to_string()),
            error_kind: None,
            calls: 0,
        }
    }

    fn from_result(msg: &FetchedMessage, result: DispatchResult<TelegramResponse>) -> Self {
        let base = Self {
            chat: Some(msg.chat.clone()),
            date: msg.date,
            request_id: Some(result.request_id.0),
            calls: result.calls,
            error: None,
            ..Self::failed(msg.id, "")
        };
        match result.outcome {
            Ok(TelegramResponse::Downloaded(saved)) => Self {
                downloaded: true,
                file: Some(saved.name),
                path: Some(saved.path),
                size: Some(saved.size),
                ..base
            },
            Ok(other) => Self {
                error: Some(format!("unexpected {} in reply to a download", other.kind())),
                error_kind: Some(ErrorKind::Permanent),
                ..base
            },
            Err(err) => Self {
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
                ..base
            },
        }
    }
}

/// Save attachments from the chat's pending messages into `output_dir`.
///
/// Messages are peeked, never confirmed. Each file is its own dispatched
/// request, so a failed download is reported without stopping the rest.
pub async fn download_media(
    dispatcher: &TelegramDispatcher,
    page_size: u8,
    opts: &DownloadOptions,
) -> Result<Vec<DownloadReport>> {
    if DestinationForm::parse(&opts.chat) == DestinationForm::AllChats {
        return Err(Error::message("Must provide --chat"));
    }
    let chat = opts.chat.trim();
    let page = peek(dispatcher, chat.to_string(), page_size).await?;

    let mut candidates: Vec<_> = page
        .messages
        .into_iter()
        .filter(|m| opts.message_id.is_none_or(|id| m.id == id))
        .filter_map(|m| {
            let media = m.media.clone()?;
            Some((m, media))
        })
        .collect();
    if candidates.is_empty() {
        return Ok(match opts.message_id {
            Some(id) => vec![DownloadReport::failed(id, "No media in message")],
            None => Vec::new(),
        });
    }
    candidates.reverse();
    candidates.truncate(opts.limit);

    tokio::fs::create_dir_all(&opts.output_dir).await?;
    let mut reports = Vec::with_capacity(candidates.len());
    for (msg, media) in candidates {
        let name = match media.file_name {
            Some(file_name) => format!("{}_{file_name}", msg.id),
            None => format!("{}_{}", msg.chat_id, msg.id),
        };
        let request = CallRequest::new(chat, TelegramCall::DownloadFile {
            file_id: media.file_id,
            dir: opts.output_dir.clone(),
            name,
        });
        let result = dispatcher.submit_with_retries(request).await;
        reports.push(DownloadReport::from_result(&msg, result));
    }

    let failed = reports.iter().filter(|r| !r.downloaded).count();
    if failed > 0 {
        warn!(chat, failed, total = reports.len(), "some telegram downloads failed");
    } else {
        info!(chat, files = reports.len(), dir = %opts.output_dir.display(), "telegram attachments saved");
    }
    Ok(reports)
}

// ── Listing ─────────────────────────────────────────────────────────────────

/// A chat the bot knows about, from the alias table or pending updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Unknown for aliases that have no pending messages.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    /// Messages from this chat on the pending page.
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DateTime<Utc>>,
}

/// Chats with pending messages, most recently active first, followed by
/// configured aliases that have none. Nothing is confirmed.
pub async fn list_chats(
    dispatcher: &TelegramDispatcher,
    page_size: u8,
    search: Option<&str>,
    limit: usize,
) -> std::result::Result<Vec<ChatEntry>, DispatchError> {
    let page = peek(dispatcher, String::new(), page_size).await?;
    let aliases = dispatcher.resolver().aliases();
    Ok(chat_entries(&page.messages, aliases, search, limit))
}

fn chat_entries(
    messages: &[FetchedMessage],
    aliases: &BTreeMap<String, i64>,
    search: Option<&str>,
    limit: usize,
) -> Vec<ChatEntry> {
    let mut entries: Vec<ChatEntry> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for msg in messages.iter().rev() {
        if let Some(&i) = index.get(&msg.chat_id) {
            entries[i].pending += 1;
            continue;
        }
        index.insert(msg.chat_id, entries.len());
        entries.push(ChatEntry {
            id: msg.chat_id,
            name: msg.chat.clone(),
            alias: alias_for_id(aliases, msg.chat_id).map(str::to_string),
            chat_type: Some(msg.chat_type),
            pending: 1,
            last_message: msg.date,
        });
    }
    for (alias, id) in aliases {
        if index.contains_key(id) {
            continue;
        }
        index.insert(*id, entries.len());
        entries.push(ChatEntry {
            id: *id,
            name: alias.clone(),
            alias: Some(alias.clone()),
            chat_type: None,
            pending: 0,
            last_message: None,
        });
    }

    let needle = search.map(str::to_lowercase);
    entries
        .into_iter()
        .filter(|entry| match &needle {
            Some(needle) => {
                entry.name.to_lowercase().contains(needle)
                    || entry
                        .alias
                        .as_ref()
                        .is_some_and(|a| a.to_lowercase().contains(needle))
            },
            None => true,
        })
        .take(limit)
        .collect()
}
