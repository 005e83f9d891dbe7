use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    teloxide::{
        ApiError, DownloadError, RequestError,
        net::Download,
        payloads::{GetUpdatesSetters, SendDocumentSetters, SendMessageSetters, SendPhotoSetters},
        prelude::*,
        types::{InputFile, MessageId, ReplyParameters},
    },
    tokio::io::AsyncWriteExt,
    tracing::debug,
};

use skillbox_dispatch::{CallError, CallPrimitive};

use crate::types::{
    ChatRef, FetchedMessage, SavedFile, SentFile, SentMessage, TelegramCall, TelegramResponse,
    TelegramTarget, UpdatesPage, update_message,
};

/// Image file extensions uploaded as Telegram photos.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Bot API calls, one API method per [`CallPrimitive::call`]. A download
/// also fetches the file body from the file endpoint.
#[derive(Clone)]
pub struct TelegramPrimitive {
    bot: Bot,
}

impl TelegramPrimitive {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    async fn send_text(
        &self,
        chat: &ChatRef,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<TelegramResponse, CallError> {
        let (reply_id, reply_params) = parse_reply_params(reply_to)?;
        let mut req = self.bot.send_message(chat.id, text);
        if let Some(rp) = reply_params {
            req = req.reply_parameters(rp);
        }
        let message = req.await.map_err(|e| classify_request_error(&e))?;

        Ok(TelegramResponse::Sent(SentMessage {
            chat: chat.name.clone(),
            message_id: message.id.0,
            reply_to: reply_id,
            file: None,
        }))
    }

    async fn send_file(
        &self,
        chat: &ChatRef,
        path: &Path,
        caption: Option<&str>,
        reply_to: Option<&str>,
    ) -> Result<TelegramResponse, CallError> {
        let (reply_id, reply_params) = parse_reply_params(reply_to)?;
        let input = InputFile::file(path.to_path_buf());

        let sent = if is_image(path) {
            let mut req = self.bot.send_photo(chat.id, input);
            if let Some(caption) = caption {
                req = req.caption(caption);
            }
            if let Some(rp) = reply_params {
                req = req.reply_parameters(rp);
            }
            req.await
        } else {
            let mut req = self.bot.send_document(chat.id, input);
            if let Some(caption) = caption {
                req = req.caption(caption);
            }
            if let Some(rp) = reply_params {
                req = req.reply_parameters(rp);
            }
            req.await
        };
        let message = sent.map_err(|e| classify_request_error(&e))?;

        let size = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(TelegramResponse::Sent(SentMessage {
            chat: chat.name.clone(),
            message_id: message.id.0,
            reply_to: reply_id,
            file: Some(SentFile {
                name,
                size,
                path: path.display().to_string(),
            }),
        }))
    }

    async fn fetch_updates(
        &self,
        target: &TelegramTarget,
        offset: Option<i32>,
        limit: u8,
    ) -> Result<TelegramResponse, CallError> {
        let mut req = self.bot.get_updates().limit(limit.clamp(1, 100)).timeout(0);
        if let Some(offset) = offset {
            req = req.offset(offset);
        }
        let updates = req.await.map_err(|e| classify_request_error(&e))?;

        let messages: Vec<_> = updates
            .iter()
            .filter_map(update_message)
            .filter(|msg| target.matches(msg))
            .map(FetchedMessage::from_message)
            .collect();
        debug!(
            target = target.display_name(),
            updates = updates.len(),
            messages = messages.len(),
            "fetched telegram updates"
        );

        Ok(TelegramResponse::Updates(UpdatesPage {
            messages,
            update_count: updates.len(),
            next_offset: updates.last().map(|u| u.id.as_offset()),
        }))
    }

    async fn download_file(
        &self,
        file_id: &str,
        dir: &Path,
        name: &str,
    ) -> Result<TelegramResponse, CallError> {
        let file = self
            .bot
            .get_file(file_id)
            .await
            .map_err(|e| classify_request_error(&e))?;

        let name = download_name(name, &file.path);
        let path = dir.join(&name);
        let io_error = |e: std::io::Error| {
            CallError::permanent(format!("failed to write {}: {e}", path.display()))
        };

        let mut dst = tokio::fs::File::create(&path).await.map_err(io_error)?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| match e {
                DownloadError::Network(err) => {
                    CallError::transient(format!("file download failed: {err}"))
                },
                DownloadError::Io(err) => io_error(err),
            })?;
        dst.flush().await.map_err(io_error)?;
        let size = dst.metadata().await.map(|m| m.len()).unwrap_or_default();

        debug!(file_id, path = %path.display(), size, "downloaded telegram file");
        Ok(TelegramResponse::Downloaded(SavedFile { name, path, size }))
    }
}

#[async_trait]
impl CallPrimitive for TelegramPrimitive {
    type Payload = TelegramCall;
    type Response = TelegramResponse;
    type Target = TelegramTarget;

    async fn call(
        &self,
        target: &TelegramTarget,
        payload: &TelegramCall,
        reply_to: Option<&str>,
    ) -> Result<TelegramResponse, CallError> {
        match payload {
            TelegramCall::SendText { text } => {
                self.send_text(single_chat(target)?, text, reply_to).await
            },
            TelegramCall::SendFile { path, caption } => {
                self.send_file(single_chat(target)?, path, caption.as_deref(), reply_to)
                    .await
            },
            TelegramCall::FetchUpdates { offset, limit } => {
                self.fetch_updates(target, *offset, *limit).await
            },
            TelegramCall::DownloadFile { file_id, dir, name } => {
                self.download_file(file_id, dir, name).await
            },
        }
    }
}

fn single_chat(target: &TelegramTarget) -> Result<&ChatRef, CallError> {
    match target {
        TelegramTarget::Chat(chat) => Ok(chat),
        TelegramTarget::AllChats => Err(CallError::permanent(
            "sending requires a single chat, not all chats",
        )),
    }
}

/// Reply target for a send. A reply id that is not a message id rejects
/// the send.
fn parse_reply_params(
    reply_to: Option<&str>,
) -> Result<(Option<i32>, Option<ReplyParameters>), CallError> {
    let Some(raw) = reply_to else {
        return Ok((None, None));
    };
    let id = raw
        .trim()
        .parse::<i32>()
        .map_err(|_| CallError::permanent(format!("invalid reply-to message id '{raw}'")))?;
    let params = ReplyParameters::new(MessageId(id)).allow_sending_without_reply();
    Ok((Some(id), Some(params)))
}

/// File name for a download, sanitized to a single path component. A name
/// without an extension borrows the one from Telegram's file path.
fn download_name(name: &str, telegram_path: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "telegram_file".to_string());
    if Path::new(&base).extension().is_some() {
        return base;
    }
    match Path::new(telegram_path).extension() {
        Some(ext) => PathBuf::from(base)
            .with_extension(ext)
            .to_string_lossy()
            .into_owned(),
        None => base,
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Map a teloxide error onto the dispatcher's error taxonomy.
///
/// `RetryAfter` is the Bot API's flood-control signal and carries the wait
/// verbatim. Gateway-class failures reported through the API envelope are
/// transient like network errors.
pub fn classify_request_error(error: &RequestError) -> CallError {
    match error {
        RequestError::RetryAfter(wait) => CallError::throttled(wait.duration()),
        RequestError::Network(_) | RequestError::Io(_) | RequestError::InvalidJson { .. } => {
            CallError::transient(error.to_string())
        },
        RequestError::Api(ApiError::Unknown(description)) if is_server_error(description) => {
            CallError::transient(error.to_string())
        },
        _ => CallError::permanent(error.to_string()),
    }
}

fn is_server_error(description: &str) -> bool {
    const MARKERS: &[&str] = &[
        "Internal Server Error",
        "Bad Gateway",
        "Service Unavailable",
        "Gateway Timeout",
    ];
    MARKERS.iter().any(|m| description.contains(m))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        rstest::rstest,
        std::{path::PathBuf, time::Duration},
    };

    #[test]
    fn retry_after_becomes_throttle_signal() {
        let err = RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(42));
        assert_eq!(
            classify_request_error(&err),
            CallError::throttled(Duration::from_secs(42))
        );
    }

    #[test]
    fn io_errors_are_transient() {
        let err = RequestError::Io(std::io::Error::other("boom"));
        assert!(matches!(
            classify_request_error(&err),
            CallError::Transient(_)
        ));
    }

    #[test]
    fn api_errors_are_permanent() {
        let err = RequestError::Api(ApiError::BotBlocked);
        assert!(matches!(
            classify_request_error(&err),
            CallError::Permanent(_)
        ));
    }

    #[test]
    fn gateway_errors_in_api_envelope_are_transient() {
        let err = RequestError::Api(ApiError::Unknown("Bad Gateway".into()));
        assert!(matches!(
            classify_request_error(&err),
            CallError::Transient(_)
        ));
    }

    #[test]
    fn sending_to_all_chats_is_rejected() {
        assert!(single_chat(&TelegramTarget::AllChats).is_err());
        assert!(single_chat(&TelegramTarget::chat(1, "a")).is_ok());
    }

    #[rstest]
    #[case(Some("17"), Some(17))]
    #[case(Some(" 17 "), Some(17))]
    #[case(None, None)]
    fn reply_params_parse_numeric_ids(#[case] raw: Option<&str>, #[case] expected: Option<i32>) {
        let (id, params) = parse_reply_params(raw).unwrap();
        assert_eq!(id, expected);
        assert_eq!(params.is_some(), expected.is_some());
    }

    #[rstest]
    #[case("abc")]
    #[case("")]
    #[case("99999999999")]
    fn malformed_reply_id_rejects_the_send(#[case] raw: &str) {
        let err = parse_reply_params(Some(raw)).unwrap_err();
        assert!(matches!(err, CallError::Permanent(ref m) if m.contains("reply-to")), "{err:?}");
    }

    #[rstest]
    #[case("minutes.pdf", "documents/file_3.pdf", "minutes.pdf")]
    #[case("42_7", "photos/file_1.jpg", "42_7.jpg")]
    #[case("../../etc/passwd", "documents/file_2", "passwd")]
    #[case("voice", "voice/file_9", "voice")]
    fn download_names_stay_inside_the_target_dir(
        #[case] name: &str,
        #[case] telegram_path: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(download_name(name, telegram_path), expected);
    }

    #[rstest]
    #[case("shot.PNG", true)]
    #[case("photo.jpeg", true)]
    #[case("report.pdf", false)]
    #[case("notes", false)]
    fn images_are_detected_by_extension(#[case] name: &str, #[case] image: bool) {
        assert_eq!(is_image(&PathBuf::from(name)), image);
    }
}
