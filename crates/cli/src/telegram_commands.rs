use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result, bail},
    chrono::{Local, Utc},
    clap::{Args, Subcommand},
    tracing::info,
};

use {
    skillbox_config::SkillboxConfig,
    skillbox_telegram::{
        FetchedMessage, TelegramDispatcher, connect,
        format::{OutputFormat, format_messages, to_markdown},
        notes::NoteSink,
        skill::{self, DownloadOptions, FetchOptions, SendOptions, SendReport},
    },
};

#[derive(Subcommand)]
pub enum TelegramAction {
    /// Send a text message or a file to one chat.
    Send {
        /// Chat alias, title, @username or numeric id.
        #[arg(long)]
        chat: String,
        /// Message text, or the caption when sending a file.
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Message id to reply to.
        #[arg(long)]
        reply_to: Option<i32>,
    },
    /// Send several messages to one chat, in order.
    SendBatch {
        #[arg(long)]
        chat: String,
        /// Repeat for each message.
        #[arg(long = "text")]
        texts: Vec<String>,
        /// File with one message per line.
        #[arg(long, conflicts_with = "texts")]
        lines: Option<PathBuf>,
    },
    /// Show recent pending messages without marking them read.
    Recent {
        #[arg(long)]
        chat: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only messages from the last N days.
        #[arg(long)]
        days: Option<u32>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Read and confirm every pending message.
    Unread {
        #[arg(long)]
        chat: Option<String>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Save attachments from a chat's pending messages.
    Download {
        #[arg(long)]
        chat: String,
        /// Most attachments to save, newest first.
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Target directory (default: telegram.download_path, then
        /// ~/Downloads/telegram_attachments).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only this message's attachment.
        #[arg(long)]
        message_id: Option<i32>,
    },
    /// List chats with pending messages and configured aliases.
    List {
        /// Only chats whose name or alias contains this text.
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
}

#[derive(Args, Debug, Default)]
pub struct OutputArgs {
    /// Print JSON instead of markdown.
    #[arg(long)]
    json: bool,
    /// Append to today's daily note.
    #[arg(long, conflicts_with = "to_person")]
    to_daily: bool,
    /// Append to the named person's note.
    #[arg(long)]
    to_person: Option<String>,
}

pub async fn handle_telegram(action: TelegramAction, config: &SkillboxConfig) -> Result<()> {
    match action {
        TelegramAction::Send {
            chat,
            text,
            file,
            reply_to,
        } => {
            let opts = SendOptions {
                chat,
                text,
                file,
                reply_to,
            };
            // Rejected options never need a token.
            if let Err(e) = skill::build_send_request(&opts) {
                return print_report(&SendReport::rejected(e));
            }
            let dispatcher = dispatcher(config)?;
            print_report(&skill::send(&dispatcher, &opts).await)
        },
        TelegramAction::SendBatch { chat, texts, lines } => {
            let texts = match lines {
                Some(path) => read_lines(&path)?,
                None => texts,
            };
            if texts.is_empty() {
                bail!("Must provide --text or --lines");
            }
            let dispatcher = dispatcher(config)?;
            let reports = skill::send_batch(&dispatcher, &chat, texts).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let failures = failure_report(&reports);
            if !failures.is_empty() {
                eprintln!("{failures}");
                let failed = reports.iter().filter(|r| !r.sent).count();
                bail!("{failed} of {} messages failed", reports.len());
            }
            Ok(())
        },
        TelegramAction::Recent {
            chat,
            limit,
            days,
            output,
        } => {
            let dispatcher = dispatcher(config)?;
            let opts = FetchOptions { chat, limit, days };
            let messages = skill::fetch_recent(
                &dispatcher,
                config.telegram.fetch_page_size,
                &opts,
                Utc::now(),
            )
            .await?;
            emit(config, &messages, &output)
        },
        TelegramAction::Unread { chat, output } => {
            let dispatcher = dispatcher(config)?;
            let messages = skill::fetch_unread(
                &dispatcher,
                config.telegram.fetch_page_size,
                chat.as_deref(),
            )
            .await?;
            info!(count = messages.len(), "confirmed unread telegram messages");
            emit(config, &messages, &output)
        },
        TelegramAction::Download {
            chat,
            limit,
            output,
            message_id,
        } => {
            let output_dir = output
                .or_else(|| config.telegram.download_dir())
                .context("no download directory: pass --output or set telegram.download_path")?;
            let dispatcher = dispatcher(config)?;
            let opts = DownloadOptions {
                chat,
                limit,
                output_dir,
                message_id,
            };
            let reports =
                skill::download_media(&dispatcher, config.telegram.fetch_page_size, &opts).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        },
        TelegramAction::List { search, limit } => {
            let dispatcher = dispatcher(config)?;
            let chats = skill::list_chats(
                &dispatcher,
                config.telegram.fetch_page_size,
                search.as_deref(),
                limit,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&chats)?);
            Ok(())
        },
    }
}

fn dispatcher(config: &SkillboxConfig) -> Result<TelegramDispatcher> {
    Ok(connect(&config.telegram, config.dispatch.clone())?)
}

fn print_report(report: &SendReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if !report.sent {
        bail!("{}", report.error.as_deref().unwrap_or("telegram send failed"));
    }
    Ok(())
}

/// Print messages, or append them to a note when asked to.
fn emit(config: &SkillboxConfig, messages: &[FetchedMessage], output: &OutputArgs) -> Result<()> {
    if !output.to_daily && output.to_person.is_none() {
        if messages.is_empty() && !output.json {
            println!("No messages found.");
            return Ok(());
        }
        let format = if output.json {
            OutputFormat::Json
        } else {
            OutputFormat::Markdown
        };
        println!("{}", format_messages(messages, format)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!("No messages found.");
        return Ok(());
    }

    let vault = config
        .notes
        .vault_dir()
        .context("no vault configured: set notes.vault_path or SKILLBOX_VAULT_PATH")?;
    let sink = NoteSink::new(vault);
    let content = to_markdown(messages);
    let now = Local::now().naive_local();

    let path = match output.to_person.as_deref() {
        Some(person) => sink.append_to_person(&content, person, now)?,
        None => sink.append_to_daily(&content, now.date())?,
    };
    println!("Appended {} messages to {}", messages.len(), path.display());
    Ok(())
}

/// Non-empty lines of a batch file, trimmed of trailing whitespace. Blank
/// lines separate messages and are not messages themselves.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(body
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// One line per failed request: position, request id, error kind and message.
fn failure_report(reports: &[SendReport]) -> String {
    reports
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.sent)
        .map(|(i, r)| {
            format!(
                "message {} (request {}): {}: {}",
                i + 1,
                r.request_id.map(|id| format!("#{id}")).unwrap_or_else(|| "-".into()),
                r.error_kind.map(|k| k.as_str()).unwrap_or("rejected"),
                r.error.as_deref().unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
