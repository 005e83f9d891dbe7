use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    teloxide::{
        RequestError,
        payloads::GetUpdatesSetters,
        prelude::*,
        types::{Chat, Recipient},
    },
    tracing::debug,
};

use skillbox_dispatch::{ResolveError, Resolver};

use crate::types::{ChatRef, TelegramTarget, chat_display_name, update_message};

/// Updates peeked (never confirmed) when matching a chat by name.
const NAME_LOOKUP_UPDATES: u8 = 100;

/// How a destination string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationForm<'a> {
    /// Empty or `*`.
    AllChats,
    /// `@username` (kept with its `@`).
    Username(&'a str),
    ChatId(i64),
    /// Anything else: alias or chat title/name.
    Name(&'a str),
}

impl<'a> DestinationForm<'a> {
    pub fn parse(destination: &'a str) -> Self {
        let destination = destination.trim();
        if destination.is_empty() || destination == "*" {
            return Self::AllChats;
        }
        if destination.len() > 1 && destination.starts_with('@') {
            return Self::Username(destination);
        }
        if let Ok(id) = destination.parse::<i64>() {
            return Self::ChatId(id);
        }
        Self::Name(destination)
    }
}

/// Bare names shaped like a Telegram username are tried as `@name` when
/// nothing else matches.
fn looks_like_username(name: &str) -> bool {
    let mut chars = name.chars();
    (5..=32).contains(&name.len())
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves `--chat` values to Telegram chats.
///
/// Order: all-chats marker, `@username`, numeric id, configured alias,
/// chats seen in pending updates, then a bare name as a username.
/// Successful resolutions are cached for the resolver's lifetime.
pub struct ChatResolver {
    bot: Bot,
    aliases: BTreeMap<String, i64>,
    cache: Mutex<HashMap<String, TelegramTarget>>,
}

impl ChatResolver {
    pub fn new(bot: Bot, aliases: BTreeMap<String, i64>) -> Self {
        Self {
            bot,
            aliases,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn aliases(&self) -> &BTreeMap<String, i64> {
        &self.aliases
    }

    fn cached(&self, key: &str) -> Option<TelegramTarget> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    fn remember(&self, key: &str, target: &TelegramTarget) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(key.to_string(), target.clone());
    }

    async fn lookup_username(&self, username: &str) -> Result<TelegramTarget, ResolveError> {
        match self
            .bot
            .get_chat(Recipient::ChannelUsername(username.to_string()))
            .await
        {
            Ok(chat) => Ok(TelegramTarget::chat(chat.id.0, username)),
            Err(RequestError::Api(err)) => {
                debug!(username, error = %err, "username lookup rejected");
                Err(ResolveError::NotFound)
            },
            Err(err) => Err(lookup_error(err)),
        }
    }

    async fn match_recent_chat(&self, name: &str) -> Result<Option<TelegramTarget>, ResolveError> {
        let updates = self
            .bot
            .get_updates()
            .limit(NAME_LOOKUP_UPDATES)
            .timeout(0)
            .await
            .map_err(lookup_error)?;

        // Newest first within the oldest pending page, so the most recently
        // active chat on it wins ties.
        let chats = updates.iter().rev().filter_map(update_message).map(|m| &m.chat);
        Ok(match_chat_by_name(chats, name).map(TelegramTarget::Chat))
    }
}

#[async_trait]
impl Resolver for ChatResolver {
    type Target = TelegramTarget;

    fn is_remote(&self, destination: &str) -> bool {
        let key = destination.trim();
        if self.cached(key).is_some() {
            return false;
        }
        match DestinationForm::parse(key) {
            DestinationForm::AllChats | DestinationForm::ChatId(_) => false,
            DestinationForm::Username(_) => true,
            DestinationForm::Name(name) => match_alias(&self.aliases, name).is_none(),
        }
    }

    async fn resolve(&self, destination: &str) -> Result<TelegramTarget, ResolveError> {
        let key = destination.trim();
        if let Some(hit) = self.cached(key) {
            return Ok(hit);
        }

        let target = match DestinationForm::parse(key) {
            DestinationForm::AllChats => TelegramTarget::AllChats,
            DestinationForm::Username(username) => self.lookup_username(username).await?,
            DestinationForm::ChatId(id) => {
                TelegramTarget::chat(id, alias_for_id(&self.aliases, id).unwrap_or(key))
            },
            DestinationForm::Name(name) => {
                if let Some(chat) = match_alias(&self.aliases, name) {
                    TelegramTarget::Chat(chat)
                } else if let Some(target) = self.match_recent_chat(name).await? {
                    target
                } else if looks_like_username(name) {
                    self.lookup_username(&format!("@{name}")).await?
                } else {
                    return Err(ResolveError::NotFound);
                }
            },
        };

        debug!(destination = key, chat = target.display_name(), "resolved destination");
        self.remember(key, &target);
        Ok(target)
    }
}

fn lookup_error(error: RequestError) -> ResolveError {
    match error {
        RequestError::RetryAfter(wait) => ResolveError::Throttled {
            retry_after: wait.duration(),
        },
        other => ResolveError::Lookup(other.to_string()),
    }
}

/// Case-insensitive alias match: exact name first, then substring.
pub fn match_alias(aliases: &BTreeMap<String, i64>, name: &str) -> Option<ChatRef> {
    let needle = name.to_lowercase();
    aliases
        .iter()
        .find(|(alias, _)| alias.to_lowercase() == needle)
        .or_else(|| {
            aliases
                .iter()
                .find(|(alias, _)| alias.to_lowercase().contains(&needle))
        })
        .map(|(alias, id)| ChatRef {
            id: ChatId(*id),
            name: alias.clone(),
        })
}

pub(crate) fn alias_for_id(aliases: &BTreeMap<String, i64>, id: i64) -> Option<&str> {
    aliases
        .iter()
        .find(|(_, alias_id)| **alias_id == id)
        .map(|(alias, _)| alias.as_str())
}

/// First chat whose display name contains `name`, ignoring case.
pub fn match_chat_by_name<'a>(
    chats: impl IntoIterator<Item = &'a Chat>,
    name: &str,
) -> Option<ChatRef> {
    let needle = name.to_lowercase();
    chats.into_iter().find_map(|chat| {
        let display = chat_display_name(chat);
        display.to_lowercase().contains(&needle).then(|| ChatRef {
            id: chat.id,
            name: display,
        })
    })
}
