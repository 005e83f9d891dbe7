use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    skillbox_dispatch::DispatchConfig,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillboxConfig {
    /// Pacing shared by every skill that talks to a rate-limited API.
    pub dispatch: DispatchConfig,
    pub telegram: TelegramConfig,
    pub notes: NotesConfig,
}

/// Telegram Bot API access.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// Custom Bot API server (e.g. a self-hosted `telegram-bot-api`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Maximum updates requested per `getUpdates` page (1-100).
    pub fetch_page_size: u8,

    /// HTTP client timeout (seconds).
    pub request_timeout_secs: u64,

    /// Human-friendly chat names mapped to chat ids, matched
    /// case-insensitively when resolving `--chat`.
    pub chats: BTreeMap<String, i64>,

    /// Where `telegram download` saves attachments. Defaults to
    /// `~/Downloads/telegram_attachments`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.token.expose_secret().trim().is_empty()
    }

    pub fn download_dir(&self) -> Option<PathBuf> {
        self.download_path.clone().or_else(|| {
            directories::UserDirs::new().map(|d| {
                d.download_dir()
                    .map_or_else(|| d.home_dir().join("Downloads"), Path::to_path_buf)
                    .join("telegram_attachments")
            })
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("chats", &self.chats)
            .finish_non_exhaustive()
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            api_url: None,
            fetch_page_size: 100,
            request_timeout_secs: 30,
            chats: BTreeMap::new(),
            download_path: None,
        }
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Where fetched messages are appended as markdown notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Notes vault root. Defaults to `~/Brains/brain`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<PathBuf>,
}

impl NotesConfig {
    pub fn vault_dir(&self) -> Option<PathBuf> {
        self.vault_path.clone().or_else(|| {
            directories::BaseDirs::new().map(|d| d.home_dir().join("Brains").join("brain"))
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = SkillboxConfig::default();
        assert!(!cfg.telegram.is_configured());
        assert_eq!(cfg.telegram.fetch_page_size, 100);
        assert_eq!(cfg.dispatch.min_spacing_ms, 100);
        assert!(cfg.telegram.chats.is_empty());
    }

    #[test]
    fn deserialize_from_toml() {
        let raw = r#"
            [dispatch]
            min_spacing_ms = 250

            [telegram]
            token = "123:ABC"

            [telegram.chats]
            "Family" = -100123
            mom = 42
        "#;
        let cfg: SkillboxConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.dispatch.min_spacing_ms, 250);
        assert_eq!(cfg.dispatch.safety_margin_ms, 250);
        assert!(cfg.telegram.is_configured());
        assert_eq!(cfg.telegram.token.expose_secret(), "123:ABC");
        assert_eq!(cfg.telegram.chats.get("Family"), Some(&-100123));
        assert_eq!(cfg.telegram.chats.get("mom"), Some(&42));
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = TelegramConfig {
            token: Secret::new("secret-token".into()),
            ..Default::default()
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn download_dir_defaults_under_downloads() {
        let mut telegram = TelegramConfig::default();
        if let Some(dir) = telegram.download_dir() {
            assert!(dir.ends_with("telegram_attachments"));
        }

        telegram.download_path = Some(PathBuf::from("/tmp/attachments"));
        assert_eq!(telegram.download_dir(), Some(PathBuf::from("/tmp/attachments")));
    }

    #[test]
    fn explicit_vault_path_wins() {
        let notes = NotesConfig {
            vault_path: Some(PathBuf::from("/tmp/vault")),
        };
        assert_eq!(notes.vault_dir(), Some(PathBuf::from("/tmp/vault")));
    }
}
