use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::SkillboxConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "skillbox.toml",
    "skillbox.yaml",
    "skillbox.yml",
    "skillbox.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SkillboxConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config, then apply environment overrides.
///
/// Search order:
/// 1. `config_dir` when given (e.g. `--config-dir`)
/// 2. `./skillbox.{toml,yaml,yml,json}` (project-local)
/// 3. `~/.config/skillbox/skillbox.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `SkillboxConfig::default()` if no file is found or the
/// file cannot be parsed.
pub fn discover_and_load(config_dir: Option<&Path>) -> SkillboxConfig {
    let mut config = match find_config_file(config_dir) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                SkillboxConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            SkillboxConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file(config_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = config_dir {
        return first_existing(dir);
    }

    // Project-local
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    config_dir_default().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn config_dir_default() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skillbox").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global config directory (`~/.config/skillbox/`).
pub fn config_dir() -> Option<PathBuf> {
    config_dir_default()
}

/// Override config values from environment variables.
///
/// `lookup` is `std::env::var` in production; tests pass a closure.
pub fn apply_env_overrides(config: &mut SkillboxConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.trim().is_empty()) {
        config.telegram.token = Secret::new(token);
    }
    if let Some(url) = lookup("SKILLBOX_TELEGRAM_API_URL").filter(|v| !v.trim().is_empty()) {
        config.telegram.api_url = Some(url);
    }
    if let Some(path) = lookup("SKILLBOX_VAULT_PATH").filter(|v| !v.trim().is_empty()) {
        config.notes.vault_path = Some(PathBuf::from(path));
    }
    if let Some(path) = lookup("SKILLBOX_DOWNLOAD_PATH").filter(|v| !v.trim().is_empty()) {
        config.telegram.download_path = Some(PathBuf::from(path));
    }
    if let Some(raw) = lookup("SKILLBOX_MIN_SPACING_MS") {
        match raw.trim().parse::<u64>() {
            Ok(ms) => config.dispatch.min_spacing_ms = ms,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid SKILLBOX_MIN_SPACING_MS"),
        }
    }
}

/// Render `config` as TOML with secrets replaced.
pub fn redacted_toml(config: &SkillboxConfig) -> anyhow::Result<String> {
    let mut config = config.clone();
    if config.telegram.is_configured() {
        config.telegram.token = Secret::new("[REDACTED]".into());
    }
    toml::to_string_pretty(&config).map_err(|e| anyhow::anyhow!("serialize config: {e}"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SkillboxConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
