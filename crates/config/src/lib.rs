//! Configuration loading and env substitution.
//!
//! Config files: `skillbox.toml`, `skillbox.yaml`, or `skillbox.json`
//! Searched in `./` then `~/.config/skillbox/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        redacted_toml,
    },
    schema::{NotesConfig, SkillboxConfig, TelegramConfig},
};
