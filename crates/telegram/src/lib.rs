//! Telegram skill for skillbox.
//!
//! Sends, fetches and downloads through the Telegram Bot API (teloxide),
//! with every call paced by a [`skillbox_dispatch::ThrottledDispatcher`].

pub mod error;
pub mod format;
pub mod notes;
pub mod primitive;
pub mod resolver;
pub mod skill;
pub mod types;

pub use {
    error::{Error, Result},
    primitive::TelegramPrimitive,
    resolver::ChatResolver,
    skill::{TelegramDispatcher, connect},
    types::{
        ChatType, FetchedMessage, MediaKind, MediaRef, SavedFile, TelegramCall, TelegramResponse,
        TelegramTarget,
    },
};
