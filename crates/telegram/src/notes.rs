//! Append rendered messages to markdown notes in a vault directory.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use {
    chrono::{NaiveDate, NaiveDateTime},
    tracing::info,
};

use crate::{Error, Result};

pub struct NoteSink {
    vault: PathBuf,
}

impl NoteSink {
    pub fn new(vault: impl Into<PathBuf>) -> Self {
        Self {
            vault: vault.into(),
        }
    }

    pub fn vault(&self) -> &Path {
        &self.vault
    }

    /// Append to `Daily/YYYYMMDD.md`, creating it with a date heading.
    pub fn append_to_daily(&self, content: &str, today: NaiveDate) -> Result<PathBuf> {
        let day = today.format("%Y%m%d").to_string();
        let path = self.vault.join("Daily").join(format!("{day}.md"));
        ensure_note(&path, &day)?;
        append(&path, &format!("\n## Telegram Messages\n{content}\n"))?;
        info!(path = %path.display(), "appended to daily note");
        Ok(path)
    }

    /// Append to `{person}.md` at the vault root.
    pub fn append_to_person(
        &self,
        content: &str,
        person: &str,
        now: NaiveDateTime,
    ) -> Result<PathBuf> {
        let person = person.trim();
        if person.is_empty() || person.contains(['/', '\\']) || person.starts_with('.') {
            return Err(Error::message(format!("invalid note name: '{person}'")));
        }

        let path = self.vault.join(format!("{person}.md"));
        ensure_note(&path, person)?;
        let stamp = now.format("%Y-%m-%d %H:%M");
        append(&path, &format!("\n## Telegram ({stamp})\n{content}\n"))?;
        info!(path = %path.display(), "appended to person note");
        Ok(path)
    }
}

fn ensure_note(path: &Path, title: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    info!(path = %path.display(), "creating note");
    fs::write(path, format!("# {title}\n\n"))?;
    Ok(())
}

fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    Ok(())
}
