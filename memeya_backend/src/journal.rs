//! Daily markdown journal.
//!
//! One file per local day (`<journal_dir>/<YYYY-MM-DD>.md`). Entries are
//! appended as sections headed `## HH:MM — <emoji> <KIND>`; the dashboard
//! server reads the same files, so the header format is a shared contract.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    News,
    Reflection,
    Chat,
    Dev,
}

impl JournalKind {
    pub fn emoji(self) -> &'static str {
        match self {
            JournalKind::News => "📰",
            JournalKind::Reflection => "💭",
            JournalKind::Chat => "💬",
            JournalKind::Dev => "🛠️",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JournalKind::News => "NEWS",
            JournalKind::Reflection => "REFLECTION",
            JournalKind::Chat => "CHAT",
            JournalKind::Dev => "DEV",
        }
    }

    fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEWS" => Some(JournalKind::News),
            "REFLECTION" => Some(JournalKind::Reflection),
            "CHAT" => Some(JournalKind::Chat),
            "DEV" => Some(JournalKind::Dev),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub date: NaiveDate,
    pub time: String,
    pub kind: JournalKind,
    pub content: String,
}

impl JournalEntry {
    fn to_markdown(&self) -> String {
        format!(
            "## {} — {} {}\n\n{}\n\n",
            self.time,
            self.kind.emoji(),
            self.kind.label(),
            self.content.trim()
        )
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
    offset: FixedOffset,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            dir: dir.into(),
            offset,
        }
    }

    /// Local calendar day for `now` in the journal's fixed offset.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    pub fn append(
        &self,
        kind: JournalKind,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<JournalEntry> {
        let local = now.with_timezone(&self.offset);
        let entry = JournalEntry {
            date: local.date_naive(),
            time: local.format("%H:%M").to_string(),
            kind,
            content: escape_headers(content.trim()),
        };

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(entry.date);
        let is_new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            write!(file, "# Journal {}\n\n", entry.date.format("%Y-%m-%d"))?;
        }
        file.write_all(entry.to_markdown().as_bytes())?;

        tracing::debug!("Journal {} entry appended to {:?}", kind.label(), path);
        Ok(entry)
    }

    /// Raw document for `date`, `None` if nothing was written that day.
    pub fn read_day(&self, date: NaiveDate) -> Result<Option<String>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    /// Last `max_chars` characters of the day's document (empty when absent).
    pub fn tail(&self, date: NaiveDate, max_chars: usize) -> Result<String> {
        let content = self.read_day(date)?.unwrap_or_default();
        Ok(tail_chars(&content, max_chars))
    }

    /// The most recent `limit` entries of the day, oldest first.
    pub fn recent_entries(&self, date: NaiveDate, limit: usize) -> Result<Vec<JournalEntry>> {
        let content = self.read_day(date)?.unwrap_or_default();
        let entries = parse_entries(date, &content);
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// Dates that have a journal file, newest first.
    pub fn list_days(&self) -> Result<Vec<NaiveDate>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut days: Vec<NaiveDate> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let stem = name.strip_suffix(".md")?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .collect();
        days.sort_unstable_by(|a, b| b.cmp(a));
        Ok(days)
    }
}

pub fn tail_chars(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    content.chars().skip(total - max_chars).collect()
}

/// Demote body lines that would read back as an entry header.
fn escape_headers(content: &str) -> String {
    content
        .lines()
        .map(|line| match line.strip_prefix("## ") {
            Some(rest) if parse_header(rest).is_some() => format!("### {}", rest),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse `## HH:MM — <emoji> <KIND>` sections. Any other line, including
/// other `## ` headings, belongs to the current entry's body.
pub fn parse_entries(date: NaiveDate, content: &str) -> Vec<JournalEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(String, JournalKind, Vec<&str>)> = None;

    for line in content.lines() {
        if let Some((time, kind)) = line.strip_prefix("## ").and_then(parse_header) {
            if let Some((time, kind, body)) = current.take() {
                entries.push(finish_entry(date, time, kind, &body));
            }
            current = Some((time, kind, Vec::new()));
        } else if let Some((_, _, body)) = current.as_mut() {
            body.push(line);
        }
    }

    if let Some((time, kind, body)) = current {
        entries.push(finish_entry(date, time, kind, &body));
    }

    entries
}

fn parse_header(header: &str) -> Option<(String, JournalKind)> {
    let (time, rest) = header.split_once('—')?;
    let kind = JournalKind::from_label(rest.split_whitespace().last()?)?;
    Some((time.trim().to_string(), kind))
}

fn finish_entry(date: NaiveDate, time: String, kind: JournalKind, body: &[&str]) -> JournalEntry {
    JournalEntry {
        date,
        time,
        kind,
        content: body.join("\n").trim().to_string(),
    }
}
