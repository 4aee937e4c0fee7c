//! Pending task checklist (`pending_tasks.md`).
//!
//! Operators append tasks; the agent never edits existing lines. Ticking a
//! box is done by hand outside the agent.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;

pub const EMPTY_TASK_LIST: &str = "No pending tasks.";
const TASK_LIST_HEADER: &str = "# Pending Tasks\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingTask {
    pub text: String,
    pub added: Option<NaiveDate>,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct TaskList {
    path: PathBuf,
}

impl TaskList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append `- [ ] <text> (added YYYY-MM-DD)`, creating the document if needed.
    pub fn add_task(&self, text: &str, today: NaiveDate) -> Result<PendingTask> {
        let text = text.trim().replace('\n', " ");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if is_new {
            file.write_all(TASK_LIST_HEADER.as_bytes())?;
        }
        writeln!(file, "- [ ] {} (added {})", text, today.format("%Y-%m-%d"))?;

        tracing::info!("Task added: {}", text);
        Ok(PendingTask {
            text,
            added: Some(today),
            done: false,
        })
    }

    /// Raw document, or [`EMPTY_TASK_LIST`] when there is nothing to show.
    pub fn list_tasks(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(EMPTY_TASK_LIST.to_string());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(EMPTY_TASK_LIST.to_string());
        }
        Ok(content)
    }

    pub fn all(&self) -> Result<Vec<PendingTask>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content.lines().filter_map(parse_task_line).collect())
    }

    /// Unchecked items in document order.
    pub fn pending(&self) -> Result<Vec<PendingTask>> {
        Ok(self.all()?.into_iter().filter(|task| !task.done).collect())
    }
}

fn parse_task_line(line: &str) -> Option<PendingTask> {
    let line = line.trim_start();
    let (done, rest) = if let Some(rest) = line.strip_prefix("- [ ] ") {
        (false, rest)
    } else if let Some(rest) = line
        .strip_prefix("- [x] ")
        .or_else(|| line.strip_prefix("- [X] "))
    {
        (true, rest)
    } else {
        return None;
    };

    let rest = rest.trim();
    let (text, added) = match rest.rsplit_once(" (added ") {
        Some((text, tail)) => {
            let date = tail
                .strip_suffix(')')
                .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
            match date {
                Some(date) => (text.trim().to_string(), Some(date)),
                None => (rest.to_string(), None),
            }
        }
        None => (rest.to_string(), None),
    };

    Some(PendingTask { text, added, done })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 14).unwrap()
    }

    #[test]
    fn add_then_list_contains_text_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = TaskList::new(dir.path().join("state").join("pending_tasks.md"));

        assert_eq!(tasks.list_tasks().unwrap(), EMPTY_TASK_LIST);

        tasks.add_task("buy milk", day()).unwrap();
        let listed = tasks.list_tasks().unwrap();
        assert!(listed.starts_with("# Pending Tasks"));
        assert!(listed.contains("buy milk"));
        assert!(listed.contains("2025-02-14"));
    }

    #[test]
    fn header_written_once_and_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = TaskList::new(dir.path().join("pending_tasks.md"));
        tasks.add_task("first", day()).unwrap();
        tasks.add_task("second\nline", day()).unwrap();

        let listed = tasks.list_tasks().unwrap();
        assert_eq!(listed.matches("# Pending Tasks").count(), 1);
        assert!(listed.contains("- [ ] second line (added 2025-02-14)"));
    }

    #[test]
    fn pending_skips_checked_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_tasks.md");
        fs::write(
            &path,
            "# Pending Tasks\n\n- [x] shipped (added 2025-02-01)\n- [ ] add dark mode (added 2025-02-02)\n- [ ] no date here\nrandom note\n",
        )
        .unwrap();

        let tasks = TaskList::new(path);
        assert_eq!(tasks.all().unwrap().len(), 3);

        let pending = tasks.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].text, "add dark mode");
        assert_eq!(pending[0].added, NaiveDate::from_ymd_opt(2025, 2, 2));
        assert_eq!(pending[1].text, "no date here");
        assert_eq!(pending[1].added, None);
    }
}
