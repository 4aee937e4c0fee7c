//! Dev/Chat mode and the Dev-mode snapshot that survives mode switches.
//!
//! Only one mode is active at a time, so the snapshot file has a single
//! writer: every save overwrites it and there is no merge or versioning.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Dev,
    #[default]
    Chat,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Dev => "dev",
            Mode::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSnapshot {
    pub phase: String,
    pub status: String,
    pub last_task: String,
    pub next_steps: Vec<String>,
    pub notes: String,
}

impl ModeSnapshot {
    pub fn to_markdown(&self, saved_at: DateTime<Utc>) -> String {
        let mut out = String::from("# Dev Mode Snapshot\n\n");
        out.push_str(&format!("- **Saved:** {}\n", saved_at.to_rfc3339()));
        out.push_str(&format!("- **Phase:** {}\n", one_line(&self.phase)));
        out.push_str(&format!("- **Status:** {}\n", one_line(&self.status)));
        out.push_str(&format!("- **Last task:** {}\n", one_line(&self.last_task)));

        out.push_str("\n## Next Steps\n");
        if self.next_steps.is_empty() {
            out.push_str("- (none)\n");
        } else {
            for step in &self.next_steps {
                out.push_str(&format!("- {}\n", one_line(step)));
            }
        }

        out.push_str("\n## Notes\n");
        out.push_str(self.notes.trim());
        out.push('\n');
        out
    }

    /// Best-effort inverse of [`ModeSnapshot::to_markdown`]; unknown lines are ignored.
    pub fn from_markdown(raw: &str) -> Self {
        let mut snapshot = ModeSnapshot::default();
        let mut section = "";
        let mut notes = Vec::new();

        for line in raw.lines() {
            if let Some(heading) = line.strip_prefix("## ") {
                section = match heading.trim() {
                    "Next Steps" => "steps",
                    "Notes" => "notes",
                    _ => "",
                };
                continue;
            }

            match section {
                "steps" => {
                    if let Some(step) = line.strip_prefix("- ") {
                        if step.trim() != "(none)" {
                            snapshot.next_steps.push(step.trim().to_string());
                        }
                    }
                }
                "notes" => notes.push(line),
                _ => {
                    if let Some(value) = line.strip_prefix("- **Phase:** ") {
                        snapshot.phase = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("- **Status:** ") {
                        snapshot.status = value.trim().to_string();
                    } else if let Some(value) = line.strip_prefix("- **Last task:** ") {
                        snapshot.last_task = value.trim().to_string();
                    }
                }
            }
        }

        snapshot.notes = notes.join("\n").trim().to_string();
        snapshot
    }
}

fn one_line(value: &str) -> String {
    value.trim().replace('\n', " ")
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Overwrite the snapshot file.
    pub fn save(&self, snapshot: &ModeSnapshot, now: DateTime<Utc>) -> Result<()> {
        ensure_parent(&self.path)?;
        fs::write(&self.path, snapshot.to_markdown(now))?;
        tracing::info!("Saved dev snapshot to {:?} (phase: {})", self.path, snapshot.phase);
        Ok(())
    }

    /// Raw snapshot document, `None` when no snapshot has been saved.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModeRecord {
    mode: Mode,
    switched_at: DateTime<Utc>,
}

/// Remembers the active mode across restarts (`mode.json`).
#[derive(Debug, Clone)]
pub struct ModeStore {
    path: PathBuf,
}

impl ModeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Defaults to [`Mode::Chat`] when nothing (or garbage) is on disk.
    pub fn load(&self) -> Mode {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<ModeRecord>(&raw).ok())
            .map(|record| record.mode)
            .unwrap_or_default()
    }

    pub fn save(&self, mode: Mode, now: DateTime<Utc>) -> Result<()> {
        ensure_parent(&self.path)?;
        let record = ModeRecord {
            mode,
            switched_at: now,
        };
        fs::write(&self.path, serde_json::to_string_pretty(&record)?)?;
        Ok(())
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
