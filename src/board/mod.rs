//! Project-wide coordination board
//!
//! Shared by every agent role in a project:
//! - a bounded message log (oldest messages evicted past the capacity)
//! - shared notes, one file per name, last writer wins
//! - team tasks (see [`tasks`])
//!
//! Writers in this process are serialized by one async mutex per board and
//! every file is replaced atomically, so readers never see a torn document.

mod tasks;

pub use tasks::{NewTask, TaskStatus, TeamTask};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::workspace::{validate_segment, WorkspaceStore};
use crate::{Error, Result};

const MESSAGES_FILE: &str = "memory/team_chat/messages.json";
const NOTES_DIR: &str = "memory/shared_notes";

/// Message priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [&'static str; 4] = ["low", "normal", "high", "urgent"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(Error::InvalidArguments(format!(
                "Unknown priority '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message posted to the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMessage {
    pub id: String,
    pub author: String,
    #[serde(alias = "message")]
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl BoardMessage {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            author: author.into(),
            body: body.into(),
            priority: Priority::Normal,
            tags: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// On-disk board document
#[derive(Debug, Default, Serialize, Deserialize)]
struct BoardLog {
    #[serde(default)]
    project_id: String,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    messages: Vec<BoardMessage>,
}

/// Filters for [`CoordinationBoard::read`]
#[derive(Debug, Clone, Default)]
pub struct BoardFilter {
    pub priority: Option<Priority>,
    pub author: Option<String>,
}

impl BoardFilter {
    fn matches(&self, message: &BoardMessage) -> bool {
        self.priority.map_or(true, |p| message.priority == p)
            && self.author.as_ref().map_or(true, |a| message.author == *a)
    }
}

/// Result of a board read
#[derive(Debug, Clone, Serialize)]
pub struct BoardPage {
    /// Matching messages, most recent last
    pub messages: Vec<BoardMessage>,
    /// Messages currently on the board
    pub total_count: usize,
    /// Messages matching the filter before the limit was applied
    pub filtered_count: usize,
}

/// A named shared note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedNote {
    pub name: String,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Note listing entry (content omitted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSummary {
    pub name: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message log, shared notes and team tasks for one project
#[derive(Debug)]
pub struct CoordinationBoard {
    workspace: WorkspaceStore,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl CoordinationBoard {
    pub fn new(workspace: WorkspaceStore, capacity: usize) -> Self {
        Self {
            workspace,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message, evicting the oldest past capacity.
    ///
    /// Returns the number of messages retained.
    pub async fn post(&self, message: BoardMessage) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut log = self.load_log();
        log.messages.push(message);

        let overflow = log.messages.len().saturating_sub(self.capacity);
        if overflow > 0 {
            log.messages.drain(..overflow);
            debug!(evicted = overflow, "Evicted oldest board messages");
        }

        log.project_id = self.workspace.project_id().to_string();
        log.last_updated = Some(Utc::now());
        self.workspace.write_json_async(MESSAGES_FILE, &log).await?;

        Ok(log.messages.len())
    }

    /// Most recent `limit` messages matching `filter`, most recent last.
    ///
    /// A `limit` of zero returns every match.
    pub async fn read(&self, limit: usize, filter: &BoardFilter) -> Result<BoardPage> {
        let log = self.load_log();
        let total_count = log.messages.len();

        let matching: Vec<BoardMessage> = log
            .messages
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        let filtered_count = matching.len();

        let skip = if limit == 0 {
            0
        } else {
            filtered_count.saturating_sub(limit)
        };

        Ok(BoardPage {
            messages: matching.into_iter().skip(skip).collect(),
            total_count,
            filtered_count,
        })
    }

    /// Create or replace a shared note
    pub async fn write_note(&self, name: &str, content: &str, author: &str) -> Result<SharedNote> {
        let path = note_path(name)?;
        let _guard = self.write_lock.lock().await;

        let now = Utc::now();
        let created_at = match self.workspace.read_json::<SharedNote>(&path) {
            Ok(Some(existing)) => existing.created_at,
            _ => now,
        };

        let note = SharedNote {
            name: name.to_string(),
            content: content.to_string(),
            author: author.to_string(),
            created_at,
            updated_at: now,
        };
        self.workspace.write_json_async(&path, &note).await?;
        Ok(note)
    }

    /// Read a note; `Ok(None)` when it does not exist
    pub async fn read_note(&self, name: &str) -> Result<Option<SharedNote>> {
        self.workspace.read_json(note_path(name)?)
    }

    /// All readable notes, ordered by name
    pub async fn list_notes(&self) -> Result<Vec<NoteSummary>> {
        let mut notes: Vec<NoteSummary> = self
            .json_files(NOTES_DIR)?
            .into_iter()
            .filter_map(|rel| match self.workspace.read_json::<SharedNote>(&rel) {
                Ok(Some(note)) => Some(NoteSummary {
                    name: note.name,
                    author: note.author,
                    created_at: note.created_at,
                    updated_at: note.updated_at,
                }),
                Ok(None) => None,
                Err(e) => {
                    warn!(file = %rel.display(), "Skipping unreadable note: {}", e);
                    None
                }
            })
            .collect();

        notes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(notes)
    }

    fn load_log(&self) -> BoardLog {
        match self.workspace.read_json::<BoardLog>(MESSAGES_FILE) {
            Ok(Some(log)) => log,
            Ok(None) => BoardLog::default(),
            Err(e) => {
                warn!(project = %self.workspace.project_id(), "Board unreadable, starting empty: {}", e);
                BoardLog::default()
            }
        }
    }

    /// Workspace-relative paths of the `.json` files in a directory
    fn json_files(&self, dir: &str) -> Result<Vec<PathBuf>> {
        let abs = self.workspace.resolve(dir)?;
        let Ok(entries) = std::fs::read_dir(&abs) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_name().map(|name| Path::new(dir).join(name)))
            .collect())
    }
}

fn note_path(name: &str) -> Result<PathBuf> {
    validate_segment("note name", name)?;
    Ok(Path::new(NOTES_DIR).join(format!("{}.json", name)))
}
