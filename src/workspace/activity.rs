//! Append-only activity log for tool dispatches
//!
//! Independent of conversation history; used for audit and debugging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use super::WorkspaceStore;
use crate::{ErrorKind, Result};

const MAIN_LOG: &str = "memory/shared/activity.jsonl";

/// One dispatch record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    /// Tool module that owns the capability (empty when unknown)
    pub module: String,
    pub capability: String,
    pub arguments: serde_json::Value,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writer for the workspace activity log
#[derive(Debug, Clone)]
pub struct ActivityLog {
    workspace: WorkspaceStore,
}

impl ActivityLog {
    pub fn new(workspace: WorkspaceStore) -> Self {
        Self { workspace }
    }

    pub fn project_id(&self) -> &str {
        self.workspace.project_id()
    }

    /// Append an entry to the main log and the owning module's log.
    ///
    /// Logging failures are reported but never fail the dispatch.
    pub fn record(&self, entry: &ActivityEntry) {
        if let Err(e) = self.workspace.append_jsonl(MAIN_LOG, entry) {
            warn!(capability = %entry.capability, "Failed to write activity log: {}", e);
        }

        if !entry.module.is_empty() {
            let module_log = PathBuf::from("tools/logs").join(format!("{}.jsonl", entry.module));
            if let Err(e) = self.workspace.append_jsonl(module_log, entry) {
                warn!(module = %entry.module, "Failed to write module log: {}", e);
            }
        }
    }

    /// Most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let entries: Vec<ActivityEntry> = self.workspace.read_jsonl(MAIN_LOG)?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(capability: &str, module: &str) -> ActivityEntry {
        ActivityEntry {
            timestamp: Utc::now(),
            project_id: "p1".to_string(),
            module: module.to_string(),
            capability: capability.to_string(),
            arguments: serde_json::json!({}),
            duration_ms: 1,
            success: true,
            error_kind: None,
            error: None,
        }
    }

    #[test]
    fn test_record_and_tail() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let log = ActivityLog::new(ws.clone());

        log.record(&entry("read_file", "filesystem"));
        log.record(&entry("team_write_message", "team"));
        log.record(&entry("nope", ""));

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].capability, "team_write_message");
        assert_eq!(tail[1].capability, "nope");

        assert!(ws.root().join("tools/logs/filesystem.jsonl").exists());
        assert!(ws.root().join("tools/logs/team.jsonl").exists());
    }
}
