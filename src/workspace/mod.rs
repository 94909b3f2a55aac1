//! Per-project workspace storage
//!
//! Each project owns one directory tree. Every path any component touches
//! goes through [`WorkspaceStore::resolve`], which rejects anything that
//! normalizes to a location outside the root.
//!
//! Layout:
//!
//! ```text
//! <base>/<project_id>/
//!   project.json          metadata
//!   repo/                 cloned repository
//!   docs/                 generated documentation
//!   memory/<role>/        conversation, decisions, status
//!   memory/team_chat/     board messages
//!   memory/shared_notes/  one file per note
//!   memory/tasks/         one file per team task
//!   memory/shared/        activity log
//!   tools/logs/           per-module activity logs
//! ```

mod activity;
mod path;

pub use activity::{ActivityEntry, ActivityLog};
pub use path::{normalize, resolve_within};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

pub const REPO_DIR: &str = "repo";
pub const DOCS_DIR: &str = "docs";
pub const MEMORY_DIR: &str = "memory";
pub const TOOLS_DIR: &str = "tools";
const METADATA_FILE: &str = "project.json";

/// Directories under `memory/` owned by the board and the activity log
pub const RESERVED_MEMORY_DIRS: &[&str] = &["team_chat", "shared_notes", "tasks", "shared"];

const LAYOUT: &[&str] = &[
    REPO_DIR,
    DOCS_DIR,
    "memory/team_chat",
    "memory/shared_notes",
    "memory/tasks",
    "memory/shared",
    "tools/logs",
];

/// Project metadata stored at the workspace root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Snapshot of workspace health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub project_id: String,
    pub root: PathBuf,
    pub repo_present: bool,
    pub structure_valid: bool,
    pub total_files: usize,
    pub metadata: Option<ProjectMetadata>,
}

/// Handle to one project's workspace root
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    project_id: String,
    root: PathBuf,
}

impl WorkspaceStore {
    /// Create (or reopen) the workspace for a project under `base_dir`
    pub fn create(base_dir: &Path, project_id: &str) -> Result<Self> {
        validate_segment("project id", project_id)?;

        let root = base_dir.join(project_id);
        std::fs::create_dir_all(&root)?;
        let store = Self {
            project_id: project_id.to_string(),
            root: root.canonicalize()?,
        };

        for dir in LAYOUT {
            std::fs::create_dir_all(store.root.join(dir))?;
        }

        if store.metadata()?.is_none() {
            let now = Utc::now();
            store.write_json(
                METADATA_FILE,
                &ProjectMetadata {
                    project_id: project_id.to_string(),
                    created_at: now,
                    last_activity: now,
                },
            )?;
            info!(project = project_id, root = %store.root.display(), "Created workspace");
        }

        Ok(store)
    }

    /// Open an existing workspace
    pub fn open(base_dir: &Path, project_id: &str) -> Result<Self> {
        validate_segment("project id", project_id)?;

        let root = base_dir.join(project_id);
        if !root.is_dir() {
            return Err(Error::NotFound(format!("Workspace for project '{}'", project_id)));
        }

        Ok(Self {
            project_id: project_id.to_string(),
            root: root.canonicalize()?,
        })
    }

    /// Check whether a project's workspace exists
    pub fn exists(base_dir: &Path, project_id: &str) -> bool {
        validate_segment("project id", project_id).is_ok() && base_dir.join(project_id).is_dir()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative or absolute path, rejecting anything outside the root
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        resolve_within(&self.root, path.as_ref())
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join(REPO_DIR)
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join(DOCS_DIR)
    }

    /// Memory subtree for one agent role
    pub fn role_dir(&self, role: &str) -> Result<PathBuf> {
        validate_role(role)?;
        self.resolve(Path::new(MEMORY_DIR).join(role))
    }

    /// Read a JSON document; `Ok(None)` when the file does not exist
    pub fn read_json<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> Result<Option<T>> {
        let path = self.resolve(rel)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::CorruptState(format!("{}: {}", path.display(), e)))
    }

    /// Atomically replace a JSON document
    pub fn write_json<T: Serialize>(&self, rel: impl AsRef<Path>, value: &T) -> Result<()> {
        let path = self.resolve(rel)?;
        let content = serde_json::to_vec_pretty(value)?;
        write_atomic(&path, &content)
    }

    /// Read newline-delimited JSON; an unparsable line is reported as corrupt state
    pub fn read_jsonl<T: DeserializeOwned>(&self, rel: impl AsRef<Path>) -> Result<Vec<T>> {
        let path = self.resolve(rel)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::CorruptState(format!("{} line {}: {}", path.display(), n + 1, e))
                })
            })
            .collect()
    }

    /// Atomically replace a newline-delimited JSON file
    pub fn write_jsonl<T: Serialize>(&self, rel: impl AsRef<Path>, items: &[T]) -> Result<()> {
        let path = self.resolve(rel)?;
        let mut content = Vec::new();
        for item in items {
            serde_json::to_writer(&mut content, item)?;
            content.push(b'\n');
        }
        write_atomic(&path, &content)
    }

    /// [`write_json`](Self::write_json) on the blocking pool
    pub async fn write_json_async<T: Serialize>(
        &self,
        rel: impl AsRef<Path>,
        value: &T,
    ) -> Result<()> {
        let content = serde_json::to_vec_pretty(value)?;
        self.write_blocking(rel.as_ref(), content).await
    }

    /// [`write_jsonl`](Self::write_jsonl) on the blocking pool
    pub async fn write_jsonl_async<T: Serialize>(
        &self,
        rel: impl AsRef<Path>,
        items: &[T],
    ) -> Result<()> {
        let mut content = Vec::new();
        for item in items {
            serde_json::to_writer(&mut content, item)?;
            content.push(b'\n');
        }
        self.write_blocking(rel.as_ref(), content).await
    }

    /// Atomic write on the blocking pool
    async fn write_blocking(&self, rel: &Path, content: Vec<u8>) -> Result<()> {
        let path = self.resolve(rel)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Append one record to a newline-delimited JSON log
    pub fn append_jsonl<T: Serialize>(&self, rel: impl AsRef<Path>, item: &T) -> Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');

        // One write call per line keeps concurrent appenders from interleaving
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Remove a file inside the workspace; missing files are not an error
    pub fn remove(&self, rel: impl AsRef<Path>) -> Result<()> {
        let path = self.resolve(rel)?;
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn metadata(&self) -> Result<Option<ProjectMetadata>> {
        self.read_json(METADATA_FILE)
    }

    /// Record activity on the project
    pub fn touch(&self) -> Result<()> {
        let now = Utc::now();
        let metadata = match self.metadata()? {
            Some(mut m) => {
                m.last_activity = now;
                m
            }
            None => ProjectMetadata {
                project_id: self.project_id.clone(),
                created_at: now,
                last_activity: now,
            },
        };
        self.write_json(METADATA_FILE, &metadata)
    }

    /// Get current workspace status
    pub fn info(&self) -> WorkspaceInfo {
        WorkspaceInfo {
            project_id: self.project_id.clone(),
            root: self.root.clone(),
            repo_present: self.repo_dir().join(".git").exists(),
            structure_valid: LAYOUT.iter().all(|d| self.root.join(d).is_dir()),
            total_files: count_files(&self.root),
            metadata: self.metadata().ok().flatten(),
        }
    }

    /// Delete the whole workspace
    pub fn teardown(self) -> Result<()> {
        info!(project = %self.project_id, "Tearing down workspace");
        std::fs::remove_dir_all(&self.root)?;
        Ok(())
    }
}

/// Reject identifiers that would add path structure when used as a directory name
pub fn validate_segment(what: &str, value: &str) -> Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::WorkspaceSecurity(format!(
            "Invalid {} '{}'",
            what, value
        )));
    }
    Ok(())
}

/// A role name must be a plain segment that does not collide with shared state
pub fn validate_role(role: &str) -> Result<()> {
    validate_segment("role", role)?;
    if RESERVED_MEMORY_DIRS.contains(&role) {
        return Err(Error::WorkspaceSecurity(format!(
            "Role name '{}' is reserved",
            role
        )));
    }
    Ok(())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::WorkspaceSecurity(format!("No parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    entries
        .filter_map(|e| e.ok())
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => count_files(&entry.path()),
            Ok(t) if t.is_file() => 1,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_builds_layout() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();

        let info = ws.info();
        assert!(info.structure_valid);
        assert!(!info.repo_present);
        assert_eq!(info.metadata.unwrap().project_id, "p1");
        assert!(WorkspaceStore::exists(base.path(), "p1"));
    }

    #[test]
    fn test_rejects_bad_project_ids() {
        let base = tempfile::tempdir().unwrap();
        for bad in ["", "..", "a/b", "../escape"] {
            assert!(WorkspaceStore::create(base.path(), bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_reserved_role_names() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();

        for reserved in RESERVED_MEMORY_DIRS {
            let err = ws.role_dir(reserved).unwrap_err();
            assert!(matches!(err, Error::WorkspaceSecurity(_)), "{}", reserved);
        }
        assert_eq!(ws.role_dir("ceo").unwrap(), ws.root().join("memory/ceo"));
    }

    #[test]
    fn test_json_roundtrip_and_corruption() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();

        ws.write_json("memory/x.json", &serde_json::json!({"a": 1})).unwrap();
        let value: serde_json::Value = ws.read_json("memory/x.json").unwrap().unwrap();
        assert_eq!(value["a"], 1);

        std::fs::write(ws.root().join("memory/x.json"), "{not json").unwrap();
        let err = ws.read_json::<serde_json::Value>("memory/x.json").unwrap_err();
        assert!(matches!(err, Error::CorruptState(_)));

        assert!(ws.read_json::<serde_json::Value>("memory/missing.json").unwrap().is_none());
    }

    #[test]
    fn test_jsonl_append_preserves_order() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();

        for i in 0..5 {
            ws.append_jsonl("memory/log.jsonl", &i).unwrap();
        }
        let items: Vec<i32> = ws.read_jsonl("memory/log.jsonl").unwrap();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);

        ws.write_jsonl("memory/log.jsonl", &[9, 8]).unwrap();
        let items: Vec<i32> = ws.read_jsonl("memory/log.jsonl").unwrap();
        assert_eq!(items, vec![9, 8]);
    }

    #[test]
    fn test_io_outside_root_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();

        let err = ws.write_json("../p2/evil.json", &1).unwrap_err();
        assert!(matches!(err, Error::WorkspaceSecurity(_)));
        assert!(!base.path().join("p2/evil.json").exists());
    }

    #[test]
    fn test_teardown_and_open() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        assert!(WorkspaceStore::open(base.path(), "p1").is_ok());

        ws.teardown().unwrap();
        assert!(matches!(
            WorkspaceStore::open(base.path(), "p1"),
            Err(Error::NotFound(_))
        ));
    }
}
