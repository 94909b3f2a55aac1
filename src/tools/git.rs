//! Git capabilities over the workspace's cloned repository
//!
//! Every command runs as a subprocess with the configured timeout. A command
//! that outlives it is killed and reported as [`Error::Timeout`].

use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::{arg_str, arg_str_list, require_str, Capability, ParamKind, ParamSchema, ToolModule};
use crate::workspace::WorkspaceStore;
use crate::{Error, Result};

const DEFAULT_MAX_COMMITS: u64 = 10;
const AGENT_NAME: &str = "Boardroom Agent";
const AGENT_EMAIL: &str = "agents@boardroom.local";

/// Transports git may use; local and `ext::` remotes are never allowed
const ALLOWED_PROTOCOLS: &str = "https:ssh:git";
const REMOTE_SCHEMES: &[&str] = &["https://", "ssh://", "git://"];

/// Clone, inspect and commit to `repo/`
pub struct GitTools {
    workspace: WorkspaceStore,
    timeout: Duration,
}

impl GitTools {
    pub fn new(workspace: WorkspaceStore, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }

    async fn git(&self, args: &[&str], cwd: &Path) -> Result<String> {
        run_command("git", args, cwd, self.timeout).await
    }

    fn require_repo(&self) -> Result<std::path::PathBuf> {
        let repo = self.workspace.repo_dir();
        if !repo.join(".git").exists() {
            return Err(Error::NotFound(
                "No git repository found in workspace".to_string(),
            ));
        }
        Ok(repo)
    }

    async fn clone_repository(&self, args: Value) -> Result<Value> {
        let repo_url = require_str(&args, "repo_url")?;
        validate_remote_url(repo_url)?;
        let branch = arg_str(&args, "branch");
        let repo = self.workspace.repo_dir();

        if repo.exists() {
            tokio::fs::remove_dir_all(&repo).await?;
        }
        tokio::fs::create_dir_all(&repo).await?;

        let target = repo.to_string_lossy().into_owned();
        let mut cmd = vec!["clone"];
        if let Some(branch) = branch {
            cmd.extend(["-b", branch]);
        }
        cmd.extend(["--", repo_url, target.as_str()]);

        self.git(&cmd, self.workspace.root()).await?;
        info!(project = %self.workspace.project_id(), url = repo_url, "Cloned repository");

        let current_branch = self
            .git(&["branch", "--show-current"], &repo)
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        Ok(json!({
            "repo_url": repo_url,
            "clone_path": repo,
            "branch": current_branch,
        }))
    }

    async fn status(&self) -> Result<Value> {
        let repo = self.require_repo()?;

        let porcelain = self.git(&["status", "--porcelain"], &repo).await?;
        let branch = self.git(&["branch", "--show-current"], &repo).await?;
        let changes = parse_porcelain(&porcelain);

        Ok(json!({
            "current_branch": branch.trim(),
            "clean": changes.is_empty(),
            "total_changes": changes.len(),
            "changes": changes,
        }))
    }

    async fn history(&self, args: Value) -> Result<Value> {
        let repo = self.require_repo()?;
        let max_commits = args
            .get("max_commits")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_COMMITS);

        let max_count = format!("--max-count={}", max_commits);
        let output = self
            .git(
                &[
                    "log",
                    &max_count,
                    "--pretty=format:%H|%an|%ae|%ad|%s",
                    "--date=iso",
                ],
                &repo,
            )
            .await?;

        let commits: Vec<Value> = output
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(5, '|').collect();
                match parts.as_slice() {
                    [hash, author, email, date, message] => Some(json!({
                        "hash": &hash[..hash.len().min(8)],
                        "author": author,
                        "email": email,
                        "date": date,
                        "message": message,
                    })),
                    _ => None,
                }
            })
            .collect();

        Ok(json!({
            "total_commits": commits.len(),
            "commits": commits,
        }))
    }

    async fn commit_changes(&self, args: Value) -> Result<Value> {
        let repo = self.require_repo()?;
        let message = require_str(&args, "message")?;
        let files = arg_str_list(&args, "files");

        self.ensure_identity(&repo).await?;

        if files.is_empty() {
            self.git(&["add", "--all"], &repo).await?;
        } else {
            for file in &files {
                // Resolve through the workspace so a file list cannot escape it
                let path = self.workspace.resolve(repo.join(file))?;
                let path = path.to_string_lossy().into_owned();
                self.git(&["add", "--", path.as_str()], &repo).await?;
            }
        }

        let staged = self.git(&["diff", "--cached", "--name-only"], &repo).await?;
        let staged: Vec<&str> = staged.lines().filter(|l| !l.is_empty()).collect();
        if staged.is_empty() {
            return Err(Error::ToolExecution("No changes to commit".to_string()));
        }

        self.git(&["commit", "-m", message], &repo).await?;
        let hash = self.git(&["rev-parse", "HEAD"], &repo).await?;
        let hash = hash.trim();
        info!(project = %self.workspace.project_id(), commit = hash, "Committed changes");

        Ok(json!({
            "commit_hash": &hash[..hash.len().min(8)],
            "message": message,
            "files_committed": staged,
        }))
    }

    async fn ensure_identity(&self, repo: &Path) -> Result<()> {
        for (key, value) in [("user.name", AGENT_NAME), ("user.email", AGENT_EMAIL)] {
            let current = self.git(&["config", key], repo).await.unwrap_or_default();
            if current.trim().is_empty() {
                self.git(&["config", key, value], repo).await?;
            }
        }
        Ok(())
    }
}

impl ToolModule for GitTools {
    fn name(&self) -> &str {
        "git"
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            Capability::bound(
                &self,
                "clone_repository",
                "Clone a repository into the workspace (replaces any existing clone)",
                ParamSchema::new()
                    .required("repo_url", ParamKind::String, "Repository URL to clone")
                    .optional("branch", ParamKind::String, "Branch to check out"),
                |git, args| async move { git.clone_repository(args).await },
            ),
            Capability::bound(
                &self,
                "get_git_status",
                "Current branch and uncommitted changes",
                ParamSchema::new(),
                |git, _args| async move { git.status().await },
            ),
            Capability::bound(
                &self,
                "get_git_history",
                "Recent commit history",
                ParamSchema::new().optional(
                    "max_commits",
                    ParamKind::Integer,
                    "Maximum number of commits (default 10)",
                ),
                |git, args| async move { git.history(args).await },
            ),
            Capability::bound(
                &self,
                "commit_changes",
                "Stage and commit changes in the repository",
                ParamSchema::new()
                    .required("message", ParamKind::String, "Commit message")
                    .optional("files", ParamKind::Array, "Files to stage (default: all)"),
                |git, args| async move { git.commit_changes(args).await },
            ),
        ]
    }
}

/// Run a command with a hard timeout, returning stdout
async fn run_command(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String> {
    debug!(program, ?args, cwd = %cwd.display(), "Running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ALLOW_PROTOCOL", ALLOWED_PROTOCOLS)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(output) => output
            .map_err(|e| Error::ToolExecution(format!("failed to start {}: {}", program, e)))?,
        Err(_) => {
            return Err(Error::Timeout(format!(
                "{} {} exceeded {}",
                program,
                args.first().unwrap_or(&""),
                humantime::format_duration(timeout)
            )))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::ToolExecution(format!(
            "{} {} failed: {}",
            program,
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Accept `https://`, `ssh://`, `git://` and scp-style `user@host:path` URLs
fn validate_remote_url(url: &str) -> Result<()> {
    let scheme_ok = REMOTE_SCHEMES.iter().any(|scheme| {
        url.strip_prefix(scheme)
            .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('/'))
    });

    let scp_ok = !url.contains("://")
        && url.split_once(':').is_some_and(|(host, path)| {
            !path.is_empty()
                && host
                    .split_once('@')
                    .is_some_and(|(user, host)| !user.is_empty() && !host.is_empty())
                && !host.contains(['/', '\\'])
        });

    if scheme_ok || scp_ok {
        Ok(())
    } else {
        Err(Error::WorkspaceSecurity(format!(
            "Only remote repository URLs can be cloned, got '{}'",
            url
        )))
    }
}

fn parse_porcelain(output: &str) -> Vec<Value> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let (code, file) = line.split_at(2);
            let change_type = match code {
                "??" => "untracked",
                c if c.contains('M') => "modified",
                c if c.contains('A') => "added",
                c if c.contains('D') => "deleted",
                c if c.contains('R') => "renamed",
                _ => "unknown",
            };
            json!({
                "file": file.trim_start(),
                "status": code.trim(),
                "change_type": change_type,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CapabilityRegistry;
    use crate::ErrorKind;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn test_parse_porcelain() {
        let changes = parse_porcelain(" M src/main.rs\n?? notes.md\nA  new.rs\n");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0]["change_type"], "modified");
        assert_eq!(changes[0]["file"], "src/main.rs");
        assert_eq!(changes[1]["change_type"], "untracked");
        assert_eq!(changes[2]["change_type"], "added");
    }

    #[test]
    fn test_remote_url_forms() {
        for ok in [
            "https://github.com/acme/site.git",
            "ssh://git@github.com/acme/site.git",
            "git://example.com/repo.git",
            "git@github.com:acme/site.git",
        ] {
            assert!(validate_remote_url(ok).is_ok(), "{}", ok);
        }

        for bad in [
            "/tmp/secret-repo",
            "../other/repo",
            "file:///tmp/secret-repo",
            "ext::sh -c touch% /tmp/pwned",
            "https:///tmp/repo",
            "C:/repos/secret",
            "repo",
        ] {
            let err = validate_remote_url(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::WorkspaceSecurity, "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_clone_of_local_repository_is_rejected() {
        if !git_available() {
            return;
        }

        let outside = tempfile::tempdir().unwrap();
        run_command("git", &["init", "-q"], outside.path(), Duration::from_secs(10))
            .await
            .unwrap();
        std::fs::write(outside.path().join("secret.txt"), "TOPSECRET").unwrap();

        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let mut registry = CapabilityRegistry::new();
        registry
            .register_module(Arc::new(GitTools::new(ws.clone(), Duration::from_secs(10))))
            .unwrap();

        let local = outside.path().to_string_lossy().into_owned();
        let file_url = format!("file://{}", local);
        for url in [local, file_url] {
            let out = registry
                .dispatch("clone_repository", json!({"repo_url": url.as_str()}))
                .await;
            assert_eq!(out.error_kind, Some(ErrorKind::WorkspaceSecurity), "{}", url);
        }
        assert!(!ws.repo_dir().join("secret.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_command("sleep", &["5"], dir.path(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_status_without_repo() {
        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let mut registry = CapabilityRegistry::new();
        registry
            .register_module(Arc::new(GitTools::new(ws, Duration::from_secs(5))))
            .unwrap();

        let out = registry.dispatch("get_git_status", Value::Null).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("No git repository"));
    }

    #[tokio::test]
    async fn test_commit_and_history() {
        if !git_available() {
            return;
        }

        let base = tempfile::tempdir().unwrap();
        let ws = WorkspaceStore::create(base.path(), "p1").unwrap();
        let repo = ws.repo_dir();
        run_command("git", &["init", "-q"], &repo, Duration::from_secs(10))
            .await
            .unwrap();
        std::fs::write(repo.join("README.md"), "# Demo").unwrap();

        let mut registry = CapabilityRegistry::new();
        registry
            .register_module(Arc::new(GitTools::new(ws, Duration::from_secs(10))))
            .unwrap();

        let out = registry.dispatch("get_git_status", Value::Null).await;
        assert_eq!(out.result.unwrap()["clean"], false);

        let out = registry
            .dispatch("commit_changes", json!({"message": "Initial docs"}))
            .await;
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.result.unwrap()["files_committed"], json!(["README.md"]));

        let out = registry.dispatch("get_git_history", json!({})).await;
        let result = out.result.unwrap();
        assert_eq!(result["total_commits"], 1);
        assert_eq!(result["commits"][0]["message"], "Initial docs");

        let out = registry
            .dispatch("commit_changes", json!({"message": "again"}))
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::ToolExecution));

        let out = registry
            .dispatch(
                "commit_changes",
                json!({"message": "escape", "files": ["../../../etc/passwd"]}),
            )
            .await;
        assert_eq!(out.error_kind, Some(ErrorKind::WorkspaceSecurity));
    }
}
