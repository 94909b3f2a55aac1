//! Filesystem capabilities scoped to the project workspace

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{arg_str, require_str, Capability, ParamKind, ParamSchema, ToolModule};
use crate::workspace::WorkspaceStore;
use crate::{Error, Result};

/// Maximum search hits returned to the model
const SEARCH_RESULT_CAP: usize = 20;

const TEXT_EXTENSIONS: &[&str] = &[
    "md", "txt", "json", "js", "ts", "jsx", "tsx", "py", "rs", "toml", "html", "css", "yml",
    "yaml", "env", "gitignore",
];

const KEY_FILES: &[&str] = &[
    "README.md",
    "package.json",
    "requirements.txt",
    "Cargo.toml",
    ".env.example",
    "docker-compose.yml",
    ".gitignore",
];

/// Read, write, list and search files under the workspace root
pub struct FilesystemTools {
    workspace: WorkspaceStore,
}

impl FilesystemTools {
    pub fn new(workspace: WorkspaceStore) -> Self {
        Self { workspace }
    }

    async fn read_file(&self, args: Value) -> Result<Value> {
        let file_path = require_str(&args, "file_path")?;
        let max_lines = args.get("max_lines").and_then(Value::as_u64);
        let path = self.workspace.resolve(file_path)?;

        if !path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", file_path)));
        }

        let bytes = tokio::fs::read(&path).await?;
        let size_bytes = bytes.len();

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let preview: String = e
                    .as_bytes()
                    .iter()
                    .take(20)
                    .map(|b| format!("{:02x}", b))
                    .collect();
                return Ok(json!({
                    "file_path": file_path,
                    "file_type": "binary",
                    "size_bytes": size_bytes,
                    "preview": format!("Binary file: {}...", preview),
                }));
            }
        };

        let total_lines = text.lines().count();
        let (content, truncated) = match max_lines {
            Some(max) if (max as usize) < total_lines => (
                text.lines().take(max as usize).collect::<Vec<_>>().join("\n"),
                true,
            ),
            _ => (text, false),
        };

        Ok(json!({
            "file_path": file_path,
            "content": content,
            "truncated": truncated,
            "file_type": file_type(&path),
            "line_count": total_lines,
            "size_bytes": size_bytes,
        }))
    }

    async fn write_file(&self, args: Value) -> Result<Value> {
        let file_path = require_str(&args, "file_path")?;
        let content = require_str(&args, "content")?;
        let path = self.workspace.resolve(file_path)?;

        let existed = path.exists();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        debug!(file = %path.display(), bytes = content.len(), "Wrote file");
        Ok(json!({
            "file_path": file_path,
            "bytes_written": content.len(),
            "created": !existed,
        }))
    }

    async fn list_directory(&self, args: Value) -> Result<Value> {
        let dir_path = arg_str(&args, "dir_path").unwrap_or(".");
        let show_hidden = args
            .get("show_hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let path = self.workspace.resolve(dir_path)?;

        if !path.is_dir() {
            return Err(Error::NotFound(format!("Directory not found: {}", dir_path)));
        }

        let mut items = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !show_hidden && name.starts_with('.') {
                continue;
            }

            let file_type = entry.file_type().await?;
            let mut item = json!({
                "name": name,
                "type": if file_type.is_dir() { "directory" } else { "file" },
            });
            if file_type.is_file() {
                item["size_bytes"] = json!(entry.metadata().await?.len());
                item["file_type"] = json!(self::file_type(&entry.path()));
            }
            items.push(item);
        }
        items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let directories = items.iter().filter(|i| i["type"] == "directory").count();
        Ok(json!({
            "directory": dir_path,
            "total_items": items.len(),
            "directories": directories,
            "files": items.len() - directories,
            "items": items,
        }))
    }

    async fn create_directory(&self, args: Value) -> Result<Value> {
        let dir_path = require_str(&args, "dir_path")?;
        let path = self.workspace.resolve(dir_path)?;
        tokio::fs::create_dir_all(&path).await?;

        Ok(json!({
            "directory": dir_path,
            "created": true,
        }))
    }

    async fn search_files(&self, args: Value) -> Result<Value> {
        let query = require_str(&args, "query")?.to_lowercase();
        let extension = arg_str(&args, "file_extension").map(str::to_string);
        let root = self.search_root();

        let matches = tokio::task::spawn_blocking({
            let query = query.clone();
            move || {
                let mut matches = Vec::new();
                search_dir(&root, &root, &query, extension.as_deref(), &mut matches);
                matches
            }
        })
        .await
        .map_err(|e| Error::ToolExecution(format!("search task failed: {}", e)))?;

        let total = matches.len();
        Ok(json!({
            "query": query,
            "results": matches.into_iter().take(SEARCH_RESULT_CAP).collect::<Vec<_>>(),
            "total_matches": total,
        }))
    }

    async fn project_overview(&self) -> Result<Value> {
        let repo = self.workspace.repo_dir();
        let repo_present = repo.join(".git").exists();
        let root = self.search_root();

        let key_files: Map<String, Value> = KEY_FILES
            .iter()
            .map(|name| (name.to_string(), json!(root.join(name).exists())))
            .collect();

        let docs = self.workspace.docs_dir();
        let mut documentation_files = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&docs).await {
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "md") {
                    documentation_files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        documentation_files.sort();

        let mut overview = json!({
            "project_id": self.workspace.project_id(),
            "workspace_path": self.workspace.root(),
            "repository_status": if repo_present { "present" } else { "not_cloned" },
            "key_files": key_files,
            "documentation": {
                "readme_exists": repo.join("README.md").exists(),
                "docs_directory_exists": docs.is_dir(),
                "documentation_files": documentation_files,
            },
        });
        if repo_present {
            overview["tech_stack"] = json!(detect_tech_stack(&repo));
        }

        Ok(overview)
    }

    /// Cloned repository if present, else the whole workspace
    fn search_root(&self) -> PathBuf {
        let repo = self.workspace.repo_dir();
        if repo.join(".git").exists() {
            repo
        } else {
            self.workspace.root().to_path_buf()
        }
    }
}

impl ToolModule for FilesystemTools {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn capabilities(self: Arc<Self>) -> Vec<Capability> {
        vec![
            Capability::bound(
                &self,
                "read_file",
                "Read contents of a file in the project workspace",
                ParamSchema::new()
                    .required("file_path", ParamKind::String, "Path to the file to read")
                    .optional("max_lines", ParamKind::Integer, "Maximum lines to read"),
                |fs, args| async move { fs.read_file(args).await },
            ),
            Capability::bound(
                &self,
                "write_file",
                "Write content to a file (creates or overwrites)",
                ParamSchema::new()
                    .required("file_path", ParamKind::String, "Path to the file to write")
                    .required("content", ParamKind::String, "Content to write"),
                |fs, args| async move { fs.write_file(args).await },
            ),
            Capability::bound(
                &self,
                "list_directory",
                "List the contents of a workspace directory",
                ParamSchema::new()
                    .optional("dir_path", ParamKind::String, "Directory to list (default: root)")
                    .optional("show_hidden", ParamKind::Boolean, "Include dotfiles"),
                |fs, args| async move { fs.list_directory(args).await },
            ),
            Capability::bound(
                &self,
                "create_directory",
                "Create a directory (and missing parents)",
                ParamSchema::new().required("dir_path", ParamKind::String, "Directory to create"),
                |fs, args| async move { fs.create_directory(args).await },
            ),
            Capability::bound(
                &self,
                "search_files",
                "Search files by name or text content",
                ParamSchema::new()
                    .required("query", ParamKind::String, "Case-insensitive search text")
                    .optional("file_extension", ParamKind::String, "Only files ending with this"),
                |fs, args| async move { fs.search_files(args).await },
            ),
            Capability::bound(
                &self,
                "get_project_overview",
                "Overview of the project: repository status, key files, documentation",
                ParamSchema::new(),
                |fs, _args| async move { fs.project_overview().await },
            ),
        ]
    }
}

fn file_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" => "markdown",
        "txt" => "text",
        "json" => "json",
        "js" => "javascript",
        "ts" => "typescript",
        "jsx" => "react",
        "tsx" => "react_typescript",
        "py" => "python",
        "rs" => "rust",
        "toml" => "toml",
        "html" => "html",
        "css" => "css",
        "yml" | "yaml" => "yaml",
        "env" => "environment",
        _ => "unknown",
    }
}

fn is_text_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    TEXT_EXTENSIONS.contains(&ext.as_str())
}

fn search_dir(root: &Path, dir: &Path, query: &str, extension: Option<&str>, out: &mut Vec<Value>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        // Symlinks are never followed
        let Ok(kind) = entry.file_type() else { continue };

        if kind.is_dir() {
            if entry.file_name() != ".git" {
                search_dir(root, &path, query, extension, out);
            }
            continue;
        }
        if !kind.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if extension.is_some_and(|ext| !name.ends_with(ext)) {
            continue;
        }

        let match_type = if name.to_lowercase().contains(query) {
            Some("filename")
        } else if is_text_file(&path)
            && std::fs::read_to_string(&path)
                .map(|c| c.to_lowercase().contains(query))
                .unwrap_or(false)
        {
            Some("content")
        } else {
            None
        };

        if let Some(match_type) = match_type {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push(json!({
                "file": rel.to_string_lossy(),
                "match_type": match_type,
                "file_type": file_type(&path),
            }));
        }
    }
}

fn detect_tech_stack(repo: &Path) -> Vec<&'static str> {
    let mut stack = Vec::new();

    if let Ok(content) = std::fs::read_to_string(repo.join("package.json")) {
        stack.push("Node.js");
        if let Ok(pkg) = serde_json::from_str::<Value>(&content) {
            let has = |dep: &str| {
                ["dependencies", "devDependencies"]
                    .iter()
                    .any(|section| pkg[section].get(dep).is_some())
            };
            if has("next") {
                stack.push("Next.js");
            } else if has("react") {
                stack.push("React");
            }
            if has("typescript") {
                stack.push("TypeScript");
            }
        }
    }
    if repo.join("requirements.txt").exists() || repo.join("pyproject.toml").exists() {
        stack.push("Python");
    }
    if repo.join("Cargo.toml").exists() {
        stack.push("Rust");
    }
    if repo.join("go.mod").exists() {
        stack.push("Go");
    }

    stack
}
