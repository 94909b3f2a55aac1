//! Path normalization and the workspace boundary check

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Lexically normalize a path, folding `.` and `..` without touching the filesystem.
///
/// `..` at the filesystem root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Symlink hops followed before a path is rejected as a loop
const MAX_LINK_HOPS: usize = 40;

/// Resolve `input` against `root` and reject anything that lands outside it.
///
/// `root` must already be canonical. Relative input is joined onto the root,
/// absolute input is taken as-is. After lexical normalization every existing
/// component is checked for symlinks, dangling ones included, and each link
/// target must stay inside the root as well.
pub fn resolve_within(root: &Path, input: &Path) -> Result<PathBuf> {
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let normalized = normalize(&joined);

    if !normalized.starts_with(root) {
        return Err(Error::WorkspaceSecurity(format!(
            "Path '{}' is outside workspace boundaries",
            input.display()
        )));
    }

    follow_links(root, normalized, input, 0)
}

/// Walk `path` below `root` one component at a time, following links
fn follow_links(root: &Path, path: PathBuf, input: &Path, hops: usize) -> Result<PathBuf> {
    let rel = path.strip_prefix(root).map_err(|_| escape(input))?;
    let parts: Vec<&OsStr> = rel.iter().collect();

    let mut current = root.to_path_buf();
    for (i, part) in parts.iter().enumerate() {
        let candidate = current.join(part);
        let meta = match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            // Nothing below a missing component can be a link
            Err(_) => {
                current = candidate;
                for rest in &parts[i + 1..] {
                    current.push(rest);
                }
                return Ok(current);
            }
        };

        if !meta.file_type().is_symlink() {
            current = candidate;
            continue;
        }

        if hops >= MAX_LINK_HOPS {
            return Err(Error::WorkspaceSecurity(format!(
                "Too many symlinks resolving '{}'",
                input.display()
            )));
        }

        let target = std::fs::read_link(&candidate).map_err(|e| {
            Error::WorkspaceSecurity(format!("Failed to resolve '{}': {}", input.display(), e))
        })?;
        let mut next = normalize(&current.join(target));
        for rest in &parts[i + 1..] {
            next.push(rest);
        }
        if !next.starts_with(root) {
            return Err(escape(input));
        }
        return follow_links(root, next, input, hops + 1);
    }

    Ok(current)
}

fn escape(input: &Path) -> Error {
    Error::WorkspaceSecurity(format!(
        "Path '{}' escapes the workspace through a link",
        input.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_resolve_accepts_nested_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let resolved = resolve_within(&root, Path::new("docs/new/file.md")).unwrap();
        assert_eq!(resolved, root.join("docs/new/file.md"));

        let resolved = resolve_within(&root, Path::new("docs/../README.md")).unwrap();
        assert_eq!(resolved, root.join("README.md"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        for bad in ["../../etc/passwd", "docs/../../x", "/etc/passwd", ".."] {
            let err = resolve_within(&root, Path::new(bad)).unwrap_err();
            assert!(matches!(err, Error::WorkspaceSecurity(_)), "{}", bad);
        }
    }

    #[test]
    fn test_resolve_accepts_absolute_inside() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let inside = root.join("memory/ceo");

        assert_eq!(resolve_within(&root, &inside).unwrap(), inside);
        assert_eq!(resolve_within(&root, Path::new(".")).unwrap(), root);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let err = resolve_within(&root, Path::new("link/secret.txt")).unwrap_err();
        assert!(matches!(err, Error::WorkspaceSecurity(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("repo")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("pwned.txt"), root.join("repo/link"))
            .unwrap();
        std::os::unix::fs::symlink("../../../elsewhere", root.join("repo/relative")).unwrap();

        for bad in ["repo/link", "repo/relative", "repo/relative/deeper.txt"] {
            let err = resolve_within(&root, Path::new(bad)).unwrap_err();
            assert!(matches!(err, Error::WorkspaceSecurity(_)), "{}", bad);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_links_that_stay_inside() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir(root.join("docs")).unwrap();
        std::os::unix::fs::symlink("docs", root.join("alias")).unwrap();
        std::os::unix::fs::symlink("missing.md", root.join("docs/pending")).unwrap();
        std::os::unix::fs::symlink("loop", root.join("loop")).unwrap();

        assert_eq!(
            resolve_within(&root, Path::new("alias/plan.md")).unwrap(),
            root.join("docs/plan.md")
        );
        assert_eq!(
            resolve_within(&root, Path::new("alias/pending")).unwrap(),
            root.join("docs/missing.md")
        );
        tokio_test::assert_err!(resolve_within(&root, Path::new("loop")));
    }
}
