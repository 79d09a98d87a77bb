//! Save-path construction and filename conflict resolution

use std::path::{Path, PathBuf};

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::current_timestamp;

/// How to handle a filename collision on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// `photo.jpg` becomes `photo (1).jpg`, `photo (2).jpg`, ...
    #[default]
    AutoRename,
    Overwrite,
    /// Drop the file; its chunks are consumed and discarded.
    Skip,
    /// Surface the conflict and wait for a per-file decision.
    Ask,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictResolution::AutoRename => "auto_rename",
            ConflictResolution::Overwrite => "overwrite",
            ConflictResolution::Skip => "skip",
            ConflictResolution::Ask => "ask",
        }
    }
}

/// Outcome of resolving one file's save path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDecision {
    /// Write to this path.
    Write(PathBuf),
    /// Discard the file's bytes.
    Skip,
    /// Wait for the caller to decide; the proposed path had a conflict.
    AskCaller(PathBuf),
}

/// Turn a wire-relative path into a safe path under `base`.
///
/// Rejects absolute paths, backslashes, `..` segments and empty input; a
/// forward-slash path maps onto the local separator.
pub fn sanitize_relative_path(relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(Error::new(ErrorKind::InvalidArgument, "empty relative path"));
    }
    if relative.starts_with('/') || relative.contains('\\') {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("unsafe path: {}", relative),
        ));
    }
    let mut out = PathBuf::new();
    for segment in relative.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("unsafe path segment in: {}", relative),
            ));
        }
        out.push(segment);
    }
    Ok(out)
}

/// Generate `name (n).ext` until an unused name is found; falls back to a
/// timestamp suffix after 10 000 tries.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    for n in 1..10_000 {
        let name = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }

    let name = match ext {
        Some(ext) => format!("{}_{}.{}", stem, current_timestamp(), ext),
        None => format!("{}_{}", stem, current_timestamp()),
    };
    parent.join(name)
}

/// Resolve where (and whether) to write an incoming file.
pub fn resolve_save_path(
    base: &Path,
    relative: &str,
    policy: ConflictResolution,
) -> Result<PathDecision> {
    let target = base.join(sanitize_relative_path(relative)?);

    if !target.exists() {
        return Ok(PathDecision::Write(target));
    }

    Ok(match policy {
        ConflictResolution::AutoRename => PathDecision::Write(unique_path(&target)),
        ConflictResolution::Overwrite => PathDecision::Write(target),
        ConflictResolution::Skip => PathDecision::Skip,
        ConflictResolution::Ask => PathDecision::AskCaller(target),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sanitize_accepts_nested() {
        assert_eq!(
            sanitize_relative_path("photos/2024/beach.jpg").unwrap(),
            PathBuf::from("photos").join("2024").join("beach.jpg")
        );
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        for bad in ["../x", "a/../b", "/etc/passwd", "a\\b", "", "a//b", "./x"] {
            assert!(
                sanitize_relative_path(bad).is_err(),
                "should reject: {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_unique_path_no_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.txt");
        assert_eq!(unique_path(&path), path);
    }

    #[test]
    fn test_unique_path_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"x").unwrap();

        let first = unique_path(&path);
        assert_eq!(first, dir.path().join("photo (1).jpg"));

        fs::write(&first, b"x").unwrap();
        let second = unique_path(&path);
        assert_eq!(second, dir.path().join("photo (2).jpg"));
    }

    #[test]
    fn test_unique_path_no_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, b"x").unwrap();
        assert_eq!(unique_path(&path), dir.path().join("README (1)"));
    }

    #[test]
    fn test_resolve_policies() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("doc.pdf");
        fs::write(&existing, b"x").unwrap();

        match resolve_save_path(dir.path(), "doc.pdf", ConflictResolution::AutoRename).unwrap() {
            PathDecision::Write(p) => assert_eq!(p, dir.path().join("doc (1).pdf")),
            other => panic!("unexpected: {:?}", other),
        }

        assert_eq!(
            resolve_save_path(dir.path(), "doc.pdf", ConflictResolution::Overwrite).unwrap(),
            PathDecision::Write(existing.clone())
        );

        assert_eq!(
            resolve_save_path(dir.path(), "doc.pdf", ConflictResolution::Skip).unwrap(),
            PathDecision::Skip
        );

        assert_eq!(
            resolve_save_path(dir.path(), "doc.pdf", ConflictResolution::Ask).unwrap(),
            PathDecision::AskCaller(existing)
        );
    }

    #[test]
    fn test_resolve_fresh_file_ignores_policy() {
        let dir = tempfile::tempdir().unwrap();
        for policy in [
            ConflictResolution::AutoRename,
            ConflictResolution::Overwrite,
            ConflictResolution::Skip,
            ConflictResolution::Ask,
        ] {
            match resolve_save_path(dir.path(), "new.txt", policy).unwrap() {
                PathDecision::Write(p) => assert_eq!(p, dir.path().join("new.txt")),
                other => panic!("fresh file should write under {:?}: {:?}", policy, other),
            }
        }
    }
}
