//! Workspace path validation.
//!
//! Every workspace is checked before a sandbox is created for it. This
//! blocks mounting or executing inside system directories and, when a
//! workspace root is configured, confines all workspaces to it.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{PoolError, Result};

/// System directories a workspace must not live under.
const BLOCKED_TREES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/dev", "/proc", "/sys", "/root", "/var",
];

/// Safe subtrees under otherwise-blocked directories. macOS canonicalises
/// `/var` to `/private/var`, so both forms are listed.
const ALLOWED_SUBTREES: &[&str] = &[
    "/var/folders",
    "/var/tmp",
    "/private/var/folders",
    "/private/var/tmp",
];

/// Validate a workspace path, returning its canonical form.
///
/// Rules:
/// - the filesystem root itself is rejected
/// - paths under system trees are rejected, except the per-user temp
///   areas under `/var`
/// - if `allowed_root` is set, the canonical path must lie within it
pub fn validate_workspace(workspace: &Path, allowed_root: Option<&Path>) -> Result<PathBuf> {
    let canonical = canonicalize_lenient(workspace);

    if canonical == Path::new("/") {
        return Err(rejected(&canonical, "cannot use the filesystem root"));
    }

    let under_allowed_subtree = ALLOWED_SUBTREES
        .iter()
        .any(|allowed| canonical.starts_with(allowed));

    if !under_allowed_subtree {
        for blocked in BLOCKED_TREES {
            let literal = PathBuf::from(blocked);
            let resolved = std::fs::canonicalize(blocked).unwrap_or_else(|_| literal.clone());
            if canonical.starts_with(&literal) || canonical.starts_with(&resolved) {
                return Err(rejected(
                    &canonical,
                    &format!("inside system directory {}", blocked),
                ));
            }
        }
    }

    if let Some(root) = allowed_root {
        let root = canonicalize_lenient(root);
        if !canonical.starts_with(&root) {
            return Err(rejected(
                &canonical,
                &format!("outside allowed root {}", root.display()),
            ));
        }
    }

    Ok(canonical)
}

fn rejected(path: &Path, reason: &str) -> PoolError {
    warn!(path = %path.display(), reason = %reason, "Workspace path rejected");
    PoolError::WorkspaceRejected {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Resolve symlinks and relative components without requiring the full
/// path to exist. Sandboxes create missing workspace directories at
/// start, so validation has to handle not-yet-created leaves: the
/// deepest existing ancestor is canonicalised and the remaining
/// components are appended after lexical normalisation.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    let mut existing = normalized.clone();
    let mut missing = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                missing.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    resolved
}
