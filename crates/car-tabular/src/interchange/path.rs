//! Confinement of conversion paths to a safe root

use std::path::{Component, Path, PathBuf};

use crate::error::{InterchangeError, Result};

/// Rejects archive and Parquet paths that resolve outside a root directory
///
/// Paths are resolved without touching the target: made absolute against the
/// current directory, `.` and `..` folded lexically, then the deepest existing
/// ancestor is canonicalized so symlinks cannot lead out of the root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Guard rooted at `safe_root`, or the current directory when `None`
    ///
    /// The root need not exist yet.
    pub fn new(safe_root: Option<&Path>) -> Result<Self> {
        let root = match safe_root {
            Some(root) => absolutize(root)?,
            None => std::env::current_dir().map_err(InterchangeError::io)?,
        };
        let root = resolve(&normalize(&root)).ok_or_else(|| {
            InterchangeError::path_security(&root, &root)
                .with_help("the safe root passes through a dangling symlink")
        })?;
        Ok(Self { root })
    }

    /// Canonical safe root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path`, failing with `PathSecurity` if it escapes the root
    ///
    /// Returns the resolved location, which is where I/O should happen.
    pub fn check(&self, path: &Path) -> Result<PathBuf> {
        let absolute = normalize(&absolutize(path)?);
        match resolve(&absolute) {
            Some(resolved) if resolved.starts_with(&self.root) => Ok(resolved),
            _ => {
                tracing::warn!(
                    path = %path.display(),
                    root = %self.root.display(),
                    "rejected path outside safe root"
                );
                Err(InterchangeError::path_security(path, &self.root))
            }
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .map_err(InterchangeError::io)?
            .join(path))
    }
}

/// Fold `.` and `..` without consulting the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component)
            }
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-append the rest
///
/// `None` if an ancestor exists but cannot be resolved (a dangling symlink).
fn resolve(absolute: &Path) -> Option<PathBuf> {
    for ancestor in absolute.ancestors() {
        match std::fs::canonicalize(ancestor) {
            Ok(canonical) => {
                let rest = absolute.strip_prefix(ancestor).ok()?;
                return Some(if rest.as_os_str().is_empty() {
                    canonical
                } else {
                    canonical.join(rest)
                });
            }
            Err(_) if std::fs::symlink_metadata(ancestor).is_ok() => return None,
            Err(_) => continue,
        }
    }
    Some(absolute.to_path_buf())
}
