//! Path confinement.
//!
//! [`safe_join`] resolves a user-supplied path against a base directory and
//! refuses anything that lands outside it. Normalization is purely lexical:
//! symlinks inside `base` are not resolved, so a link pointing elsewhere is
//! not detected.

use std::path::{Component, Path, PathBuf};

use crate::error::{PrepareError, PrepareResult};

/// Join `relative` onto `base`, rejecting any result outside `base`.
///
/// `base` must be absolute. `relative` may be absolute, in which case it is
/// accepted only if it already lies under `base`. The returned path is
/// normalized (no `.` or `..` components).
pub fn safe_join(base: &Path, relative: &str) -> PrepareResult<PathBuf> {
    if !base.is_absolute() {
        return Err(PrepareError::InvalidPath(base.display().to_string()));
    }
    let base = normalize(base);

    let candidate = Path::new(relative);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let resolved = normalize_confined(&joined).ok_or_else(|| traversal(&base, relative))?;
    if !resolved.starts_with(&base) {
        return Err(traversal(&base, relative));
    }
    Ok(resolved)
}

fn traversal(base: &Path, relative: &str) -> PrepareError {
    tracing::warn!(
        base = %base.display(),
        relative,
        "rejected path escaping its base directory"
    );
    PrepareError::PathTraversal {
        base: base.to_path_buf(),
        relative: relative.to_string(),
    }
}

/// Lexically normalize an absolute path, clamping `..` at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Like [`normalize`], but returns `None` when `..` would climb above the
/// filesystem root.
fn normalize_confined(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}
