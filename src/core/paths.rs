//! Shared path manipulation utilities.

use std::env;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use chrono::{Datelike, Months, NaiveDate};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Coerce an OS string into valid UTF-8 text.
///
/// Valid UTF-8 passes through untouched. Anything else is read as Latin-1, one
/// char per byte, which keeps the mapping lossless and stable between scans.
pub fn coerce_utf8(raw: &OsStr) -> String {
    if let Some(text) = raw.to_str() {
        return text.to_string();
    }
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt as _;
        raw.as_bytes().iter().map(|&b| char::from(b)).collect()
    }
    #[cfg(not(unix))]
    {
        raw.to_string_lossy().into_owned()
    }
}

/// Encode a discovered path into the form stored in the record table.
///
/// Paths under `base` are stored relative to it; everything else keeps its
/// absolute form. Separators are normalized to `/`.
pub fn encode_record_path(path: &Path, base: Option<&Path>) -> String {
    let relative = base
        .and_then(|base| path.strip_prefix(base).ok())
        .filter(|rel| !rel.as_os_str().is_empty());
    let chosen = relative.unwrap_or(path);
    coerce_utf8(chosen.as_os_str()).replace('\\', "/")
}

/// Reverse of [`encode_record_path`] for paths that were valid UTF-8.
pub fn decode_record_path(stored: &str, base: Option<&Path>) -> PathBuf {
    let path = Path::new(stored);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

/// Drop duplicate roots and roots nested inside another configured root.
///
/// Keeps the caller's order for the survivors: when a later root contains an
/// earlier one, the later root takes the earlier one's slot.
pub fn prune_nested_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for root in roots {
        if result.iter().any(|kept| root.starts_with(kept)) {
            continue;
        }
        match result.iter().position(|kept| kept.starts_with(&root)) {
            Some(slot) => {
                result[slot] = root.clone();
                let mut idx = 0;
                result.retain(|kept| {
                    let keep = idx == slot || !kept.starts_with(&root);
                    idx += 1;
                    keep
                });
            }
            None => result.push(root),
        }
    }

    result
}

/// `<uploads>/YYYY/MM` for the month of `today` and the month before it.
pub fn dated_upload_dirs(uploads: &Path, today: NaiveDate) -> Vec<PathBuf> {
    let month_dir = |date: NaiveDate| {
        uploads
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
    };

    let mut dirs = vec![month_dir(today)];
    if let Some(previous) = today.checked_sub_months(Months::new(1)) {
        dirs.push(month_dir(previous));
    }
    dirs
}
