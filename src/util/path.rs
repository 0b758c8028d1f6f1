//! Path normalization utilities.

use std::path::{Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Lower-cased extension of a path, empty string when absent.
#[inline]
pub fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_survives_missing_file() {
        let p = Path::new("/definitely/not/here.sm");
        assert_eq!(normalize_path(p), p.to_path_buf());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_lower(Path::new("a/b/Page.HTML")), "html");
        assert_eq!(extension_lower(Path::new("a/b/noext")), "");
    }
}
