//! Common Utilities Module
//!
//! Small path and string helpers shared by the scanner, the resolver and the
//! worker pool:
//! - extension / suffix handling (always case-insensitive)
//! - lexical path normalisation (`.` / `..` / separators)
//! - command line formatting for logs

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

// ═══════════════════════════════════════════════════════════════
// Extensions & suffixes
// ═══════════════════════════════════════════════════════════════

/// Lower-cased extension of `path` without the dot, or an empty string.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use tex_core::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("wood_2K_diff.JPG")), "jpg");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Normalises a user supplied extension or suffix to `".ext"` lower case.
///
/// `"JPG"`, `".jpg"` and `" .Jpg "` all become `".jpg"`.
pub fn normalize_suffix(suffix: &str) -> String {
    let trimmed = suffix.trim().to_lowercase();
    if trimmed.is_empty() || trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{}", trimmed)
    }
}

/// Normalises a priority-list entry to a bare lower-case extension (`"exr"`).
pub fn normalize_priority_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Returns true when the file name of `path` ends with one of `suffixes`.
///
/// `suffixes` must already be lower case (see [`normalize_suffix`]); the file
/// name is lower-cased before comparison. Names that are not valid UTF-8 are
/// compared lossily, so an undecodable stem still matches on its extension.
pub fn has_suffix(path: &Path, suffixes: &[String]) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_lowercase(),
        None => return false,
    };
    suffixes.iter().any(|s| !s.is_empty() && name.ends_with(s.as_str()))
}

// ═══════════════════════════════════════════════════════════════
// Paths
// ═══════════════════════════════════════════════════════════════

/// Lexically normalises a path: drops `.` components, folds `..` into the
/// preceding component and rebuilds with the platform separator.
///
/// Symlinks are not resolved and the filesystem is not touched.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = match out.components().next_back() {
                    Some(Component::Normal(_)) => out.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Normalises `path` and anchors it to the current directory when relative.
pub fn absolute_normalized(path: &Path) -> PathBuf {
    let anchored = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_path(&anchored)
}

/// Splits a delimited roots string on the literal `separator`, trimming each
/// segment and dropping blanks.
///
/// # Examples
/// ```
/// use tex_core::common_utils::split_roots;
///
/// assert_eq!(split_roots("/tex/b////tex/a", "///"), vec!["/tex/b", "/tex/a"]);
/// assert_eq!(split_roots("/tex/a /// /tex/b", " /// "), vec!["/tex/a", "/tex/b"]);
/// ```
pub fn split_roots<'a>(roots: &'a str, separator: &str) -> Vec<&'a str> {
    let segments: Vec<&str> = if separator.is_empty() {
        vec![roots]
    } else {
        roots.split(separator).collect()
    };
    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════

/// Formats an argument vector as a single space-joined line for logs.
pub fn format_command_line<S: AsRef<OsStr>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| a.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns true when `executable` can be found on `PATH`.
pub fn is_command_available(executable: &str) -> bool {
    which::which(executable).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_extension_lowercase() {
        assert_eq!(get_extension_lowercase(Path::new("a.EXR")), "exr");
        assert_eq!(get_extension_lowercase(Path::new("/x/y/b.tiff")), "tiff");
        assert_eq!(get_extension_lowercase(Path::new("/x/.hidden")), "");
    }

    #[test]
    fn test_normalize_suffix() {
        assert_eq!(normalize_suffix("JPG"), ".jpg");
        assert_eq!(normalize_suffix(".Exr"), ".exr");
        assert_eq!(normalize_suffix("  .png "), ".png");
        assert_eq!(normalize_suffix(""), "");
    }

    #[test]
    fn test_has_suffix_case_insensitive() {
        let suffixes = vec![".jpg".to_string(), ".exr".to_string()];
        assert!(has_suffix(Path::new("/t/WOOD.JPG"), &suffixes));
        assert!(has_suffix(Path::new("/t/wood.exr"), &suffixes));
        assert!(!has_suffix(Path::new("/t/wood.png"), &suffixes));
        assert!(!has_suffix(Path::new("/t/jpg"), &suffixes));
    }

    #[cfg(unix)]
    #[test]
    fn test_has_suffix_non_utf8_name() {
        use std::os::unix::ffi::OsStrExt;
        let suffixes = vec![".jpg".to_string()];
        let path = Path::new(OsStr::from_bytes(b"/t/w\xffod_2K.JPG"));
        assert!(has_suffix(path, &suffixes));
        let path = Path::new(OsStr::from_bytes(b"/t/w\xffod_2K.png"));
        assert!(!has_suffix(path, &suffixes));
    }

    #[test]
    fn test_has_suffix_ignores_empty_entries() {
        let suffixes = vec![String::new()];
        assert!(!has_suffix(Path::new("/t/anything.png"), &suffixes));
    }

    #[cfg(unix)]
    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/tex/./a/../b")), PathBuf::from("/tex/b"));
        assert_eq!(normalize_path(Path::new("/tex//a/")), PathBuf::from("/tex/a"));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_absolute_normalized_is_absolute() {
        assert!(absolute_normalized(Path::new("some/rel/dir")).is_absolute());
    }

    #[test]
    fn test_split_roots() {
        assert_eq!(split_roots("", "///"), Vec::<&str>::new());
        assert_eq!(split_roots("   ", "///"), Vec::<&str>::new());
        assert_eq!(split_roots("/a", "///"), vec!["/a"]);
        assert_eq!(split_roots("/a////b", "///"), vec!["/a", "/b"]);
        assert_eq!(split_roots("/a /// /b ///", "///"), vec!["/a", "/b"]);
        assert_eq!(split_roots("/a /// /b", " /// "), vec!["/a", "/b"]);
        assert_eq!(split_roots("/a /// /b", ""), vec!["/a /// /b"]);
    }

    #[test]
    fn test_format_command_line() {
        assert_eq!(
            format_command_line(&["maketx", "-u", "in.png", "-o", "in.tx"]),
            "maketx -u in.png -o in.tx"
        );
        assert_eq!(format_command_line::<&str>(&[]), "");
    }

    #[test]
    fn test_is_command_available() {
        #[cfg(unix)]
        assert!(is_command_available("sh"));
        assert!(!is_command_available("nonexistent_command_xyz_123"));
    }
}
