//! Asset Scanner
//!
//! Walks one or more root directories and collects texture files whose name
//! ends with an accepted suffix. Roots that are missing or cannot be listed
//! are recorded in `skipped_roots`; they never abort the scan.

use crate::common_utils::{absolute_normalized, has_suffix, normalize_suffix, split_roots};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of one scan over every supplied root.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Matching files, absolute and normalised. Overlapping roots collapse here.
    pub assets: BTreeSet<PathBuf>,
    /// Roots that were walked.
    pub roots: Vec<PathBuf>,
    /// Roots that contributed nothing because they could not be walked.
    pub skipped_roots: Vec<(PathBuf, String)>,
    /// Entries below a readable root that could not be read.
    pub walk_errors: usize,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Expands every root string on `separator` and normalises each segment.
///
/// Order is preserved and repeated roots are kept once.
pub fn expand_roots<S: AsRef<str>>(roots: &[S], separator: &str) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut expanded = Vec::new();
    for root in roots {
        for segment in split_roots(root.as_ref(), separator) {
            let path = absolute_normalized(Path::new(segment));
            if seen.insert(path.clone()) {
                expanded.push(path);
            }
        }
    }
    expanded
}

/// Scans `roots` (each possibly holding several `separator`-joined paths)
/// for files ending with one of `suffixes` (case-insensitive).
pub fn scan_roots<S: AsRef<str>>(roots: &[S], separator: &str, suffixes: &[String]) -> ScanResult {
    let suffixes: Vec<String> = suffixes
        .iter()
        .map(|s| normalize_suffix(s))
        .filter(|s| !s.is_empty())
        .collect();

    let mut result = ScanResult::default();
    for root in expand_roots(roots, separator) {
        if !root.is_dir() {
            warn!(root = %root.display(), "Root is not a readable directory, skipping");
            result
                .skipped_roots
                .push((root, "not a readable directory".to_string()));
            continue;
        }
        if let Err(e) = fs::read_dir(&root) {
            warn!(root = %root.display(), error = %e, "Failed to read root, skipping");
            result.skipped_roots.push((root, e.to_string()));
            continue;
        }
        let before = result.assets.len();
        match collect_into(&root, &suffixes, &mut result) {
            Some(reason) => result.skipped_roots.push((root, reason)),
            None => {
                debug!(
                    root = %root.display(),
                    found = result.assets.len() - before,
                    "Scanned root"
                );
                result.roots.push(root);
            }
        }
    }
    result
}

/// Walks `root` into `result`. Returns the error text when the root itself
/// could not be listed.
fn collect_into(root: &Path, suffixes: &[String], result: &mut ScanResult) -> Option<String> {
    let mut root_error = None;
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                warn!(root = %root.display(), error = %e, "Failed to read root");
                root_error = Some(e.to_string());
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                result.walk_errors += 1;
                continue;
            }
        };
        if entry.file_type().is_file() && has_suffix(entry.path(), suffixes) {
            result.assets.insert(entry.into_path());
        }
    }
    root_error
}
