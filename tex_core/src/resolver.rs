//! Duplicate Resolver
//!
//! Textures are often exported several times with the same name in different
//! formats (`wood_2K_diff.jpg`, `wood_2K_diff.exr`). Converting all of them
//! would write the same output twice, so every group sharing directory and
//! base name is reduced to one member chosen by an extension priority list.
//!
//! The priority list is ascending: the later an extension appears, the more
//! it is preferred. A group in which no member's extension is listed cannot
//! be ranked and is kept whole.

use crate::common_utils::get_extension_lowercase;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What happened to one group of two or more same-named assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// One member kept, every other member dropped.
    Resolved {
        key: PathBuf,
        kept: PathBuf,
        dropped: Vec<PathBuf>,
    },
    /// No member's extension is in the priority list; nothing dropped.
    Unranked { key: PathBuf, members: Vec<PathBuf> },
}

impl GroupOutcome {
    pub fn key(&self) -> &Path {
        match self {
            GroupOutcome::Resolved { key, .. } | GroupOutcome::Unranked { key, .. } => key,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, GroupOutcome::Resolved { .. })
    }
}

/// Result of resolving a scanned asset set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Surviving assets in sorted path order.
    pub kept: Vec<PathBuf>,
    /// One entry per group that had two or more members.
    pub groups: Vec<GroupOutcome>,
}

impl Resolution {
    pub fn dropped_count(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match g {
                GroupOutcome::Resolved { dropped, .. } => dropped.len(),
                GroupOutcome::Unranked { .. } => 0,
            })
            .sum()
    }

    pub fn unranked_count(&self) -> usize {
        self.groups.iter().filter(|g| !g.is_resolved()).count()
    }
}

/// Grouping key: directory plus file name without its last extension.
pub fn duplicate_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_stem()) {
        (Some(parent), Some(stem)) => parent.join(stem),
        _ => path.to_path_buf(),
    }
}

/// Picks the member to keep, or `None` when no member can be ranked.
///
/// Scans the priority list in order and remembers the last member whose
/// extension matches; `members` must be sorted for the choice to be stable.
pub fn pick_preferred<'a>(members: &'a [PathBuf], priority: &[String]) -> Option<&'a PathBuf> {
    let exts: Vec<String> = members.iter().map(|m| get_extension_lowercase(m)).collect();
    let mut keep = None;
    for wanted in priority {
        for (member, ext) in members.iter().zip(&exts) {
            if ext == wanted {
                keep = Some(member);
            }
        }
    }
    keep
}

/// Reduces `assets` to at most one member per duplicate group.
///
/// The output only depends on the set of input paths, never on their order.
pub fn resolve_duplicates<I>(assets: I, priority: &[String]) -> Resolution
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for asset in assets {
        groups.entry(duplicate_key(&asset)).or_default().push(asset);
    }

    let mut resolution = Resolution::default();
    for (key, mut members) in groups {
        members.sort();
        members.dedup();

        if members.len() == 1 {
            resolution.kept.append(&mut members);
            continue;
        }

        match pick_preferred(&members, priority).cloned() {
            Some(kept) => {
                let dropped: Vec<PathBuf> = members.into_iter().filter(|m| *m != kept).collect();
                debug!(
                    kept = %kept.display(),
                    dropped = dropped.len(),
                    "Resolved duplicate group"
                );
                resolution.kept.push(kept.clone());
                resolution.groups.push(GroupOutcome::Resolved { key, kept, dropped });
            }
            None => {
                info!(
                    group = %key.display(),
                    members = members.len(),
                    "Duplicate group has no ranked extension, keeping every member"
                );
                resolution.kept.extend(members.iter().cloned());
                resolution.groups.push(GroupOutcome::Unranked { key, members });
            }
        }
    }

    resolution.kept.sort();
    resolution
}
