//! Format Registry
//!
//! Output conversion commands available to the dispatcher. Each command is a
//! display name, the executable it needs on `PATH`, and a pure function that
//! turns one input texture path into an argument vector, or into
//! [`CommandPlan::Skip`] when the file needs no conversion.
//!
//! The built-in commands live in one literal table ([`BUILTIN_COMMANDS`]);
//! [`FormatRegistry::detect`] keeps the entries whose executable is present.

use crate::common_utils::is_command_available;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// What a command wants done with one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPlan {
    /// Program followed by its arguments.
    Run(Vec<OsString>),
    /// No conversion needed for this file.
    Skip,
}

pub type BuildFn = dyn Fn(&Path) -> CommandPlan + Send + Sync;

/// One output format the user can pick.
#[derive(Clone)]
pub struct ConversionCommand {
    name: String,
    executable: String,
    build: Arc<BuildFn>,
}

impl ConversionCommand {
    pub fn new<F>(name: impl Into<String>, executable: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Path) -> CommandPlan + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            executable: executable.into(),
            build: Arc::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// Maps an input path to its plan. Pure; safe to call from any worker.
    pub fn plan(&self, texture_in: &Path) -> CommandPlan {
        (self.build)(texture_in)
    }

    pub fn is_available(&self) -> bool {
        is_command_available(&self.executable)
    }
}

impl fmt::Debug for ConversionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionCommand")
            .field("name", &self.name)
            .field("executable", &self.executable)
            .finish_non_exhaustive()
    }
}

/// Static description of a built-in command.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinCommand {
    pub name: &'static str,
    pub executable: &'static str,
    pub build: fn(&Path) -> CommandPlan,
}

impl From<&BuiltinCommand> for ConversionCommand {
    fn from(builtin: &BuiltinCommand) -> Self {
        ConversionCommand::new(builtin.name, builtin.executable, builtin.build)
    }
}

pub const BUILTIN_COMMANDS: &[BuiltinCommand] = &[
    BuiltinCommand {
        name: "RAT (Mantra)",
        executable: "iconvert",
        build: rat_command,
    },
    BuiltinCommand {
        name: "TX (PRMan)",
        executable: "maketx",
        build: tx_prman_command,
    },
    BuiltinCommand {
        name: "TX (Arnold)",
        executable: "maketx",
        build: tx_arnold_command,
    },
    BuiltinCommand {
        name: "RSTEXBIN (Redshift, skip converted)",
        executable: "redshiftTextureProcessor",
        build: redshift_command,
    },
    BuiltinCommand {
        name: "RSTEXBIN (Redshift, overwrite converted)",
        executable: "redshiftTextureProcessor",
        build: redshift_noskip_command,
    },
    BuiltinCommand {
        name: "TIFF (dcraw, linear, ACES2065-1)",
        executable: "dcraw",
        build: dcraw_command,
    },
    BuiltinCommand {
        name: "Resize (1K, box, skip converted)",
        executable: "oiiotool",
        build: resize_1k_command,
    },
    BuiltinCommand {
        name: "Resize (2K, box, skip converted)",
        executable: "oiiotool",
        build: resize_2k_command,
    },
    BuiltinCommand {
        name: "Resize (4K, box, skip converted)",
        executable: "oiiotool",
        build: resize_4k_command,
    },
];

// ═══════════════════════════════════════════════════════════════
// Argument builders
// ═══════════════════════════════════════════════════════════════

fn argv<I, S>(parts: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    parts.into_iter().map(|p| p.as_ref().to_os_string()).collect()
}

fn rat_command(texture_in: &Path) -> CommandPlan {
    let texture_out = texture_in.with_extension("rat");
    CommandPlan::Run(argv([
        OsStr::new("iconvert"),
        texture_in.as_os_str(),
        texture_out.as_os_str(),
    ]))
}

fn maketx_command(texture_in: &Path, flavour: &str) -> CommandPlan {
    let texture_out = texture_in.with_extension("tx");
    CommandPlan::Run(argv([
        OsStr::new("maketx"),
        OsStr::new("-u"),
        OsStr::new(flavour),
        OsStr::new("--checknan"),
        OsStr::new("--filter"),
        OsStr::new("lanczos3"),
        texture_in.as_os_str(),
        OsStr::new("-o"),
        texture_out.as_os_str(),
    ]))
}

fn tx_prman_command(texture_in: &Path) -> CommandPlan {
    maketx_command(texture_in, "--prman")
}

fn tx_arnold_command(texture_in: &Path) -> CommandPlan {
    maketx_command(texture_in, "--oiio")
}

fn redshift_command(texture_in: &Path) -> CommandPlan {
    CommandPlan::Run(argv([
        OsStr::new("redshiftTextureProcessor"),
        texture_in.as_os_str(),
    ]))
}

fn redshift_noskip_command(texture_in: &Path) -> CommandPlan {
    CommandPlan::Run(argv([
        OsStr::new("redshiftTextureProcessor"),
        texture_in.as_os_str(),
        OsStr::new("-noskip"),
    ]))
}

fn dcraw_command(texture_in: &Path) -> CommandPlan {
    CommandPlan::Run(argv([
        OsStr::new("dcraw"),
        OsStr::new("-4"),
        OsStr::new("-T"),
        OsStr::new("-v"),
        OsStr::new("-o"),
        OsStr::new("6"),
        texture_in.as_os_str(),
    ]))
}

fn resolution_tag() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"_[0-9]K_").ok()).as_ref()
}

/// Rewrites every `_<digit>K_` tag in the file name to `tag` (e.g. `_2K_`).
///
/// Returns `None` when the name does not change, including names that are not
/// valid UTF-8.
pub fn retag_resolution(texture_in: &Path, tag: &str) -> Option<std::path::PathBuf> {
    let name = texture_in.file_name()?.to_str()?;
    let renamed = resolution_tag()?.replace_all(name, tag);
    if renamed == name {
        return None;
    }
    Some(texture_in.with_file_name(renamed.as_ref()))
}

fn resize_command(texture_in: &Path, tag: &str, size: &str) -> CommandPlan {
    match retag_resolution(texture_in, tag) {
        Some(texture_out) => CommandPlan::Run(argv([
            OsStr::new("oiiotool"),
            texture_in.as_os_str(),
            OsStr::new("-v"),
            OsStr::new("--resize:filter=box"),
            OsStr::new(size),
            OsStr::new("--no-clobber"),
            OsStr::new("-o"),
            texture_out.as_os_str(),
        ])),
        None => CommandPlan::Skip,
    }
}

fn resize_1k_command(texture_in: &Path) -> CommandPlan {
    resize_command(texture_in, "_1K_", "1024x1024")
}

fn resize_2k_command(texture_in: &Path) -> CommandPlan {
    resize_command(texture_in, "_2K_", "2048x2048")
}

fn resize_4k_command(texture_in: &Path) -> CommandPlan {
    resize_command(texture_in, "_4K_", "4096x4096")
}

// ═══════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════

/// Commands keyed by display name.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    commands: BTreeMap<String, ConversionCommand>,
    hidden: Vec<(String, String)>,
}

impl FormatRegistry {
    /// Every built-in command, without checking executables.
    pub fn builtin() -> Self {
        Self::from_commands(BUILTIN_COMMANDS.iter().map(ConversionCommand::from))
    }

    /// Built-in commands whose executable is found on `PATH`.
    pub fn detect() -> Self {
        Self::detect_with(
            BUILTIN_COMMANDS.iter().map(ConversionCommand::from),
            is_command_available,
        )
    }

    /// Filters `commands` through `is_present`; rejected entries are logged
    /// and remembered in [`FormatRegistry::hidden`].
    pub fn detect_with<I, P>(commands: I, is_present: P) -> Self
    where
        I: IntoIterator<Item = ConversionCommand>,
        P: Fn(&str) -> bool,
    {
        let mut registry = Self::default();
        for command in commands {
            if is_present(command.executable()) {
                registry.insert(command);
            } else {
                warn!(
                    executable = command.executable(),
                    format = command.name(),
                    "Executable was not found, hiding output format"
                );
                registry
                    .hidden
                    .push((command.name().to_string(), command.executable().to_string()));
            }
        }
        registry
    }

    pub fn from_commands<I>(commands: I) -> Self
    where
        I: IntoIterator<Item = ConversionCommand>,
    {
        let mut registry = Self::default();
        for command in commands {
            registry.insert(command);
        }
        registry
    }

    pub fn insert(&mut self, command: ConversionCommand) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn get(&self, name: &str) -> Option<&ConversionCommand> {
        self.commands.get(name)
    }

    /// Display names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn commands(&self) -> impl Iterator<Item = &ConversionCommand> {
        self.commands.values()
    }

    /// `(name, executable)` of commands dropped by detection.
    pub fn hidden(&self) -> &[(String, String)] {
        &self.hidden
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
