//! On-disk configuration for operational knobs that sit outside the
//! algorithmic core (arena sizing, default case sensitivity, ...).
//!
//! Loaded from `~/.config/restore-tree.toml`, falling back to
//! [`Configuration::default`] if the file doesn't exist.

use std::{fs, io};

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

#[inline]
fn default_arena_guess() -> usize {
    1 << 16 // guess 64k nodes; the arena still grows past this.
}

#[inline]
fn default_growth_factor() -> f32 {
    1.5
}

#[inline]
fn default_case_sensitive() -> bool {
    !cfg!(windows)
}

#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// Initial node-arena capacity guess, amortizing the first few growths.
    #[serde(default = "default_arena_guess")]
    pub arena_size_guess: usize,

    /// Growth factor applied when the node arena or intern arena runs out
    /// of room.
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f32,

    /// Default case sensitivity for glob/`find` matching, absent an
    /// explicit per-session override. POSIX hosts default to sensitive,
    /// Windows to insensitive.
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,

    /// OR `extract`/`extract_dir` across all nodes when loading a tree
    /// snapshot, unless the caller overrides it per-call.
    #[serde(default)]
    pub mark_on_load_default: bool,

    /// Byte budget for pre-allocating the string intern arena. `0` (the
    /// default) falls back to the per-node heuristic in `build()`.
    #[serde(default)]
    pub arena_byte_budget: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            arena_size_guess: default_arena_guess(),
            growth_factor: default_growth_factor(),
            case_sensitive: default_case_sensitive(),
            mark_on_load_default: false,
            arena_byte_budget: 0,
        }
    }
}

pub fn load() -> Result<Configuration> {
    let mut confpath: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow!("Can't find home directory"))?
        .try_into()
        .context("Home directory isn't UTF-8")?;
    confpath.extend([".config", "restore-tree.toml"]);

    let s = match fs::read_to_string(&confpath) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Configuration::default()),
        found => found,
    }
    .with_context(|| format!("Couldn't open {confpath}"))?;

    let conf = toml::from_str(&s).with_context(|| format!("Couldn't parse {confpath}"))?;
    Ok(conf)
}
