//! File-layer settings.
//!
//! These were process-wide globals in the legacy API. Here they are a plain
//! value owned by each [`VirtualFileSystem`](crate::VirtualFileSystem), so
//! several differently configured instances can coexist.
//!
//! Settings can also come from TOML:
//!
//! ```toml
//! [filesystem]
//! use_archive = true
//! key = "secret"
//! extension = "dxa"
//! priority = "archive-first"
//! charset = "shift-jis"
//! ```

use crate::archive::ArchiveKey;
use crate::error::Result;
use crate::vfs::Charset;
use serde::Deserialize;
use std::path::Path;

/// Default container extension
pub const DEFAULT_EXTENSION: &str = "dxa";

/// Search order when both a loose file and an archive entry may exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    #[default]
    ArchiveFirst,
    FileFirst,
}

/// A place `open` can look for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Archive,
    File,
}

impl Priority {
    /// Legacy flag: zero tries archives first, non-zero tries files first
    pub fn from_legacy_flag(flag: i32) -> Self {
        if flag == 0 {
            Self::ArchiveFirst
        } else {
            Self::FileFirst
        }
    }

    pub fn search_order(self) -> [Source; 2] {
        match self {
            Self::ArchiveFirst => [Source::Archive, Source::File],
            Self::FileFirst => [Source::File, Source::Archive],
        }
    }
}

/// Settings consulted on every open and container derivation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Look inside containers at all
    pub use_archive: bool,
    /// Key text for encrypted containers; empty means containers are in clear
    pub key: ArchiveKey,
    /// Container extension appended to the directory name
    pub extension: String,
    pub priority: Priority,
    /// Charset for line, character and scan reads
    pub charset: Charset,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            use_archive: false,
            key: ArchiveKey::default(),
            extension: DEFAULT_EXTENSION.to_string(),
            priority: Priority::ArchiveFirst,
            charset: Charset::Utf8,
        }
    }
}

#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    filesystem: FsConfig,
}

impl FsConfig {
    /// Parse the `[filesystem]` table of a TOML document. Missing keys keep
    /// their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let document: ConfigDocument = toml::from_str(text)?;
        Ok(document.filesystem)
    }

    /// Read settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Key to hand to the archive layer, `None` when containers are in clear
    pub fn archive_key(&self) -> Option<&ArchiveKey> {
        (!self.key.is_empty()).then_some(&self.key)
    }
}
