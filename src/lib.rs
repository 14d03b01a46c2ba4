//! dxport-rs: handle-based file access with encrypted archive fallback
//!
//! This library implements the `FileRead_*` file layer of DxLib-style
//! applications:
//! - Integer handles shared across resource kinds, with delete-flag notification
//! - Directory-indexed archive containers with a key-derived stream cipher
//! - Path resolution between loose files and archive entries by priority
//! - Byte, line, character and `scanf`-style reads under a chosen charset
//!
//! # Example
//!
//! ```no_run
//! use dxport_rs::{ArchiveKey, ArchiveWriter, VirtualFileSystem};
//!
//! // Pack "assets/title.txt" into "assets.dxa"
//! let mut writer = ArchiveWriter::create("assets.dxa")?.with_key(&ArchiveKey::from("secret"));
//! writer.add_file("title.txt", b"Hello, World!")?;
//! writer.finalize()?;
//!
//! // Read it back through the virtual file system
//! let mut vfs = VirtualFileSystem::new();
//! vfs.set_use_archive(true);
//! vfs.set_archive_key("secret");
//!
//! let handle = vfs.open("assets/title.txt")?;
//! let line = vfs.read_line(handle)?;
//! assert_eq!(line.as_deref(), Some("Hello, World!"));
//! vfs.close(handle)?;
//! # Ok::<(), dxport_rs::DxError>(())
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod handle;
pub mod vfs;

// Re-export commonly used types
pub use archive::{
    derive_container_path, ArchiveKey, ArchiveManager, ArchiveWriter, ContainerState,
    HEADER_SIZE, MAGIC_NUMBER,
};
pub use config::{FsConfig, Priority};
pub use error::{DxError, Result};
pub use handle::{DeleteFlag, Handle, HandleKind, HandleTable, DELETED};
pub use vfs::{
    BackingKind, Charset, FileStream, ScanFormat, ScanValue, SeekOrigin, VirtualFileSystem,
};
