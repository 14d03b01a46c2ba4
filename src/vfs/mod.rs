//! Virtual file access with archive fallback.
//!
//! `open` resolves a logical path to a loose file or to an entry of the
//! container derived from the path's directory, in the configured priority
//! order. Every stream is addressed by an integer handle from the shared
//! [`HandleTable`].

mod charset;
mod scan;
mod stream;

pub use charset::Charset;
pub use scan::{scan_fields, ScanFormat, ScanValue};
pub use stream::{BackingKind, FileStream, SeekOrigin};

use crate::archive::{derive_container_path, ArchiveKey, ArchiveManager, ContainerState};
use crate::config::{FsConfig, Priority, Source};
use crate::error::{DxError, Result};
use crate::handle::{DeleteFlag, Handle, HandleKind, HandleTable};
use tracing::debug;

/// Handle-based file layer over loose files and archive containers
#[derive(Debug, Default)]
pub struct VirtualFileSystem {
    config: FsConfig,
    archives: ArchiveManager,
    handles: HandleTable,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    // Settings. They only affect later opens and derivations.

    pub fn set_use_archive(&mut self, enabled: bool) {
        self.config.use_archive = enabled;
    }

    pub fn set_archive_key(&mut self, key: impl Into<ArchiveKey>) {
        self.config.key = key.into();
    }

    pub fn set_archive_extension(&mut self, extension: &str) {
        self.config.extension = extension.to_string();
    }

    pub fn set_archive_priority(&mut self, priority: Priority) {
        self.config.priority = priority;
    }

    pub fn set_charset(&mut self, charset: Charset) {
        self.config.charset = charset;
    }

    pub fn archives(&self) -> &ArchiveManager {
        &self.archives
    }

    /// Shared handle table; other resource kinds allocate here too
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn handles_mut(&mut self) -> &mut HandleTable {
        &mut self.handles
    }

    /// Open `path` and return a file handle
    pub fn open(&mut self, path: &str) -> Result<Handle> {
        let stream = if self.config.use_archive {
            self.resolve(path)?
        } else {
            FileStream::open_plain(path, self.config.charset)?
        };

        let handle = self.handles.allocate(HandleKind::File, stream)?;
        debug!(handle, path, "opened file");
        Ok(handle)
    }

    fn resolve(&mut self, path: &str) -> Result<FileStream> {
        for source in self.config.priority.search_order() {
            let attempt = match source {
                Source::Archive => self.open_archive_entry(path),
                Source::File => FileStream::open_plain(path, self.config.charset),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => debug!(path, ?source, error = %err, "source did not resolve, falling through"),
            }
        }
        Err(DxError::NotFound(path.to_string()))
    }

    fn open_archive_entry(&mut self, path: &str) -> Result<FileStream> {
        let (container, entry) = derive_container_path(path, &self.config.extension)?;
        let key = self.config.archive_key();
        if !self.archives.contains_entry(&container, &entry, key) {
            return Err(DxError::NotFound(format!("{}:{}", container, entry)));
        }
        let window = self.archives.open_window(&container, &entry, key)?;
        Ok(FileStream::from_window(window, self.config.charset))
    }

    fn stream(&self, handle: Handle) -> Result<&FileStream> {
        let stream = self.handles.get::<FileStream>(handle, HandleKind::File)?;
        stream.check_live()?;
        Ok(stream)
    }

    fn stream_mut(&mut self, handle: Handle) -> Result<&mut FileStream> {
        self.handles.get_mut::<FileStream>(handle, HandleKind::File)
    }

    /// Total stream length in bytes
    pub fn size(&self, handle: Handle) -> Result<u64> {
        Ok(self.stream(handle)?.length())
    }

    /// Current position from the start of the stream
    pub fn tell(&self, handle: Handle) -> Result<u64> {
        Ok(self.stream(handle)?.position())
    }

    pub fn eof(&self, handle: Handle) -> Result<bool> {
        Ok(self.stream(handle)?.is_eof())
    }

    /// Which backing the handle resolved to
    pub fn backing_kind(&self, handle: Handle) -> Result<BackingKind> {
        Ok(self.handles.get::<FileStream>(handle, HandleKind::File)?.backing_kind())
    }

    pub fn seek(&mut self, handle: Handle, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.stream_mut(handle)?.seek(offset, origin)
    }

    /// Read up to `max_bytes`; fewer only at end of stream
    pub fn read(&mut self, handle: Handle, max_bytes: usize) -> Result<Vec<u8>> {
        let stream = self.stream_mut(handle)?;
        let remaining = stream.length() - stream.position();
        let mut buf = vec![0u8; (max_bytes as u64).min(remaining) as usize];
        let n = stream.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read into a caller buffer, returning the byte count
    pub fn read_into(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        self.stream_mut(handle)?.read(buf)
    }

    /// Next line in the stream's charset, `None` at end of stream
    pub fn read_line(&mut self, handle: Handle) -> Result<Option<String>> {
        self.stream_mut(handle)?.read_line()
    }

    /// Next character in the stream's charset, `None` at end of stream
    pub fn read_char(&mut self, handle: Handle) -> Result<Option<char>> {
        self.stream_mut(handle)?.read_char()
    }

    /// `scanf` over the next line. `None` at end of stream; otherwise the
    /// converted fields, whose count is the number of matches. A malformed
    /// format leaves the stream where it was.
    pub fn scan(&mut self, handle: Handle, format: &str) -> Result<Option<Vec<ScanValue>>> {
        let format = ScanFormat::parse(format)?;
        Ok(self.read_line(handle)?.map(|line| format.scan(&line)))
    }

    /// Close the stream, firing any registered delete flags
    pub fn close(&mut self, handle: Handle) -> Result<()> {
        let stream = self.handles.retire_as::<FileStream>(handle, HandleKind::File)?;
        debug!(handle, source = stream.source(), "closed file");
        Ok(())
    }

    /// Close every open file handle
    pub fn close_all(&mut self) -> usize {
        self.handles.retire_all(HandleKind::File)
    }

    /// Set `flag` to `DELETED` when `handle` (of any kind) is retired
    pub fn register_delete_flag(&mut self, handle: Handle, flag: &DeleteFlag) -> Result<()> {
        self.handles.register_delete_flag(handle, flag)
    }

    // Archive controls, using the configured key.

    /// Load a container into memory. The async hint is accepted but the
    /// work always completes before returning.
    pub fn preload_archive(&mut self, container_path: &str, async_hint: bool) -> Result<()> {
        if async_hint {
            debug!(container = container_path, "async preload requested; loading synchronously");
        }
        let key = self.config.archive_key();
        self.archives.preload(container_path, key)
    }

    pub fn check_archive_idle(&self, container_path: &str) -> bool {
        self.archives.check_idle(container_path)
    }

    /// Release a container; streams into it become stale
    pub fn release_archive(&mut self, container_path: &str) -> bool {
        self.archives.release(container_path)
    }

    pub fn archive_contains(&mut self, container_path: &str, entry_name: &str) -> bool {
        let key = self.config.archive_key();
        self.archives.contains_entry(container_path, entry_name, key)
    }

    pub fn archive_state(&self, container_path: &str) -> ContainerState {
        self.archives.state(container_path)
    }
}
