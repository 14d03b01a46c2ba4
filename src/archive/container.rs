use crate::archive::cipher::{ArchiveKey, Cipher};
use crate::archive::format::{parse_directory, ContainerHeader, HEADER_SIZE};
use crate::error::{DxError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, warn};

/// Lifecycle state of a container as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Never referenced, or indexing failed
    Unloaded,
    /// Directory parsed, payload read from disk per access
    Indexed,
    /// Payload held in memory
    Preloaded,
    /// Explicitly released; streams into it are stale
    Released,
}

/// Location of an entry inside the decrypted payload region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub offset: u64,
    pub length: u64,
    pub crc32: u32,
}

/// Directory index with O(1) name lookup and stable directory order
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: HashMap<String, EntryLocation>,
    order: Vec<String>,
}

impl ArchiveIndex {
    /// Exact, case-sensitive lookup
    pub fn get(&self, name: &str) -> Option<&EntryLocation> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in directory order (duplicates listed once)
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// An indexed container. Index and cipher are fixed once loaded; the payload
/// can be materialized once and is then shared read-only.
#[derive(Debug)]
pub struct Container {
    path: String,
    cipher: Option<Cipher>,
    index: ArchiveIndex,
    /// Bytes of the payload region that hold entry data (directory excluded)
    data_len: u64,
    payload: OnceLock<Vec<u8>>,
}

impl Container {
    /// Open `path`, validate the header and parse the directory table.
    pub(crate) fn load(path: &str, key: Option<&ArchiveKey>) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DxError::NotFound(path.to_string()),
            _ => DxError::Io(e),
        })?;
        let file_len = file.metadata()?.len();

        let header = ContainerHeader::read_from(&mut file, path)?;
        let cipher = key.and_then(Cipher::new);

        if header.is_encrypted() != cipher.is_some() {
            warn!(
                container = path,
                encrypted = header.is_encrypted(),
                key_set = cipher.is_some(),
                "container encryption flag does not match configured key"
            );
        }

        let payload_len = file_len - HEADER_SIZE as u64;
        let dir_end = header
            .directory_offset
            .checked_add(header.directory_size)
            .ok_or_else(|| DxError::corrupt(path, "directory bounds overflow"))?;
        if dir_end > payload_len {
            return Err(DxError::corrupt(path, "directory table extends past end of file"));
        }

        let mut table = vec![0u8; header.directory_size as usize];
        file.seek(SeekFrom::Start(HEADER_SIZE as u64 + header.directory_offset))?;
        file.read_exact(&mut table)?;
        if let Some(cipher) = &cipher {
            cipher.apply(header.directory_offset, &mut table);
        }

        if crc32fast::hash(&table) != header.directory_crc32 {
            return Err(DxError::corrupt(
                path,
                "directory checksum mismatch (wrong key?)",
            ));
        }

        let records = parse_directory(&table, header.entry_count)
            .map_err(|reason| DxError::corrupt(path, reason))?;

        let data_len = header.directory_offset;
        let mut spans = Vec::with_capacity(records.len());
        let mut index = ArchiveIndex::default();

        for record in records {
            let end = record
                .offset
                .checked_add(record.length)
                .filter(|end| *end <= data_len)
                .ok_or_else(|| {
                    DxError::corrupt(path, format!("entry {} lies outside the payload", record.name))
                })?;
            spans.push((record.offset, end));

            if index.entries.contains_key(&record.name) {
                warn!(container = path, entry = %record.name, "duplicate entry name, keeping the first");
                continue;
            }
            index.order.push(record.name.clone());
            index.entries.insert(
                record.name,
                EntryLocation {
                    offset: record.offset,
                    length: record.length,
                    crc32: record.crc32,
                },
            );
        }

        spans.retain(|(start, end)| start < end);
        spans.sort_unstable();
        if spans.windows(2).any(|w| w[1].0 < w[0].1) {
            return Err(DxError::corrupt(path, "entries overlap"));
        }

        debug!(container = path, entries = index.len(), encrypted = cipher.is_some(), "indexed container");

        Ok(Self {
            path: path.to_string(),
            cipher,
            index,
            data_len,
            payload: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn is_preloaded(&self) -> bool {
        self.payload.get().is_some()
    }

    /// Read and decrypt the whole data region into memory, verifying every
    /// entry checksum. No-op when already preloaded.
    pub(crate) fn preload(&self) -> Result<()> {
        if self.is_preloaded() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut data = vec![0u8; self.data_len as usize];
        file.read_exact(&mut data)
            .map_err(|_| DxError::corrupt(&self.path, "payload truncated"))?;
        if let Some(cipher) = &self.cipher {
            cipher.apply(0, &mut data);
        }

        for name in self.index.names() {
            let loc = &self.index.entries[name];
            let bytes = &data[loc.offset as usize..(loc.offset + loc.length) as usize];
            if crc32fast::hash(bytes) != loc.crc32 {
                return Err(DxError::corrupt(
                    &self.path,
                    format!("checksum mismatch for entry {}", name),
                ));
            }
        }

        // Single-threaded by contract, so nobody can have raced us here
        let _ = self.payload.set(data);
        debug!(container = %self.path, bytes = self.data_len, "preloaded container");
        Ok(())
    }

    /// Fill `buf` from payload-relative `offset`, from memory when preloaded
    /// and from the backing file otherwise. `file` caches the caller's handle
    /// on the container file between calls.
    fn read_payload(&self, file: &mut Option<File>, offset: u64, buf: &mut [u8]) -> Result<()> {
        if let Some(payload) = self.payload.get() {
            let start = offset as usize;
            buf.copy_from_slice(&payload[start..start + buf.len()]);
            return Ok(());
        }

        let handle = match file {
            Some(handle) => handle,
            None => file.insert(File::open(&self.path)?),
        };
        handle.seek(SeekFrom::Start(HEADER_SIZE as u64 + offset))?;
        handle.read_exact(buf)?;
        if let Some(cipher) = &self.cipher {
            cipher.apply(offset, buf);
        }
        Ok(())
    }
}

/// A bounded view of one entry. Holds only a weak reference, so releasing the
/// container makes the window stale.
#[derive(Debug)]
pub struct EntryWindow {
    container: Weak<Container>,
    label: String,
    start: u64,
    len: u64,
    file: Option<File>,
}

impl EntryWindow {
    pub(crate) fn new(container: &Arc<Container>, entry: &str, location: EntryLocation) -> Self {
        Self {
            container: Arc::downgrade(container),
            label: format!("{}:{}", container.path(), entry),
            start: location.offset,
            len: location.length,
            file: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `container:entry`, used in logs and errors
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_stale(&self) -> bool {
        self.container.strong_count() == 0
    }

    /// Read up to `buf.len()` bytes at window-local `position`.
    pub(crate) fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let container = self
            .container
            .upgrade()
            .ok_or_else(|| DxError::StaleHandle(self.label.clone()))?;

        let n = (self.len.saturating_sub(position)).min(buf.len() as u64) as usize;
        if n == 0 {
            return Ok(0);
        }
        container.read_payload(&mut self.file, self.start + position, &mut buf[..n])?;
        Ok(n)
    }
}
