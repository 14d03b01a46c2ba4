use crate::archive::cipher::{ArchiveKey, Cipher};
use crate::archive::format::{ContainerHeader, DirEntry, FLAG_ENCRYPTED, HEADER_SIZE, MAX_NAME_LENGTH};
use crate::archive::manager::normalize_path;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Builds containers in the format read by [`ArchiveManager`](crate::ArchiveManager).
///
/// Offline tooling: the runtime file layer never writes.
pub struct ArchiveWriter {
    writer: BufWriter<File>,
    entries: Vec<DirEntry>,
    /// Payload-relative offset of the next byte to write
    current_offset: u64,
    cipher: Option<Cipher>,
}

impl ArchiveWriter {
    /// Create a new container file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        // Placeholder header, rewritten at finalization
        ContainerHeader::new().write_to(&mut writer)?;

        Ok(Self {
            writer,
            entries: Vec::new(),
            current_offset: 0,
            cipher: None,
        })
    }

    /// Encrypt the payload region with `key`. An empty key stores in clear.
    pub fn with_key(mut self, key: &ArchiveKey) -> Self {
        self.cipher = Cipher::new(key);
        self
    }

    /// Add an entry. Names are stored verbatim apart from separator
    /// normalization, and lookups are case-sensitive.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let name = normalize_path(name);
        if name.is_empty() || name.len() > MAX_NAME_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid entry name length: {} bytes", name.len()),
            )
            .into());
        }
        if self.entries.iter().any(|e| e.name == name) {
            warn!(entry = %name, "duplicate entry name; readers keep the first");
        }

        let mut bytes = data.to_vec();
        self.transform(self.current_offset, &mut bytes);
        self.writer.write_all(&bytes)?;

        self.entries.push(DirEntry {
            name,
            offset: self.current_offset,
            length: data.len() as u64,
            crc32: crc32fast::hash(data),
        });
        self.current_offset += data.len() as u64;

        Ok(())
    }

    /// Add an entry from a file on disk
    pub fn add_file_from_disk(&mut self, name: &str, disk_path: &Path) -> Result<()> {
        let data = std::fs::read(disk_path)?;
        self.add_file(name, &data)
    }

    /// Write the directory table and the final header
    pub fn finalize(mut self) -> Result<()> {
        let mut table = Vec::with_capacity(self.entries.iter().map(DirEntry::encoded_len).sum());
        for entry in &self.entries {
            entry.write_to(&mut table)?;
        }

        let mut header = ContainerHeader::new();
        header.entry_count = self.entries.len() as u32;
        header.directory_crc32 = crc32fast::hash(&table);
        header.directory_offset = self.current_offset;
        header.directory_size = table.len() as u64;
        if self.cipher.is_some() {
            header.flags |= FLAG_ENCRYPTED;
        }

        self.transform(self.current_offset, &mut table);
        self.writer.write_all(&table)?;
        self.writer.flush()?;

        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        header.write_to(&mut file)?;
        file.flush()?;

        debug!(
            entries = header.entry_count,
            bytes = HEADER_SIZE as u64 + header.directory_offset + header.directory_size,
            encrypted = header.is_encrypted(),
            "finalized container"
        );
        Ok(())
    }

    fn transform(&self, position: u64, data: &mut [u8]) {
        if let Some(cipher) = &self.cipher {
            cipher.apply(position, data);
        }
    }
}
