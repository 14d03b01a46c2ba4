use crate::error::{DxError, Result};
use std::io::{Read, Write};

/// Magic number: 0x89 'D' 'X' 'A' 0x0D 0x0A 0x1A 0x0A
/// Follows PNG pattern for corruption detection
pub const MAGIC_NUMBER: [u8; 8] = [0x89, b'D', b'X', b'A', 0x0D, 0x0A, 0x1A, 0x0A];

/// Current format version
pub const FORMAT_VERSION_MAJOR: u16 = 1;
pub const FORMAT_VERSION_MINOR: u16 = 0;

/// Header size in bytes. The payload region starts right after it.
pub const HEADER_SIZE: usize = 48;

/// Fixed part of a directory record: name length, offset, length, crc32
pub const DIR_ENTRY_FIXED_SIZE: usize = 2 + 8 + 8 + 4;

/// Maximum entry name length in bytes (UTF-8)
pub const MAX_NAME_LENGTH: usize = u16::MAX as usize;

/// Header flag: payload region is transformed with the key-derived cipher
pub const FLAG_ENCRYPTED: u32 = 0b1;

/// Container header. Never encrypted, so it can be validated before any key
/// is applied.
///
/// Structure (48 bytes fixed):
/// - Magic: 8 bytes
/// - Version Major / Minor: uint16 + uint16
/// - Flags: uint32
/// - Entry Count: uint32
/// - Directory CRC32: uint32 (over the plaintext directory table)
/// - Directory Offset: uint64 (payload-relative)
/// - Directory Size: uint64
/// - Reserved: 8 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub flags: u32,
    pub entry_count: u32,
    pub directory_crc32: u32,
    pub directory_offset: u64,
    pub directory_size: u64,
}

impl ContainerHeader {
    pub fn new() -> Self {
        Self {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            flags: 0,
            entry_count: 0,
            directory_crc32: 0,
            directory_offset: 0,
            directory_size: 0,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&MAGIC_NUMBER)?;
        writer.write_all(&self.version_major.to_le_bytes())?;
        writer.write_all(&self.version_minor.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        writer.write_all(&self.directory_crc32.to_le_bytes())?;
        writer.write_all(&self.directory_offset.to_le_bytes())?;
        writer.write_all(&self.directory_size.to_le_bytes())?;
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }

    /// Read header from a reader.
    ///
    /// `path` is only used to label errors. A short read is reported as a
    /// corrupt container, not as an I/O failure.
    pub fn read_from<R: Read>(mut reader: R, path: &str) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| truncated(path, "header", e))?;

        if buf[..8] != MAGIC_NUMBER {
            return Err(DxError::corrupt(path, "invalid magic number"));
        }

        let header = Self {
            version_major: u16_at(&buf, 8),
            version_minor: u16_at(&buf, 10),
            flags: u32_at(&buf, 12),
            entry_count: u32_at(&buf, 16),
            directory_crc32: u32_at(&buf, 20),
            directory_offset: u64_at(&buf, 24),
            directory_size: u64_at(&buf, 32),
        };

        if header.version_major != FORMAT_VERSION_MAJOR {
            return Err(DxError::corrupt(
                path,
                format!(
                    "unsupported version {}.{}",
                    header.version_major, header.version_minor
                ),
            ));
        }

        Ok(header)
    }
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// One record of the directory table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Payload-relative offset of the entry bytes
    pub offset: u64,
    pub length: u64,
    /// CRC32 of the plaintext entry bytes
    pub crc32: u32,
}

impl DirEntry {
    /// Encoded size of this record in the directory table
    pub fn encoded_len(&self) -> usize {
        DIR_ENTRY_FIXED_SIZE + self.name.len()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let name = self.name.as_bytes();
        writer.write_all(&(name.len() as u16).to_le_bytes())?;
        writer.write_all(name)?;
        writer.write_all(&self.offset.to_le_bytes())?;
        writer.write_all(&self.length.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        Ok(())
    }
}

/// Parse a plaintext directory table holding exactly `count` records.
///
/// Returns a description of the first problem found; the caller turns it into
/// a `CorruptContainer` error.
pub fn parse_directory(table: &[u8], count: u32) -> std::result::Result<Vec<DirEntry>, String> {
    let mut entries = Vec::with_capacity((count as usize).min(table.len() / DIR_ENTRY_FIXED_SIZE));
    let mut pos = 0usize;

    for i in 0..count {
        if table.len() - pos < 2 {
            return Err(format!("directory truncated at record {}", i));
        }
        let name_len = u16_at(table, pos) as usize;
        pos += 2;

        if table.len() - pos < name_len + DIR_ENTRY_FIXED_SIZE - 2 {
            return Err(format!("directory truncated at record {}", i));
        }
        let name = std::str::from_utf8(&table[pos..pos + name_len])
            .map_err(|e| format!("invalid UTF-8 in entry name {}: {}", i, e))?
            .to_string();
        pos += name_len;

        let offset = u64_at(table, pos);
        let length = u64_at(table, pos + 8);
        let crc32 = u32_at(table, pos + 16);
        pos += 20;

        entries.push(DirEntry {
            name,
            offset,
            length,
            crc32,
        });
    }

    if pos != table.len() {
        return Err(format!(
            "{} trailing bytes after directory",
            table.len() - pos
        ));
    }

    Ok(entries)
}

fn truncated(path: &str, what: &str, err: std::io::Error) -> DxError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        DxError::corrupt(path, format!("truncated {}", what))
    } else {
        DxError::Io(err)
    }
}

// Helper functions for reading primitive types out of a buffer
fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = ContainerHeader {
            version_major: 1,
            version_minor: 0,
            flags: FLAG_ENCRYPTED,
            entry_count: 3,
            directory_crc32: 0xDEADBEEF,
            directory_offset: 1024,
            directory_size: 77,
        };

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let parsed = ContainerHeader::read_from(&buf[..], "t.dxa").unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_encrypted());
    }

    #[test]
    fn test_header_bad_magic() {
        let mut buf = Vec::new();
        ContainerHeader::new().write_to(&mut buf).unwrap();
        buf[1] = b'Z';

        let err = ContainerHeader::read_from(&buf[..], "t.dxa").unwrap_err();
        assert!(matches!(err, DxError::CorruptContainer { .. }));
    }

    #[test]
    fn test_header_truncated() {
        let mut buf = Vec::new();
        ContainerHeader::new().write_to(&mut buf).unwrap();

        let err = ContainerHeader::read_from(&buf[..20], "t.dxa").unwrap_err();
        assert!(matches!(err, DxError::CorruptContainer { .. }));
    }

    #[test]
    fn test_header_future_version() {
        let mut header = ContainerHeader::new();
        header.version_major = 9;
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();

        assert!(ContainerHeader::read_from(&buf[..], "t.dxa").is_err());
    }

    #[test]
    fn test_parse_directory() {
        let entries = vec![
            DirEntry {
                name: "a.txt".to_string(),
                offset: 0,
                length: 5,
                crc32: 1,
            },
            DirEntry {
                name: "日本語.png".to_string(),
                offset: 5,
                length: 100,
                crc32: 2,
            },
        ];

        let mut table = Vec::new();
        for entry in &entries {
            entry.write_to(&mut table).unwrap();
        }
        assert_eq!(
            table.len(),
            entries.iter().map(DirEntry::encoded_len).sum::<usize>()
        );

        assert_eq!(parse_directory(&table, 2).unwrap(), entries);
        assert!(parse_directory(&table[..table.len() - 1], 2).is_err());
        assert!(parse_directory(&table, 3).is_err());
        assert!(parse_directory(&table, 1).is_err());
    }
}
