use crate::archive::EntryWindow;
use crate::error::{DxError, Result};
use crate::vfs::charset::Charset;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use tracing::warn;

/// Bytes pulled per step while looking for a line terminator
const LINE_CHUNK: usize = 256;

/// Seek origin, mirroring `SEEK_SET` / `SEEK_CUR` / `SEEK_END`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

impl SeekOrigin {
    /// Map a C `SEEK_*` value
    pub fn from_legacy(origin: i32) -> Option<Self> {
        match origin {
            0 => Some(Self::Start),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// Where a stream's bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    PlainFile,
    ArchiveEntry,
}

/// Loose file with its length cached at open time
#[derive(Debug)]
struct PlainFile {
    file: File,
    /// OS-level position, tracked to skip redundant seeks
    cursor: u64,
}

impl PlainFile {
    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        if self.cursor != position {
            self.file.seek(SeekFrom::Start(position))?;
            self.cursor = position;
        }

        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.cursor += total as u64;
        Ok(total)
    }
}

#[derive(Debug)]
enum Backing {
    Plain(PlainFile),
    Archive(EntryWindow),
}

/// The value behind a file handle: a cursor over a loose file or an archive
/// entry window.
#[derive(Debug)]
pub struct FileStream {
    backing: Backing,
    source: String,
    position: u64,
    length: u64,
    eof: bool,
    charset: Charset,
}

impl FileStream {
    /// Open a loose file. Missing files and directories are `NotFound`.
    pub fn open_plain(path: &str, charset: Charset) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DxError::NotFound(path.to_string()),
            _ => DxError::Io(e),
        })?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(DxError::NotFound(path.to_string()));
        }

        Ok(Self::new(
            Backing::Plain(PlainFile { file, cursor: 0 }),
            path.to_string(),
            metadata.len(),
            charset,
        ))
    }

    /// Wrap an archive entry window
    pub fn from_window(window: EntryWindow, charset: Charset) -> Self {
        let source = window.label().to_string();
        let length = window.len();
        Self::new(Backing::Archive(window), source, length, charset)
    }

    fn new(backing: Backing, source: String, length: u64, charset: Charset) -> Self {
        Self {
            backing,
            source,
            position: 0,
            length,
            eof: length == 0,
            charset,
        }
    }

    pub fn backing_kind(&self) -> BackingKind {
        match self.backing {
            Backing::Plain(_) => BackingKind::PlainFile,
            Backing::Archive(_) => BackingKind::ArchiveEntry,
        }
    }

    /// Path or `container:entry` the stream was opened from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// An archive stream whose container was released
    pub fn is_stale(&self) -> bool {
        match &self.backing {
            Backing::Archive(window) => window.is_stale(),
            Backing::Plain(_) => false,
        }
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.is_stale() {
            return Err(DxError::StaleHandle(self.source.clone()));
        }
        Ok(())
    }

    /// Move the cursor. Targets outside `[0, length]` are rejected and leave
    /// the position untouched.
    pub fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.check_live()?;

        let base = match origin {
            SeekOrigin::Start => 0i128,
            SeekOrigin::Current => self.position as i128,
            SeekOrigin::End => self.length as i128,
        };
        let target = base + offset as i128;
        if target < 0 || target > self.length as i128 {
            return Err(DxError::InvalidOffset {
                target: target.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
                length: self.length,
            });
        }

        self.set_position(target as u64);
        Ok(self.position)
    }

    /// Fill as much of `buf` as the stream has left
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_live()?;

        let want = (self.length - self.position).min(buf.len() as u64) as usize;
        if want == 0 {
            self.eof = self.position == self.length;
            return Ok(0);
        }

        let got = match &mut self.backing {
            Backing::Plain(file) => file.read_at(self.position, &mut buf[..want])?,
            Backing::Archive(window) => window.read_at(self.position, &mut buf[..want])?,
        };

        if got < want {
            // Loose file shrank under us; the stream ends where the data does
            warn!(source = %self.source, expected = self.length, "file shorter than at open");
            self.length = self.position + got as u64;
        }
        self.set_position(self.position + got as u64);
        Ok(got)
    }

    /// Read the next line without its terminator (`\n` or `\r\n`).
    /// Returns `None` when already at end of stream.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        self.check_live()?;
        if self.position >= self.length {
            self.eof = true;
            return Ok(None);
        }

        let mut line = Vec::new();
        let mut chunk = [0u8; LINE_CHUNK];
        loop {
            let start = self.position;
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(i) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..i]);
                self.set_position(start + i as u64 + 1);
                break;
            }
            line.extend_from_slice(&chunk[..n]);
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(self.charset.decode(&line)))
    }

    /// Decode one character and advance by its encoded width. Malformed
    /// input yields U+FFFD and consumes a single byte.
    pub fn read_char(&mut self) -> Result<Option<char>> {
        let mut seq = [0u8; 4];
        if self.read(&mut seq[..1])? == 0 {
            return Ok(None);
        }

        let width = self.charset.sequence_len(seq[0]);
        let after_lead = self.position;
        let extra = self.read(&mut seq[1..width])?;

        match self.charset.decode_char(&seq[..1 + extra]) {
            Some(c) => Ok(Some(c)),
            None => {
                self.set_position(after_lead);
                Ok(Some(char::REPLACEMENT_CHARACTER))
            }
        }
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
        self.eof = position == self.length;
    }
}
