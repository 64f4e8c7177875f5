//! Byte sources feeding a document.
//!
//! A document never opens files itself. It asks a [`SourceOpener`] for a
//! fresh [`ByteSource`] on start and on every reload, which keeps regular
//! files, pipes and test readers behind one seam.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

// ============================================================================
// Sources
// ============================================================================

/// A readable byte stream, optionally seekable.
pub trait ByteSource: Read + Send {
    /// Whether evicted chunks can be re-read by seeking.
    fn is_seekable(&self) -> bool;

    /// Repositions to an absolute byte offset.
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;

    /// Current size of the underlying data, if known.
    fn byte_len(&self) -> Option<u64>;
}

/// A regular file.
pub struct FileSource {
    file: File,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }
        Ok(Self { file })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl ByteSource for FileSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn byte_len(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }
}

/// A forward-only stream such as stdin or a pipe.
pub struct StreamSource {
    inner: Box<dyn Read + Send>,
}

impl StreamSource {
    pub fn new(inner: Box<dyn Read + Send>) -> Self {
        Self { inner }
    }
}

impl Read for StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ByteSource for StreamSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn seek_to(&mut self, _offset: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream sources cannot seek",
        ))
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

// ============================================================================
// Openers
// ============================================================================

/// Produces byte sources for a document.
pub trait SourceOpener: Send {
    /// Opens the source from the beginning.
    fn open(&mut self) -> io::Result<Box<dyn ByteSource>>;

    /// Whether [`SourceOpener::open`] can currently produce a source.
    fn can_open(&self) -> bool;

    /// Whether opened sources support seeking.
    fn is_seekable(&self) -> bool;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// Opens a file by path, any number of times.
pub struct FileOpener {
    path: PathBuf,
}

impl FileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceOpener for FileOpener {
    fn open(&mut self) -> io::Result<Box<dyn ByteSource>> {
        Ok(Box::new(FileSource::open(&self.path)?))
    }

    fn can_open(&self) -> bool {
        true
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

pub type ReopenFn = Box<dyn FnMut() -> io::Result<Box<dyn Read + Send>> + Send>;

/// Hands out a caller-provided reader once, then defers to an optional reopen
/// function. Without one, the stream cannot be reloaded.
pub struct ReaderOpener {
    pending: Option<Box<dyn Read + Send>>,
    reopen: Option<ReopenFn>,
    name: String,
}

impl ReaderOpener {
    pub fn new(reader: Box<dyn Read + Send>, name: impl Into<String>) -> Self {
        Self {
            pending: Some(reader),
            reopen: None,
            name: name.into(),
        }
    }

    pub fn with_reopen(mut self, reopen: ReopenFn) -> Self {
        self.reopen = Some(reopen);
        self
    }
}

impl SourceOpener for ReaderOpener {
    fn open(&mut self) -> io::Result<Box<dyn ByteSource>> {
        if let Some(reader) = self.pending.take() {
            return Ok(Box::new(StreamSource::new(reader)));
        }
        match self.reopen.as_mut() {
            Some(reopen) => Ok(Box::new(StreamSource::new(reopen()?))),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} cannot be reopened", self.name),
            )),
        }
    }

    fn can_open(&self) -> bool {
        self.pending.is_some() || self.reopen.is_some()
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_file_source_seeks_and_reports_len() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"hello\nworld\n").unwrap();

        let mut opener = FileOpener::new(tmp.path());
        let mut source = opener.open().unwrap();
        assert!(source.is_seekable());
        assert_eq!(source.byte_len(), Some(12));

        source.seek_to(6).unwrap();
        let mut rest = String::new();
        source.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world\n");
    }

    #[test]
    fn test_file_opener_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut opener = FileOpener::new(dir.path());
        assert!(opener.open().is_err());
    }

    #[test]
    fn test_reader_opener_is_one_shot_without_reopen() {
        let mut opener = ReaderOpener::new(Box::new(Cursor::new(b"x\n".to_vec())), "stdin");
        assert!(opener.can_open());
        let mut source = opener.open().unwrap();
        assert!(!source.is_seekable());
        assert!(source.seek_to(0).is_err());
        assert_eq!(source.byte_len(), None);

        assert!(!opener.can_open());
        let err = opener.open().err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_reader_opener_reopens() {
        let mut count = 0;
        let mut opener = ReaderOpener::new(Box::new(Cursor::new(Vec::new())), "pipe")
            .with_reopen(Box::new(move || {
                count += 1;
                Ok(Box::new(Cursor::new(format!("{count}\n").into_bytes())) as Box<dyn Read + Send>)
            }));
        opener.open().unwrap();
        assert!(opener.can_open());

        let mut s = String::new();
        opener.open().unwrap().read_to_string(&mut s).unwrap();
        assert_eq!(s, "1\n");
    }
}
