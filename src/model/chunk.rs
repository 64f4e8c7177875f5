/// A fixed-capacity run of raw lines.
///
/// Lines keep their terminator (`\n` or `\r\n`) exactly as read, so a chunk
/// re-read from disk is byte-identical to the one that was evicted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset of the first line in the source. Only meaningful for seekable sources.
    pub start_offset: u64,
    pub(crate) lines: Vec<Vec<u8>>,
}

impl Chunk {
    pub fn new(start_offset: u64) -> Self {
        Self {
            start_offset,
            lines: Vec::new(),
        }
    }

    /// Whether the chunk currently holds line data.
    pub fn is_loaded(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&[u8]> {
        self.lines.get(index).map(Vec::as_slice)
    }

    /// Drops line data, releasing the allocation.
    pub(crate) fn unload(&mut self) {
        self.lines = Vec::new();
    }
}

/// Strips one trailing `\n` or `\r\n`.
pub fn trim_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
