//! Chunked line store.
//!
//! The store owns every chunk, the absolute line bounds of what has been
//! read, and the eviction ledger. It is plain data: the control loop is the
//! only code that mutates it, and readers see it through an `RwLock`.
//!
//! Two eviction policies apply, depending on the source:
//!
//! - **File** ([`Store::swap_loaded_file`]): the source can be re-read, so
//!   eviction is cheap and runs until the ledger is back under its limit.
//! - **Memory** ([`Store::load_chunks_mem`]): evicted lines are gone for good,
//!   so at most one chunk is evicted per touch and `start_num` slides past it.
//!
//! Chunk 0 is anchored: once read it stays resident and never enters the ledger.

use std::ops::Range;

use super::chunk::Chunk;
use super::error::{StoreError, StoreResult};
use super::ledger::{ChunkLedger, ChunkLimit};
use crate::search::Searcher;

/// Direction of a search within a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

#[derive(Debug)]
pub struct Store {
    chunks: Vec<Chunk>,
    start_num: usize,
    end_num: usize,
    /// Bytes consumed from the source so far.
    offset: u64,
    loaded: ChunkLedger,
    eof: bool,
    no_newline_eof: bool,
    chunk_size: usize,
}

impl Store {
    /// Creates an empty store. `chunk_size` must be non-zero.
    pub fn new(chunk_size: usize, limit: ChunkLimit) -> StoreResult<Self> {
        if chunk_size == 0 {
            return Err(StoreError::Config("chunk_size must be greater than 0".into()));
        }
        Ok(Self {
            chunks: Vec::new(),
            start_num: 0,
            end_num: 0,
            offset: 0,
            loaded: ChunkLedger::new(limit),
            eof: false,
            no_newline_eof: false,
            chunk_size,
        })
    }

    /// Drops all chunks and counters, keeping chunk size and ledger limit.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.loaded.clear();
        self.start_num = 0;
        self.end_num = 0;
        self.offset = 0;
        self.eof = false;
        self.no_newline_eof = false;
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn start_num(&self) -> usize {
        self.start_num
    }

    pub fn end_num(&self) -> usize {
        self.end_num
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn set_eof(&mut self, eof: bool) {
        self.eof = eof;
    }

    pub fn no_newline_eof(&self) -> bool {
        self.no_newline_eof
    }

    pub(crate) fn set_no_newline_eof(&mut self, value: bool) {
        self.no_newline_eof = value;
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, chunk: usize) -> Option<&Chunk> {
        self.chunks.get(chunk)
    }

    pub fn ledger(&self) -> &ChunkLedger {
        &self.loaded
    }

    pub fn chunk_of(&self, line: usize) -> usize {
        line / self.chunk_size
    }

    /// Absolute line numbers covered by `chunk`, clipped to `[start_num, end_num]`.
    ///
    /// Chunk 0 always starts at `start_num`. Chunks entirely below `start_num`
    /// or beyond `end_num` yield an empty range.
    pub fn chunk_range(&self, chunk: usize) -> Range<usize> {
        let first = chunk.saturating_mul(self.chunk_size);
        let last = first.saturating_add(self.chunk_size).min(self.end_num);
        let start = if chunk == 0 {
            self.start_num
        } else {
            first.max(self.start_num)
        };
        start..last.max(start)
    }

    /// The line at absolute number `n`, if it is viewable and resident.
    pub fn line(&self, n: usize) -> Option<&[u8]> {
        if n < self.start_num || n >= self.end_num {
            return None;
        }
        let chunk = self.chunks.get(self.chunk_of(n))?;
        chunk.line(n % self.chunk_size)
    }

    /// Whether appended bytes for `chunk` are kept in memory.
    fn retains(&self, chunk: usize) -> bool {
        chunk == 0 || self.loaded.contains(chunk)
    }

    /// Returns the index of the chunk that receives the next read unit.
    ///
    /// A pending unterminated line always goes to the last chunk, even a full
    /// one. A new chunk starts at the current read frontier and is registered
    /// with the policy for the source kind: a file chunk is only retained while
    /// the ledger has room (otherwise it is skimmed and faulted in later); a
    /// memory chunk always goes through [`Store::load_chunks_mem`].
    pub fn chunk_for_add(&mut self, is_file: bool) -> usize {
        if let Some(last) = self.chunks.len().checked_sub(1) {
            if self.no_newline_eof || self.end_num < self.chunks.len() * self.chunk_size {
                return last;
            }
        }

        let index = self.chunks.len();
        self.chunks.push(Chunk::new(self.offset));
        if index > 0 {
            if is_file {
                if !self.loaded.is_full() {
                    self.swap_loaded_file(index);
                }
            } else {
                self.load_chunks_mem(index);
            }
        }
        index
    }

    /// Appends one read unit to `chunk`.
    ///
    /// With `no_newline_eof` set the bytes are joined onto the chunk's last
    /// line and no new line is counted. The flag itself is maintained by the
    /// reader after each unit.
    pub fn append_line(&mut self, chunk: usize, line: &[u8]) {
        self.offset += line.len() as u64;
        let keep = self.retains(chunk);
        let Some(target) = self.chunks.get_mut(chunk) else {
            return;
        };

        if self.no_newline_eof {
            if keep {
                if let Some(last) = target.lines.last_mut() {
                    last.extend_from_slice(line);
                }
            }
            return;
        }

        if keep {
            target.lines.push(line.to_vec());
        }
        self.end_num += 1;
    }

    /// Replaces the lines of a chunk re-read from a seekable source.
    pub(crate) fn fill_chunk(&mut self, chunk: usize, lines: Vec<Vec<u8>>) {
        if let Some(target) = self.chunks.get_mut(chunk) {
            target.lines = lines;
        }
    }

    /// Number of lines chunk `chunk` holds when fully resident.
    pub fn expected_len(&self, chunk: usize) -> usize {
        self.end_num
            .saturating_sub(chunk.saturating_mul(self.chunk_size))
            .min(self.chunk_size)
    }

    /// Byte span of `chunk` in the source, up to the next chunk or the read frontier.
    pub fn byte_span(&self, chunk: usize) -> Option<Range<u64>> {
        let start = self.chunks.get(chunk)?.start_offset;
        let end = self
            .chunks
            .get(chunk + 1)
            .map_or(self.offset, |next| next.start_offset);
        Some(start..end.max(start))
    }

    /// Removes `chunk` from the ledger and drops its lines.
    pub fn unload_chunk(&mut self, chunk: usize) {
        self.loaded.remove(chunk);
        if let Some(target) = self.chunks.get_mut(chunk) {
            target.unload();
        }
    }

    /// File policy: marks `chunk` most recently used, then evicts least
    /// recently used chunks until the ledger is within its limit. The chunk
    /// being touched is never evicted to make room for itself.
    pub fn swap_loaded_file(&mut self, chunk: usize) {
        if chunk == 0 {
            return;
        }
        self.loaded.touch(chunk);
        while self.loaded.is_over() {
            match self.loaded.oldest() {
                Some(oldest) if oldest != chunk => {
                    tracing::trace!("evict file chunk {}", oldest);
                    self.unload_chunk(oldest);
                }
                _ => break,
            }
        }
    }

    /// Fails with [`StoreError::AlreadyLoaded`] if file chunk `chunk` is resident.
    pub fn check_file_load(&self, chunk: usize) -> StoreResult<()> {
        if chunk == 0 {
            return Ok(());
        }
        match self.chunks.get(chunk) {
            Some(target) if target.is_loaded() || self.loaded.contains(chunk) => {
                Err(StoreError::AlreadyLoaded(chunk))
            }
            _ => Ok(()),
        }
    }

    /// Memory policy: marks `chunk` most recently used. When the ledger was
    /// already at its limit, exactly one chunk (the oldest, never `chunk`) is
    /// evicted and `start_num` moves past its last line. Returns the evicted
    /// chunk.
    pub fn load_chunks_mem(&mut self, chunk: usize) -> Option<usize> {
        if chunk == 0 {
            return None;
        }
        let was_full = self.loaded.is_full();
        self.loaded.touch(chunk);
        if !was_full {
            return None;
        }

        let oldest = self.loaded.oldest().filter(|&oldest| oldest != chunk)?;
        let slide_to = self.chunk_range_end(oldest);
        self.unload_chunk(oldest);
        self.start_num = self.start_num.max(slide_to);
        tracing::debug!(
            "evicted memory chunk {}, lines before {} are gone",
            oldest,
            self.start_num
        );
        Some(oldest)
    }

    fn chunk_range_end(&self, chunk: usize) -> usize {
        (chunk + 1)
            .saturating_mul(self.chunk_size)
            .min(self.end_num)
    }

    /// Whether another read-ahead pass is allowed under `limit` (`<= 0` is unbounded).
    pub fn is_continue_read(&self, limit: i64) -> bool {
        match ChunkLimit::from_signed(limit) {
            ChunkLimit::Unbounded => true,
            ChunkLimit::Bounded(limit) => self.loaded.len() < limit,
        }
    }

    /// Whether `chunk` can be used without faulting it in first.
    ///
    /// Chunk 0 is anchored. Non-file chunks can never be re-read, so they count
    /// as loaded whether or not data is still present.
    pub fn is_loaded_chunk(&self, chunk: usize, is_file: bool) -> bool {
        if chunk == 0 || !is_file {
            return true;
        }
        self.loaded.contains(chunk)
    }

    /// Runs `searcher` over the resident lines of `chunk`, starting at absolute
    /// line `from` and moving in `direction`. Returns the first matching line.
    pub fn search_chunk(
        &self,
        chunk: usize,
        from: usize,
        direction: SearchDirection,
        searcher: &dyn Searcher,
    ) -> Option<usize> {
        let range = self.chunk_range(chunk);
        if range.is_empty() {
            return None;
        }
        let target = self.chunks.get(chunk)?;
        let base = chunk * self.chunk_size;
        let matches = |n: &usize| {
            target
                .line(n - base)
                .is_some_and(|line| searcher.is_match(line))
        };

        match direction {
            SearchDirection::Forward => (from.max(range.start)..range.end).find(matches),
            SearchDirection::Backward => {
                if from < range.start {
                    return None;
                }
                let upper = from.min(range.end - 1);
                (range.start..=upper).rev().find(matches)
            }
        }
    }
}
