//! Document handle: the public face of a chunked line store.
//!
//! A `Document` owns the sending side of its control loop. Reads go straight
//! to the store under a read lock; everything that changes the store is a
//! request to the loop.
//!
//! Blocking requests wait on a oneshot with `blocking_recv`, so they must not
//! be called from inside an async runtime.

use std::io::Read;
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::chunk::trim_line_terminator;
use super::control::{Backing, Control, ControlLoop, Request, Shared};
use super::error::{StoreError, StoreResult};
use super::ledger::ChunkLimit;
use super::source::{FileOpener, ReaderOpener, ReopenFn, SourceOpener};
use super::store::{SearchDirection, Store};
use crate::config::StoreConfig;
use crate::search::Searcher;

/// Consistent snapshot of the viewable line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub start: usize,
    pub end: usize,
    pub eof: bool,
}

struct FollowHandle {
    stop: Arc<AtomicBool>,
}

pub struct Document {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Control>,
    follow: Option<FollowHandle>,
    is_log: bool,
    name: String,
}

impl Document {
    /// Opens a regular file. Evicted chunks are re-read from disk on demand.
    pub fn open_file(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        Self::with_opener(Box::new(FileOpener::new(path.as_ref())), config)
    }

    /// Reads a forward-only stream that cannot be reloaded.
    pub fn from_reader(reader: impl Read + Send + 'static, config: StoreConfig) -> StoreResult<Self> {
        Self::with_opener(Box::new(ReaderOpener::new(Box::new(reader), "stream")), config)
    }

    /// Reads a forward-only stream; `reopen` supplies a fresh stream on reload.
    pub fn from_reader_with_reload(
        reader: impl Read + Send + 'static,
        reopen: ReopenFn,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        let opener = ReaderOpener::new(Box::new(reader), "stream").with_reopen(reopen);
        Self::with_opener(Box::new(opener), config)
    }

    pub fn with_opener(mut opener: Box<dyn SourceOpener>, config: StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let name = opener.describe();
        let is_file = opener.is_seekable();
        let source = opener.open()?;
        let limit = if is_file {
            ChunkLimit::Bounded(config.file_load_chunks_limit)
        } else {
            ChunkLimit::from_signed(config.load_chunks_limit)
        };
        let store = Store::new(config.chunk_size, limit)?;
        let backing = Backing::Source {
            opener,
            reader: Some(std::io::BufReader::new(source)),
        };

        tracing::info!("opening {} ({})", name, if is_file { "file" } else { "stream" });
        let doc = Self::spawn(store, is_file, config, backing, name, false)?;
        doc.request_start()?;
        Ok(doc)
    }

    /// An empty in-memory document fed through [`Document::append`].
    pub fn new_log(config: StoreConfig) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let limit = ChunkLimit::from_signed(config.load_chunks_limit);
        let store = Store::new(config.chunk_size, limit)?;
        Self::spawn(store, false, config, Backing::Log, "log".to_string(), true)
    }

    fn spawn(
        store: Store,
        is_file: bool,
        config: StoreConfig,
        backing: Backing,
        name: String,
        is_log: bool,
    ) -> StoreResult<Self> {
        let shared = Arc::new(Shared::new(store, is_file, config));
        let (tx, rx) = mpsc::unbounded_channel();
        ControlLoop::new(Arc::clone(&shared), backing, tx.downgrade(), name.clone()).spawn(rx)?;
        Ok(Self {
            shared,
            tx,
            follow: None,
            is_log,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_file(&self) -> bool {
        self.shared.is_file
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn bounds(&self) -> Bounds {
        let store = self.shared.read();
        Bounds {
            start: store.start_num(),
            end: store.end_num(),
            eof: store.is_eof(),
        }
    }

    pub fn start_num(&self) -> usize {
        self.shared.read().start_num()
    }

    pub fn end_num(&self) -> usize {
        self.shared.read().end_num()
    }

    pub fn is_eof(&self) -> bool {
        self.shared.read().is_eof()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Whether the source may still produce lines that have not been read.
    pub fn has_more(&self) -> bool {
        !self.is_closed() && !self.is_eof()
    }

    pub fn chunk_of(&self, line: usize) -> usize {
        line / self.shared.config.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.shared.read().num_chunks()
    }

    /// Resident chunk indices, most recently used first. Chunk 0 is never listed.
    pub fn loaded_chunks(&self) -> Vec<usize> {
        self.shared.read().ledger().keys()
    }

    // ========================================================================
    // Lines
    // ========================================================================

    /// Copies line `n` if it is resident. Never blocks on the control loop.
    pub fn line(&self, n: usize) -> Option<Vec<u8>> {
        self.shared.read().line(n).map(<[u8]>::to_vec)
    }

    /// Line `n` as text without its terminator, if resident.
    pub fn line_str(&self, n: usize) -> Option<String> {
        let store = self.shared.read();
        let line = store.line(n)?;
        Some(String::from_utf8_lossy(trim_line_terminator(line)).into_owned())
    }

    /// Returns line `n`, faulting in its chunk when needed.
    ///
    /// `Ok(None)` means the line does not exist: it is past the end of a
    /// finished source, or it was evicted from a stream for good.
    pub fn get_line(&self, n: usize) -> StoreResult<Option<Vec<u8>>> {
        if let Some(line) = self.line(n) {
            return Ok(Some(line));
        }
        let bounds = self.bounds();
        if n < bounds.start || (n >= bounds.end && (bounds.eof || self.is_log)) {
            return Ok(None);
        }
        match self.request_load(self.chunk_of(n)) {
            Ok(()) => {}
            Err(e) if e.is_benign() => {}
            Err(e) => return Err(e),
        }
        Ok(self.line(n))
    }

    /// Lines in `range`, stopping at the first missing one.
    pub fn get_lines(&self, range: Range<usize>) -> StoreResult<Vec<Vec<u8>>> {
        let mut lines = Vec::with_capacity(range.len());
        for n in range {
            match self.get_line(n)? {
                Some(line) => lines.push(line),
                None => break,
            }
        }
        Ok(lines)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn send(&self, request: Request, done: Option<super::control::Completion>) -> StoreResult<()> {
        self.tx
            .send(Control { request, done })
            .map_err(|_| StoreError::Disconnected)
    }

    fn request_blocking(&self, request: Request) -> StoreResult<Option<usize>> {
        let (done, rx) = oneshot::channel();
        self.send(request, Some(done))?;
        rx.blocking_recv().map_err(|_| StoreError::Disconnected)?
    }

    pub fn request_start(&self) -> StoreResult<()> {
        self.send(Request::Start, None)
    }

    pub fn request_continue(&self) -> StoreResult<()> {
        self.send(Request::Continue, None)
    }

    pub fn request_follow(&self) -> StoreResult<()> {
        self.send(Request::Follow, None)
    }

    /// Makes chunk `chunk` resident, reading forward to it if necessary.
    pub fn request_load(&self, chunk: usize) -> StoreResult<()> {
        self.request_blocking(Request::Load { chunk }).map(|_| ())
    }

    /// Searches one chunk from absolute line `from`.
    pub fn request_search(
        &self,
        chunk: usize,
        from: usize,
        direction: SearchDirection,
        searcher: Arc<dyn Searcher>,
    ) -> StoreResult<Option<usize>> {
        self.request_blocking(Request::Search {
            chunk,
            from,
            direction,
            searcher,
        })
    }

    /// Cancels any in-flight read and closes the source.
    pub fn request_close(&self) -> StoreResult<()> {
        self.shared.read_cancel.store(true, Ordering::Release);
        self.request_blocking(Request::Close).map(|_| ())
    }

    /// Re-opens the source. Allowed on a closed document.
    pub fn request_reload(&self) -> StoreResult<()> {
        self.request_blocking(Request::Reload).map(|_| ())
    }

    /// Appends raw bytes to a log document.
    pub fn append(&self, bytes: impl Into<Vec<u8>>) -> StoreResult<()> {
        self.send(Request::Append(bytes.into()), None)
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<Control> {
        self.tx.clone()
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// First line at or after `from` that matches.
    pub fn search_forward(
        &self,
        from: usize,
        searcher: Arc<dyn Searcher>,
    ) -> StoreResult<Option<usize>> {
        let from = from.max(self.start_num());
        let mut chunk = self.chunk_of(from);
        loop {
            let found =
                self.request_search(chunk, from, SearchDirection::Forward, Arc::clone(&searcher))?;
            if found.is_some() {
                return Ok(found);
            }
            chunk += 1;
            let store = self.shared.read();
            if chunk >= store.num_chunks() && (store.is_eof() || self.is_log) {
                return Ok(None);
            }
        }
    }

    /// Last line at or before `from` that matches.
    pub fn search_backward(
        &self,
        from: usize,
        searcher: Arc<dyn Searcher>,
    ) -> StoreResult<Option<usize>> {
        let bounds = self.bounds();
        if bounds.end == 0 || from < bounds.start {
            return Ok(None);
        }
        let from = from.min(bounds.end - 1);
        let first = self.chunk_of(bounds.start);
        let mut chunk = self.chunk_of(from);
        loop {
            let found =
                self.request_search(chunk, from, SearchDirection::Backward, Arc::clone(&searcher))?;
            if found.is_some() || chunk <= first {
                return Ok(found);
            }
            chunk -= 1;
        }
    }

    // ========================================================================
    // Follow mode
    // ========================================================================

    pub fn is_following(&self) -> bool {
        self.follow.is_some()
    }

    /// Starts or stops sending `follow` requests every `follow_interval_ms`.
    pub fn set_follow_mode(&mut self, enabled: bool) {
        if !enabled {
            if let Some(follow) = self.follow.take() {
                follow.stop.store(true, Ordering::Release);
            }
            return;
        }
        if self.follow.is_some() {
            return;
        }
        if self.is_log {
            tracing::debug!("follow mode ignored for log document");
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let tx = self.tx.clone();
        let interval = Duration::from_millis(self.shared.config.follow_interval_ms);
        let spawned = thread::Builder::new()
            .name("tailpage-follow".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let follow = Control {
                        request: Request::Follow,
                        done: None,
                    };
                    if tx.send(follow).is_err() {
                        break;
                    }
                    thread::sleep(interval);
                }
            });
        match spawned {
            Ok(_) => self.follow = Some(FollowHandle { stop }),
            Err(e) => tracing::warn!("failed to start follow thread for {}: {}", self.name, e),
        }
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.set_follow_mode(false);
    }
}
