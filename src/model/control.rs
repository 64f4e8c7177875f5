//! Control loop: the single writer of a document's store.
//!
//! Requests arrive over an unbounded tokio channel and run one at a time on a
//! dedicated thread. Blocking requests carry a oneshot sender for their
//! result; fire-and-forget requests only log failures.
//!
//! Source reads happen without holding the store lock. Each pass reads a
//! batch of units, then commits the batch under the write lock.

use std::io::{self, BufRead, BufReader, Read};
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::oneshot;

use super::error::{RequestKind, StoreError, StoreResult};
use super::source::{ByteSource, SourceOpener};
use super::store::{SearchDirection, Store};
use crate::config::StoreConfig;
use crate::search::Searcher;

/// Units read between commits and cancellation checks.
const READ_BATCH: usize = 1024;

pub(crate) type Completion = oneshot::Sender<StoreResult<Option<usize>>>;

pub(crate) enum Request {
    Start,
    Continue,
    Follow,
    Load {
        chunk: usize,
    },
    Search {
        chunk: usize,
        from: usize,
        direction: SearchDirection,
        searcher: Arc<dyn Searcher>,
    },
    Reload,
    Close,
    Append(Vec<u8>),
}

impl Request {
    pub(crate) fn kind(&self) -> RequestKind {
        match self {
            Request::Start => RequestKind::Start,
            Request::Continue => RequestKind::Continue,
            Request::Follow => RequestKind::Follow,
            Request::Load { .. } => RequestKind::Load,
            Request::Search { .. } => RequestKind::Search,
            Request::Reload => RequestKind::Reload,
            Request::Close => RequestKind::Close,
            Request::Append(_) => RequestKind::Append,
        }
    }
}

pub(crate) struct Control {
    pub request: Request,
    pub done: Option<Completion>,
}

/// State shared between a document handle and its control loop.
pub(crate) struct Shared {
    store: RwLock<Store>,
    pub closed: AtomicBool,
    pub read_cancel: AtomicBool,
    pub is_file: bool,
    pub config: StoreConfig,
}

impl Shared {
    pub(crate) fn new(store: Store, is_file: bool, config: StoreConfig) -> Self {
        Self {
            store: RwLock::new(store),
            closed: AtomicBool::new(false),
            read_cancel: AtomicBool::new(false),
            is_file,
            config,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// How a read pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassEnd {
    /// The requested number of lines was read.
    Reached,
    Eof,
    Cancelled,
}

enum BatchEnd {
    Limit,
    Eof,
    Cancelled,
    Failed(io::Error),
}

/// Reads units until `max_new` new lines were seen. A unit continuing an
/// unterminated line does not count as new.
fn read_batch(
    reader: &mut impl BufRead,
    max_new: usize,
    mut joining: bool,
    cancel: &AtomicBool,
) -> (Vec<Vec<u8>>, BatchEnd) {
    let mut units = Vec::new();
    let mut new_lines = 0;
    while new_lines < max_new {
        if cancel.load(Ordering::Relaxed) {
            return (units, BatchEnd::Cancelled);
        }
        let mut unit = Vec::new();
        match reader.read_until(b'\n', &mut unit) {
            Ok(0) => return (units, BatchEnd::Eof),
            Ok(_) => {
                if !joining {
                    new_lines += 1;
                }
                joining = !unit.ends_with(b"\n");
                units.push(unit);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return (units, BatchEnd::Failed(e)),
        }
    }
    (units, BatchEnd::Limit)
}

/// What the loop drives: a re-openable byte source, or an in-memory log.
pub(crate) enum Backing {
    Source {
        opener: Box<dyn SourceOpener>,
        reader: Option<BufReader<Box<dyn ByteSource>>>,
    },
    Log,
}

pub(crate) struct ControlLoop {
    shared: Arc<Shared>,
    backing: Backing,
    requests: WeakUnboundedSender<Control>,
    name: String,
}

impl ControlLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        backing: Backing,
        requests: WeakUnboundedSender<Control>,
        name: String,
    ) -> Self {
        Self {
            shared,
            backing,
            requests,
            name,
        }
    }

    pub(crate) fn spawn(self, rx: UnboundedReceiver<Control>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("tailpage-control".to_string())
            .spawn(move || self.run(rx))
    }

    fn run(mut self, mut rx: UnboundedReceiver<Control>) {
        tracing::debug!("control loop started for {}", self.name);
        while let Some(Control { request, done }) = rx.blocking_recv() {
            let kind = request.kind();
            let result = match panic::catch_unwind(AssertUnwindSafe(|| self.handle(request))) {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!("{}: protocol violation on {} request, aborting", self.name, kind);
                    process::abort();
                }
            };
            match done {
                Some(done) => {
                    // The requester may have given up waiting.
                    let _ = done.send(result);
                }
                None => match result {
                    Ok(_) => {}
                    Err(e @ (StoreError::OverChunkLimit | StoreError::AlreadyClosed(_))) => {
                        tracing::debug!("{} {}: {}", self.name, kind, e);
                    }
                    Err(e) => tracing::warn!("{} {} failed: {}", self.name, kind, e),
                },
            }
        }
        tracing::debug!("control loop for {} exiting", self.name);
    }

    fn handle(&mut self, request: Request) -> StoreResult<Option<usize>> {
        let kind = request.kind();
        if self.shared.is_closed() && !matches!(kind, RequestKind::Reload | RequestKind::Close) {
            return Err(StoreError::AlreadyClosed(kind));
        }

        if matches!(self.backing, Backing::Log) {
            return self.handle_log(request);
        }

        match request {
            Request::Start => self.start().map(|_| None),
            Request::Continue => self.continue_read().map(|_| None),
            Request::Follow => self.follow().map(|_| None),
            Request::Load { chunk } => self.load(chunk).map(|_| None),
            Request::Search {
                chunk,
                from,
                direction,
                searcher,
            } => self.search(chunk, from, direction, searcher.as_ref()),
            Request::Reload => self.reload().map(|_| None),
            Request::Close => self.close().map(|_| None),
            Request::Append(_) => panic!("unexpected {kind} request for {}", self.name),
        }
    }

    fn handle_log(&mut self, request: Request) -> StoreResult<Option<usize>> {
        match request {
            Request::Append(bytes) => {
                self.append(&bytes);
                Ok(None)
            }
            Request::Load { chunk } => {
                self.load_mem(chunk);
                Ok(None)
            }
            Request::Search {
                chunk,
                from,
                direction,
                searcher,
            } => Ok(self
                .shared
                .read()
                .search_chunk(chunk, from, direction, searcher.as_ref())),
            Request::Reload => {
                self.shared.write().reset();
                self.shared.closed.store(false, Ordering::Release);
                Ok(None)
            }
            Request::Close => self.close().map(|_| None),
            other => panic!("unexpected {} request for log document", other.kind()),
        }
    }

    fn enqueue(&self, request: Request) {
        if let Some(tx) = self.requests.upgrade() {
            let _ = tx.send(Control {
                request,
                done: None,
            });
        }
    }

    fn reader_mut(&mut self) -> Option<&mut BufReader<Box<dyn ByteSource>>> {
        match &mut self.backing {
            Backing::Source { reader, .. } => reader.as_mut(),
            Backing::Log => None,
        }
    }

    fn commit(&self, units: &[Vec<u8>], eof: bool) {
        let is_file = self.shared.is_file;
        let mut store = self.shared.write();
        for unit in units {
            let chunk = store.chunk_for_add(is_file);
            store.append_line(chunk, unit);
            store.set_no_newline_eof(!unit.ends_with(b"\n"));
        }
        store.set_eof(eof);
    }

    /// Reads until `end_num` reaches `target` (or to EOF without a target).
    fn read_pass(&mut self, target: Option<usize>) -> StoreResult<PassEnd> {
        loop {
            let (end_num, joining) = {
                let store = self.shared.read();
                (store.end_num(), store.no_newline_eof())
            };
            let remaining = target.map_or(usize::MAX, |t| t.saturating_sub(end_num));
            if remaining == 0 {
                return Ok(PassEnd::Reached);
            }

            let shared = Arc::clone(&self.shared);
            let Some(reader) = self.reader_mut() else {
                // A missing source reads as an empty one.
                shared.write().set_eof(true);
                return Ok(PassEnd::Eof);
            };
            let (units, end) =
                read_batch(reader, remaining.min(READ_BATCH), joining, &shared.read_cancel);
            self.commit(&units, matches!(end, BatchEnd::Eof));

            match end {
                BatchEnd::Limit => {}
                BatchEnd::Eof => return Ok(PassEnd::Eof),
                BatchEnd::Cancelled => {
                    tracing::debug!("read of {} cancelled", self.name);
                    return Ok(PassEnd::Cancelled);
                }
                BatchEnd::Failed(e) => return Err(e.into()),
            }
        }
    }

    fn next_boundary(&self) -> usize {
        let store = self.shared.read();
        (store.end_num() / store.chunk_size() + 1) * store.chunk_size()
    }

    fn start(&mut self) -> StoreResult<()> {
        let target = self.next_boundary();
        if self.read_pass(Some(target))? == PassEnd::Reached {
            self.enqueue(Request::Continue);
        }
        Ok(())
    }

    fn continue_read(&mut self) -> StoreResult<()> {
        if !self.shared.is_file
            && !self
                .shared
                .read()
                .is_continue_read(self.shared.config.load_chunks_limit)
        {
            return Err(StoreError::OverChunkLimit);
        }
        self.start()
    }

    fn follow(&mut self) -> StoreResult<()> {
        if !self.shared.is_file {
            return self.continue_read();
        }

        let len = self
            .reader_mut()
            .and_then(|reader| reader.get_ref().byte_len());
        let offset = self.shared.read().offset();
        if len.is_some_and(|len| len < offset) {
            tracing::info!("{} shrank below the read frontier, reloading", self.name);
            return self.reopen(false);
        }
        self.read_pass(None).map(|_| ())
    }

    /// Reads forward until chunk `chunk` has been started or the source ends.
    fn scan_to(&mut self, chunk: usize) -> StoreResult<()> {
        loop {
            {
                let store = self.shared.read();
                if chunk < store.num_chunks() || store.is_eof() {
                    return Ok(());
                }
                if !self.shared.is_file
                    && !store.is_continue_read(self.shared.config.load_chunks_limit)
                {
                    return Err(StoreError::OverChunkLimit);
                }
            }
            let target = self.next_boundary();
            if self.read_pass(Some(target))? == PassEnd::Cancelled {
                return Ok(());
            }
        }
    }

    fn load(&mut self, chunk: usize) -> StoreResult<()> {
        self.scan_to(chunk)?;
        if !self.shared.is_file {
            if self.load_mem(chunk) && !self.shared.read().is_eof() {
                self.enqueue(Request::Continue);
            }
            return Ok(());
        }
        self.load_file(chunk)
    }

    /// Memory-policy touch of a resident chunk. Returns whether a chunk was evicted.
    fn load_mem(&mut self, chunk: usize) -> bool {
        let mut store = self.shared.write();
        if chunk == 0 || !store.ledger().contains(chunk) {
            return false;
        }
        store.load_chunks_mem(chunk).is_some()
    }

    fn load_file(&mut self, chunk: usize) -> StoreResult<()> {
        let (span, expected, frontier) = {
            let store = self.shared.read();
            if chunk == 0 || chunk >= store.num_chunks() {
                return Ok(());
            }
            store.check_file_load(chunk)?;
            let Some(span) = store.byte_span(chunk) else {
                return Ok(());
            };
            (span, store.expected_len(chunk), store.offset())
        };

        let Backing::Source { reader, .. } = &mut self.backing else {
            return Ok(());
        };
        let Some(buffered) = reader.take() else {
            return Ok(());
        };
        let mut source = buffered.into_inner();
        let lines = read_span(source.as_mut(), span.start, span.end - span.start, expected);
        let restored = source.seek_to(frontier);
        *reader = Some(BufReader::new(source));
        let lines = lines?;
        restored?;

        tracing::trace!("reloaded file chunk {} ({} lines)", chunk, lines.len());
        let mut store = self.shared.write();
        store.swap_loaded_file(chunk);
        store.fill_chunk(chunk, lines);
        Ok(())
    }

    fn search(
        &mut self,
        chunk: usize,
        from: usize,
        direction: SearchDirection,
        searcher: &dyn Searcher,
    ) -> StoreResult<Option<usize>> {
        // Resident stream chunks are searched in place; a touch could evict them.
        let loaded = if self.shared.is_file {
            self.load(chunk)
        } else {
            self.scan_to(chunk)
        };
        match loaded {
            Ok(()) => {}
            Err(e) if e.is_benign() => {}
            Err(e) => return Err(e),
        }
        Ok(self
            .shared
            .read()
            .search_chunk(chunk, from, direction, searcher))
    }

    fn reload(&mut self) -> StoreResult<()> {
        let Backing::Source { opener, .. } = &self.backing else {
            return Ok(());
        };
        if !opener.can_open() {
            tracing::info!("{} cannot be reopened, keeping what was read", self.name);
            self.shared.closed.store(false, Ordering::Release);
            return Ok(());
        }
        self.reopen(self.shared.config.watch)
    }

    /// Opens a fresh source and queues a start. With `keep`, chunks already in
    /// the store survive when the new source can resume from the frontier.
    fn reopen(&mut self, keep: bool) -> StoreResult<()> {
        let Backing::Source { opener, reader } = &mut self.backing else {
            return Ok(());
        };
        let mut source = opener.open()?;
        self.shared.closed.store(false, Ordering::Release);

        let offset = self.shared.read().offset();
        let resumable = keep
            && offset > 0
            && source.is_seekable()
            && source.byte_len().is_some_and(|len| len >= offset);
        if resumable {
            source.seek_to(offset)?;
            self.shared.write().set_eof(false);
            tracing::debug!("{} reopened at byte {}", self.name, offset);
        } else {
            self.shared.write().reset();
            tracing::debug!("{} reopened from the start", self.name);
        }
        *reader = Some(BufReader::new(source));
        self.enqueue(Request::Start);
        Ok(())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.shared.closed.store(true, Ordering::Release);
        if let Backing::Source { reader, .. } = &mut self.backing {
            *reader = None;
        }
        self.shared.read_cancel.store(false, Ordering::Release);
        tracing::debug!("{} closed", self.name);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) {
        let units: Vec<Vec<u8>> = bytes
            .split_inclusive(|b| *b == b'\n')
            .map(<[u8]>::to_vec)
            .collect();
        self.commit(&units, false);
    }
}

/// Re-reads `len` bytes starting at `start` as at most `expected` lines.
fn read_span(
    source: &mut dyn ByteSource,
    start: u64,
    len: u64,
    expected: usize,
) -> io::Result<Vec<Vec<u8>>> {
    source.seek_to(start)?;
    let mut limited = BufReader::new(Read::take(&mut *source, len));
    let mut lines: Vec<Vec<u8>> = Vec::with_capacity(expected);
    loop {
        let mut unit = Vec::new();
        if limited.read_until(b'\n', &mut unit)? == 0 {
            break;
        }
        if lines.len() >= expected {
            break;
        }
        lines.push(unit);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ledger::ChunkLimit;
    use std::io::Cursor;

    #[test]
    fn test_read_batch_counts_joined_unit_as_continuation() {
        let mut reader = Cursor::new(b"tail\nnext\nmore\n".to_vec());
        let cancel = AtomicBool::new(false);
        let (units, end) = read_batch(&mut reader, 2, true, &cancel);
        assert_eq!(units, vec![b"tail\n".to_vec(), b"next\n".to_vec(), b"more\n".to_vec()]);
        assert!(matches!(end, BatchEnd::Limit));
    }

    #[test]
    fn test_read_batch_stops_at_eof() {
        let mut reader = Cursor::new(b"a\nb".to_vec());
        let cancel = AtomicBool::new(false);
        let (units, end) = read_batch(&mut reader, 10, false, &cancel);
        assert_eq!(units, vec![b"a\n".to_vec(), b"b".to_vec()]);
        assert!(matches!(end, BatchEnd::Eof));
    }

    #[test]
    fn test_read_batch_honours_cancel() {
        let mut reader = Cursor::new(b"a\nb\n".to_vec());
        let cancel = AtomicBool::new(true);
        let (units, end) = read_batch(&mut reader, 10, false, &cancel);
        assert!(units.is_empty());
        assert!(matches!(end, BatchEnd::Cancelled));
    }

    fn log_loop() -> ControlLoop {
        let store = Store::new(4, ChunkLimit::Unbounded).unwrap();
        let shared = Arc::new(Shared::new(store, false, StoreConfig::default()));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        ControlLoop::new(shared, Backing::Log, tx.downgrade(), "log".to_string())
    }

    #[test]
    #[should_panic(expected = "unexpected start request for log document")]
    fn test_start_on_log_document_is_a_violation() {
        let _ = log_loop().handle(Request::Start);
    }

    #[test]
    fn test_log_document_handles_append_and_search() {
        let mut control = log_loop();
        control.handle(Request::Append(b"x\nneedle\n".to_vec())).unwrap();
        let found = control
            .handle(Request::Search {
                chunk: 0,
                from: 0,
                direction: SearchDirection::Forward,
                searcher: Arc::new(crate::search::RegexSearcher::literal("needle", true).unwrap()),
            })
            .unwrap();
        assert_eq!(found, Some(1));
    }

    #[test]
    fn test_request_kinds() {
        assert_eq!(Request::Load { chunk: 3 }.kind(), RequestKind::Load);
        assert_eq!(Request::Append(Vec::new()).kind(), RequestKind::Append);
    }
}
