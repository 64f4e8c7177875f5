//! Routes formatted tracing output into a log [`Document`].
//!
//! Every write becomes an `append` request, so log lines show up in the
//! document in the order they were emitted.

use std::io;

use tokio::sync::mpsc::UnboundedSender;
use tracing_subscriber::fmt::MakeWriter;

use crate::model::control::{Control, Request};
use crate::model::document::Document;

#[derive(Clone)]
pub struct DocumentLogWriter {
    tx: UnboundedSender<Control>,
}

impl DocumentLogWriter {
    /// Writer appending to `doc`, which should come from [`Document::new_log`].
    pub fn new(doc: &Document) -> Self {
        Self { tx: doc.sender() }
    }
}

impl io::Write for DocumentLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let append = Control {
            request: Request::Append(buf.to_vec()),
            done: None,
        };
        self.tx
            .send(append)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "log document closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DocumentLogWriter {
    type Writer = DocumentLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
