//! Tracing subscriber setup
//!
//! Shared between the binary and tests: a file log, an `EnvFilter`, and two
//! optional layers (one feeding a log document, one feeding the status line).

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use super::log_document::DocumentLogWriter;
use super::status_log::{StatusHandle, StatusLayer};

/// Initialize the global subscriber logging to `log_file_path`, with status
/// capture. Returns `None` if the file or the warnings log cannot be created,
/// or a global subscriber is already set.
pub fn init_global(log_file_path: &Path) -> Option<StatusHandle> {
    let (status_layer, status_handle) = super::status_log::create().ok()?;
    let log_file = File::create(log_file_path).ok()?;

    build_subscriber(log_file, None, Some(status_layer))
        .try_init()
        .ok()?;

    Some(status_handle)
}

/// Build a subscriber with file logging and optional log-document and status layers.
pub fn build_subscriber(
    log_file: File,
    log_document: Option<DocumentLogWriter>,
    status_layer: Option<StatusLayer>,
) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into());

    let fmt_layer = fmt::layer().with_writer(Arc::new(log_file));
    let document_layer = log_document.map(|writer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .with(document_layer)
        .with(status_layer)
}
