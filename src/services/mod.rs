//! Logging services
//!
//! Log file placement, the tracing subscriber, and the layers that feed
//! tracing output back to the pager (status line and log document).

pub mod log_dirs;
pub mod log_document;
pub mod status_log;
pub mod tracing_setup;
