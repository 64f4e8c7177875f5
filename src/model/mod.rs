//! Core data model for documents
//!
//! Chunks, the eviction ledger and the store are plain data. The control loop
//! is the only writer; [`document::Document`] is the handle callers hold.

pub mod chunk;
pub mod control;
pub mod document;
pub mod error;
pub mod ledger;
pub mod source;
pub mod store;
