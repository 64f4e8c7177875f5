// Pager document store - exposes the core modules for the binary and tests

pub mod config;
pub mod model;
pub mod search;
pub mod services;

pub use config::{Config, SearchConfig, StoreConfig};
pub use model::document::{Bounds, Document};
pub use model::error::{RequestKind, StoreError, StoreResult};
pub use model::store::SearchDirection;
pub use search::{new_searcher, RegexSearcher, Searcher};
