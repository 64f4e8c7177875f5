//! Line matchers used by document searches.
//!
//! The document core maps line numbers and keeps chunks resident; a
//! [`Searcher`] only decides whether a single line matches.

use std::sync::Arc;

use regex::bytes::{Regex, RegexBuilder};

use crate::config::SearchConfig;
use crate::model::chunk::trim_line_terminator;

pub trait Searcher: Send + Sync {
    /// Whether `line` (raw bytes, terminator included) matches.
    fn is_match(&self, line: &[u8]) -> bool;
}

/// Literal or regular-expression matcher over raw line bytes.
#[derive(Debug, Clone)]
pub struct RegexSearcher {
    regex: Regex,
}

impl RegexSearcher {
    pub fn literal(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        Self::regex(&regex::escape(pattern), case_sensitive)
    }

    pub fn regex(pattern: &str, case_sensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!case_sensitive)
            .build()?;
        Ok(Self { regex })
    }
}

impl Searcher for RegexSearcher {
    fn is_match(&self, line: &[u8]) -> bool {
        self.regex.is_match(trim_line_terminator(line))
    }
}

/// Smart case turns sensitivity on for patterns containing an uppercase letter.
pub fn is_case_sensitive(pattern: &str, config: &SearchConfig) -> bool {
    config.case_sensitive || (config.smart_case && pattern.chars().any(char::is_uppercase))
}

/// Builds the searcher described by `config` for `pattern`.
pub fn new_searcher(pattern: &str, config: &SearchConfig) -> Result<Arc<dyn Searcher>, regex::Error> {
    let case_sensitive = is_case_sensitive(pattern, config);
    let searcher = if config.regexp {
        RegexSearcher::regex(pattern, case_sensitive)?
    } else {
        RegexSearcher::literal(pattern, case_sensitive)?
    };
    Ok(Arc::new(searcher))
}
