//! Glob matching with completion tracking.
//!
//! Patterns behave like tar filename operands: `*` matches within a path
//! segment only, and each pattern remembers whether anything has matched it
//! so unmatched patterns can be reported at the end of the run.

use glob::{MatchOptions, Pattern};

use crate::error::{ImageError, Result};

/// A single-segment `*`; globs never cross `/`.
fn match_options() -> MatchOptions {
    MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    }
}

#[derive(Debug)]
struct PatternState {
    raw: String,
    pattern: Pattern,
    matched: bool,
}

/// Tracks which of the requested patterns have been satisfied.
#[derive(Debug)]
pub struct PatternMatcher {
    patterns: Vec<PatternState>,
    fast_read: bool,
}

impl PatternMatcher {
    /// Compiles `patterns`; with `fast_read`, scanning can stop once every
    /// pattern has matched at least once.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn new<S: AsRef<str>>(patterns: &[S], fast_read: bool) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Pattern::new(raw)
                    .map(|pattern| PatternState {
                        raw: raw.to_string(),
                        pattern,
                        matched: false,
                    })
                    .map_err(|source| ImageError::Pattern {
                        pattern: raw.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            fast_read,
        })
    }

    /// Returns whether `name` is selected. With no patterns everything is.
    /// The first matching pattern is flagged as satisfied; the same name may
    /// satisfy different patterns across calls.
    pub fn matches(&mut self, name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let options = match_options();
        for state in &mut self.patterns {
            if state.pattern.matches_with(name, options) {
                state.matched = true;
                return true;
            }
        }
        false
    }

    /// False only when fast-read is on and every pattern has been satisfied;
    /// the caller then stops scanning further layers.
    #[must_use]
    pub fn still_matching(&self) -> bool {
        !self.fast_read || self.patterns.is_empty() || !self.unmatched().is_empty()
    }

    /// Patterns nothing has matched yet, in the order they were given.
    #[must_use]
    pub fn unmatched(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .filter(|state| !state.matched)
            .map(|state| state.raw.as_str())
            .collect()
    }
}
