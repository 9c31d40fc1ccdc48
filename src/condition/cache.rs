//! Memoization of parsed conditions.
//!
//! Many attributes of a standard edition share the exact same condition
//! wording, and parsing is a pure function of the text, so parse results
//! are shared through a cache keyed by the text. The cache lives with the
//! reference model and is safe for concurrent population: two threads
//! first-parsing the same text both do the work, and the identical
//! results are reconciled on insert.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{ConditionParser, ConditionalRequirement};

/// A concurrency-safe map from condition text to its parsed requirement.
#[derive(Debug, Default)]
pub struct ConditionCache {
    inner: RwLock<HashMap<String, Arc<ConditionalRequirement>>>,
}

impl ConditionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        ConditionCache::default()
    }

    /// Fetch the parsed requirement for this text, parsing it now if it
    /// was not seen before.
    pub fn get_or_parse(
        &self,
        parser: &ConditionParser<'_>,
        text: &str,
    ) -> Arc<ConditionalRequirement> {
        {
            let cached = match self.inner.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(hit) = cached.get(text) {
                return Arc::clone(hit);
            }
        }
        // parse outside the lock; a concurrent duplicate parse of the
        // same text produces the identical value
        let parsed = Arc::new(parser.parse(text));
        let mut cached = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(cached.entry(text.to_string()).or_insert(parsed))
    }

    /// Number of distinct condition texts parsed so far.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether nothing was parsed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
