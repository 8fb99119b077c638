//! Orchestrator configuration.

use crate::transaction::DEFAULT_POOL_CAPACITY;
use crate::transform::{PassKind, Pipeline};

/// Cap on deferred-work rounds drained by a single commit.
pub const DEFAULT_MAX_DEFERRED_ROUNDS: usize = 64;

/// Incremental parser configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Cleared transaction records kept for reuse.
    pub pool_capacity: usize,
    /// Deferred instantiation rounds before a commit gives up.
    pub max_deferred_rounds: usize,
    /// Transformer passes, in the order they run.
    pub passes: Vec<PassKind>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_deferred_rounds: DEFAULT_MAX_DEFERRED_ROUNDS,
            passes: PassKind::ALL.to_vec(),
        }
    }
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool_capacity(mut self, value: usize) -> Self {
        self.pool_capacity = value;
        self
    }

    pub fn max_deferred_rounds(mut self, value: usize) -> Self {
        self.max_deferred_rounds = value;
        self
    }

    pub fn passes(mut self, passes: Vec<PassKind>) -> Self {
        self.passes = passes;
        self
    }

    /// Run no transformers at all.
    pub fn without_transformers(self) -> Self {
        self.passes(Vec::new())
    }

    pub(crate) fn build_pipeline(&self) -> Pipeline {
        Pipeline::from_kinds(&self.passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ParserConfig::default();
        assert_eq!(config.max_deferred_rounds, 64);
        assert_eq!(config.build_pipeline().len(), 4);
        assert!(config.without_transformers().build_pipeline().is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ParserConfig::new()
            .pool_capacity(2)
            .max_deferred_rounds(3)
            .passes(vec![PassKind::DeclExtractor]);
        assert_eq!(config.pool_capacity, 2);
        assert_eq!(config.build_pipeline().pass_names(), vec!["DeclExtractor"]);
    }
}
