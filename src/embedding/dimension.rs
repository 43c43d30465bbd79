//! Dimension discovery and schema advisory
//!
//! Every vector in a collection shares one width. Resolution order:
//! explicit configuration, then a one-shot probe call, then the first
//! vector produced during ingestion. Once fixed the width is
//! authoritative; later mismatches are schema failures, never padded or
//! truncated away.

use super::provider::{EmbedError, EmbeddingProvider};
use std::sync::Mutex;

/// How the collection dimension was established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSource {
    Configured,
    Probed,
    Observed,
}

/// Fix-once advisory for the collection's vector width
pub struct DimensionAdvisor {
    state: Mutex<Option<(usize, DimensionSource)>>,
}

impl DimensionAdvisor {
    /// Create an advisor, optionally pinned by explicit configuration
    pub fn new(configured: Option<usize>) -> Self {
        Self {
            state: Mutex::new(configured.map(|dim| (dim, DimensionSource::Configured))),
        }
    }

    /// The fixed dimension, if established
    pub fn get(&self) -> Option<usize> {
        self.state.lock().unwrap().map(|(dim, _)| dim)
    }

    /// How the dimension was established, if it was
    pub fn source(&self) -> Option<DimensionSource> {
        self.state.lock().unwrap().map(|(_, source)| source)
    }

    /// Issue a one-shot probe embedding to establish the dimension before
    /// production ingestion. A no-op when the width is already fixed.
    pub async fn probe(&self, provider: &dyn EmbeddingProvider) -> Result<usize, EmbedError> {
        if let Some(dim) = self.get() {
            return Ok(dim);
        }

        let vector = provider.probe().await?;
        tracing::info!("Probe established collection dimension: {}", vector.len());
        self.fix(vector.len(), DimensionSource::Probed)
    }

    /// Fix the dimension from a produced vector, or enforce it if already fixed
    pub fn observe(&self, len: usize) -> Result<usize, EmbedError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            Some((dim, _)) if dim == len => Ok(dim),
            Some((dim, _)) => Err(EmbedError::Schema {
                expected: dim,
                actual: len,
            }),
            None => {
                *state = Some((len, DimensionSource::Observed));
                Ok(len)
            }
        }
    }

    /// Enforce an already-established dimension
    pub fn check(&self, len: usize) -> Result<(), EmbedError> {
        match self.get() {
            Some(dim) if dim == len => Ok(()),
            Some(dim) => Err(EmbedError::Schema {
                expected: dim,
                actual: len,
            }),
            None => Ok(()),
        }
    }

    fn fix(&self, dim: usize, source: DimensionSource) -> Result<usize, EmbedError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            Some((existing, _)) if existing == dim => Ok(dim),
            Some((existing, _)) => Err(EmbedError::Schema {
                expected: existing,
                actual: dim,
            }),
            None => {
                *state = Some((dim, source));
                Ok(dim)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_dimension_wins() {
        let advisor = DimensionAdvisor::new(Some(384));
        assert_eq!(advisor.get(), Some(384));
        assert_eq!(advisor.source(), Some(DimensionSource::Configured));

        assert!(advisor.observe(384).is_ok());
        assert!(matches!(
            advisor.observe(768),
            Err(EmbedError::Schema {
                expected: 384,
                actual: 768
            })
        ));
    }

    #[test]
    fn test_first_observation_fixes() {
        let advisor = DimensionAdvisor::new(None);
        assert_eq!(advisor.get(), None);
        assert!(advisor.check(123).is_ok());

        assert_eq!(advisor.observe(768).unwrap(), 768);
        assert_eq!(advisor.source(), Some(DimensionSource::Observed));

        assert!(advisor.check(768).is_ok());
        assert!(advisor.check(384).is_err());
    }

    #[test]
    fn test_mismatch_never_mutates() {
        let advisor = DimensionAdvisor::new(Some(4));
        let _ = advisor.observe(8);
        assert_eq!(advisor.get(), Some(4));
    }
}
