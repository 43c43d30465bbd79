//! Fused search: attribute filtering plus vector-similarity ranking
//!
//! Queries pass through filter extraction, candidate narrowing against
//! the structured store, query embedding, cosine ranking, and result
//! explanation.

mod engine;
mod filters;

pub use engine::{FusedSearchEngine, SearchError};
pub use filters::FilterExtractor;

use crate::storage::PatientAttributes;
use serde::Serialize;

/// One extracted (attribute, operator, value) filter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "attribute", content = "value")]
pub enum Predicate {
    #[serde(rename = "gender")]
    GenderIs(String),
    #[serde(rename = "age_bucket")]
    AgeBucketIs(String),
    #[serde(rename = "condition")]
    HasCondition(String),
    #[serde(rename = "visited_within_days")]
    VisitedWithinDays(i64),
}

impl Predicate {
    /// Whether this entity's attribute row satisfies the predicate
    pub fn matches(&self, attrs: &PatientAttributes, now: i64) -> bool {
        match self {
            Predicate::GenderIs(gender) => attrs.gender.as_deref() == Some(gender.as_str()),
            Predicate::AgeBucketIs(bucket) => {
                attrs.age_bucket.as_deref() == Some(bucket.as_str())
            }
            Predicate::HasCondition(condition) => attrs
                .conditions
                .iter()
                .any(|c| c.contains(condition.as_str())),
            Predicate::VisitedWithinDays(days) => attrs
                .last_visit
                .map(|visit| visit >= now - days * 86_400)
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::GenderIs(v) => write!(f, "gender={}", v),
            Predicate::AgeBucketIs(v) => write!(f, "age_bucket={}", v),
            Predicate::HasCondition(v) => write!(f, "condition~{}", v),
            Predicate::VisitedWithinDays(v) => write!(f, "last_visit>=now-{}d", v),
        }
    }
}

/// Search query
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query; filter phrases are extracted from it and the full
    /// text is embedded for ranking
    pub text: String,
    /// Maximum number of results
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

/// One ranked, explained result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entity_id: String,
    pub similarity_score: f32,
    pub rank: usize,
    /// The subset of the query's predicates this entity satisfies
    pub matched_predicates: Vec<Predicate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> PatientAttributes {
        PatientAttributes {
            entity_id: "p1".to_string(),
            gender: Some("female".to_string()),
            age_bucket: Some("65+".to_string()),
            conditions: vec!["hypertension".to_string(), "type 2 diabetes".to_string()],
            last_visit: Some(1_000_000),
        }
    }

    #[test]
    fn test_predicate_matching() {
        let attrs = attrs();
        let now = 1_000_000 + 86_400;

        assert!(Predicate::GenderIs("female".to_string()).matches(&attrs, now));
        assert!(!Predicate::GenderIs("male".to_string()).matches(&attrs, now));
        assert!(Predicate::AgeBucketIs("65+".to_string()).matches(&attrs, now));
        assert!(Predicate::HasCondition("diabetes".to_string()).matches(&attrs, now));
        assert!(Predicate::VisitedWithinDays(2).matches(&attrs, now));
        assert!(!Predicate::VisitedWithinDays(1).matches(&attrs, now - 86_400 * 3));
    }

    #[test]
    fn test_missing_attributes_never_match() {
        let attrs = PatientAttributes {
            entity_id: "p2".to_string(),
            gender: None,
            age_bucket: None,
            conditions: vec![],
            last_visit: None,
        };

        assert!(!Predicate::GenderIs("female".to_string()).matches(&attrs, 0));
        assert!(!Predicate::VisitedWithinDays(365).matches(&attrs, 0));
    }
}
