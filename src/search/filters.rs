//! Heuristic filter extraction
//!
//! A declarative rule table maps recognized phrase patterns to predicate
//! fragments over the known attributes. This is best-effort: fragments
//! that match nothing in the table are silently left to the embedding to
//! handle.

use super::Predicate;
use regex::Regex;

/// What a matched rule contributes to the predicate set
enum RuleOutcome {
    Gender(&'static str),
    AgeBucket(&'static str),
    Condition(&'static str),
    /// Window built from captured count and unit ("3 months" -> 90 days)
    VisitWindow,
}

struct FilterRule {
    pattern: Regex,
    outcome: RuleOutcome,
}

/// Rule-table extractor over gender, age bucket, condition, and
/// visit-recency phrases
pub struct FilterExtractor {
    rules: Vec<FilterRule>,
}

impl FilterExtractor {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Extract the predicate set for a query. Queries are matched
    /// lowercase; each rule contributes at most one predicate.
    pub fn extract(&self, query: &str) -> Vec<Predicate> {
        let query = query.to_lowercase();
        let mut predicates = Vec::new();

        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(&query) else {
                continue;
            };

            let predicate = match &rule.outcome {
                RuleOutcome::Gender(value) => Predicate::GenderIs(value.to_string()),
                RuleOutcome::AgeBucket(value) => Predicate::AgeBucketIs(value.to_string()),
                RuleOutcome::Condition(value) => Predicate::HasCondition(value.to_string()),
                RuleOutcome::VisitWindow => {
                    let Some(days) = window_days(&captures) else {
                        continue;
                    };
                    Predicate::VisitedWithinDays(days)
                }
            };

            if !predicates.contains(&predicate) {
                predicates.push(predicate);
            }
        }

        predicates
    }
}

impl Default for FilterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn window_days(captures: &regex::Captures) -> Option<i64> {
    let count: i64 = match captures.name("count") {
        Some(m) => m.as_str().parse().ok()?,
        None => 1,
    };
    let per_unit = match captures.name("unit")?.as_str() {
        "day" => 1,
        "week" => 7,
        "month" => 30,
        "year" => 365,
        _ => return None,
    };
    Some(count * per_unit)
}

fn rule(pattern: &str, outcome: RuleOutcome) -> FilterRule {
    FilterRule {
        // Table patterns are static; a malformed one is a programming error
        pattern: Regex::new(pattern).unwrap(),
        outcome,
    }
}

fn default_rules() -> Vec<FilterRule> {
    vec![
        // Gender. "women" would also hit a naive /men/ pattern; word
        // boundaries keep the two rules disjoint.
        rule(r"\b(female|females|woman|women)\b", RuleOutcome::Gender("female")),
        rule(r"\b(male|males|man|men)\b", RuleOutcome::Gender("male")),
        // Age buckets
        rule(
            r"\b(?:65\s*(?:\+|and older|or older|and over)|over\s+65|aged\s+65|elderly|seniors?)\b",
            RuleOutcome::AgeBucket("65+"),
        ),
        rule(
            r"\b(?:middle[\s-]aged|40\s*(?:-|to)\s*64)\b",
            RuleOutcome::AgeBucket("40-64"),
        ),
        rule(
            r"\b(?:young\s+adults?|18\s*(?:-|to)\s*39)\b",
            RuleOutcome::AgeBucket("18-39"),
        ),
        rule(
            r"\b(?:under\s+18|children|kids|pediatric|minors?)\b",
            RuleOutcome::AgeBucket("0-17"),
        ),
        // Condition vocabulary
        rule(r"\b(?:diabetes|diabetic)\b", RuleOutcome::Condition("diabetes")),
        rule(
            r"\b(?:hypertension|hypertensive|high blood pressure)\b",
            RuleOutcome::Condition("hypertension"),
        ),
        rule(r"\b(?:asthma|asthmatic)\b", RuleOutcome::Condition("asthma")),
        rule(r"\bcopd\b", RuleOutcome::Condition("copd")),
        rule(r"\b(?:depression|depressive)\b", RuleOutcome::Condition("depression")),
        rule(r"\b(?:obesity|obese)\b", RuleOutcome::Condition("obesity")),
        rule(
            r"\b(?:heart failure|chf)\b",
            RuleOutcome::Condition("heart failure"),
        ),
        rule(
            r"\b(?:atrial fibrillation|afib)\b",
            RuleOutcome::Condition("atrial fibrillation"),
        ),
        // Visit recency: "seen in the last 6 months", "visited within the
        // past year"
        rule(
            r"\b(?:seen|visited|visit|encounter)\s+(?:in|within)\s+the\s+(?:last|past)\s+(?:(?<count>\d+)\s+)?(?<unit>day|week|month|year)s?\b",
            RuleOutcome::VisitWindow,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_and_age_extraction() {
        let extractor = FilterExtractor::new();
        let predicates = extractor.extract("female patients aged 65 and older with chest pain");

        assert!(predicates.contains(&Predicate::GenderIs("female".to_string())));
        assert!(predicates.contains(&Predicate::AgeBucketIs("65+".to_string())));
    }

    #[test]
    fn test_women_does_not_match_male() {
        let extractor = FilterExtractor::new();
        let predicates = extractor.extract("elderly women");

        assert!(predicates.contains(&Predicate::GenderIs("female".to_string())));
        assert!(!predicates.contains(&Predicate::GenderIs("male".to_string())));
    }

    #[test]
    fn test_condition_vocabulary() {
        let extractor = FilterExtractor::new();
        let predicates = extractor.extract("diabetic men with high blood pressure");

        assert!(predicates.contains(&Predicate::HasCondition("diabetes".to_string())));
        assert!(predicates.contains(&Predicate::HasCondition("hypertension".to_string())));
        assert!(predicates.contains(&Predicate::GenderIs("male".to_string())));
    }

    #[test]
    fn test_visit_window() {
        let extractor = FilterExtractor::new();

        let predicates = extractor.extract("patients seen in the last 6 months");
        assert!(predicates.contains(&Predicate::VisitedWithinDays(180)));

        // Missing count defaults to one unit
        let predicates = extractor.extract("patients visited within the past year");
        assert!(predicates.contains(&Predicate::VisitedWithinDays(365)));
    }

    #[test]
    fn test_unrecognized_query_yields_empty_set() {
        let extractor = FilterExtractor::new();
        let predicates = extractor.extract("recurring dizziness after standing up");
        assert!(predicates.is_empty());
    }

    #[test]
    fn test_duplicate_phrases_collapse() {
        let extractor = FilterExtractor::new();
        let predicates = extractor.extract("women, female patients, women again");
        assert_eq!(predicates.len(), 1);
    }
}
