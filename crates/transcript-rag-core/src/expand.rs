//! Rule-based query expansion.
//!
//! [`QueryExpander::expand`] produces up to [`MAX_VARIANTS`] paraphrases of
//! a query to improve recall. The original query is always first. Rules
//! add domain framing, framework/approach framing, and a punctuation-free
//! form. No network or model calls are made and expansion cannot fail.

use std::collections::HashSet;

/// Upper bound on variants returned, including the original.
pub const MAX_VARIANTS: usize = 5;

/// Domain words spliced into rewritten variants.
#[derive(Debug, Clone)]
pub struct ExpansionVocabulary {
    /// Terms whose presence means the query already names the role.
    pub role_terms: Vec<String>,
    /// Plural practitioner noun, as in "how do {practitioners} …".
    pub practitioners: String,
    /// Field name, as in "what is {field} …" and "… in {field}".
    pub field: String,
}

impl Default for ExpansionVocabulary {
    fn default() -> Self {
        Self {
            role_terms: vec!["product manager".into(), "pm".into()],
            practitioners: "product managers".into(),
            field: "product management".into(),
        }
    }
}

/// Deterministic query expander.
#[derive(Debug, Clone, Default)]
pub struct QueryExpander {
    vocab: ExpansionVocabulary,
}

impl QueryExpander {
    pub fn new(vocab: ExpansionVocabulary) -> Self {
        Self { vocab }
    }

    /// Expand `query` into at most [`MAX_VARIANTS`] variants.
    ///
    /// Variants are deduplicated case-insensitively after trimming, keeping
    /// the first occurrence.
    pub fn expand(&self, query: &str) -> Vec<String> {
        let mut variants = vec![query.to_string()];
        let lower = query.to_lowercase();

        let names_role = self.vocab.role_terms.iter().any(|t| lower.contains(t.as_str()));
        if !names_role {
            if let Some(rest) = lower.strip_prefix("how to") {
                variants.push(format!("how do {} {}", self.vocab.practitioners, rest.trim()));
            } else if let Some(rest) = lower.strip_prefix("what is") {
                variants.push(format!("what is {} {}", self.vocab.field, rest.trim()));
            }
        }

        if !lower.contains("framework") && !lower.contains("approach") {
            if lower.contains("how to") || lower.contains("how do") {
                variants.push(format!("framework for {}", lower));
                variants.push(format!("approach to {}", lower));
            }
        }

        if !lower.contains("leader") && !lower.contains("expert") {
            if let Some(rest) = lower.strip_prefix("how to") {
                variants.push(format!("how do leaders {}", rest.trim()));
            }
        }

        if let Some(stripped) = query.strip_suffix('?') {
            let base = stripped.trim();
            if !base.is_empty() {
                variants.push(base.to_string());
                variants.push(format!("{} in {}", base, self.vocab.field));
            }
        }

        dedup_case_insensitive(variants)
            .into_iter()
            .take(MAX_VARIANTS)
            .collect()
    }
}

fn dedup_case_insensitive(variants: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    variants
        .into_iter()
        .filter(|v| seen.insert(v.trim().to_lowercase()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_always_first() {
        let exp = QueryExpander::default();
        for q in ["How to prioritize features?", "hello", "What is PMF"] {
            assert_eq!(exp.expand(q)[0], q);
        }
    }

    #[test]
    fn test_how_to_rules_and_cap() {
        let exp = QueryExpander::default();
        let v = exp.expand("How to prioritize features?");
        assert_eq!(v.len(), MAX_VARIANTS);
        assert_eq!(v[1], "how do product managers prioritize features?");
        assert_eq!(v[2], "framework for how to prioritize features?");
        assert_eq!(v[3], "approach to how to prioritize features?");
        assert_eq!(v[4], "how do leaders prioritize features?");
    }

    #[test]
    fn test_role_term_suppresses_domain_framing() {
        let exp = QueryExpander::default();
        let v = exp.expand("What is a good PM interview");
        assert_eq!(v, vec!["What is a good PM interview".to_string()]);
    }

    #[test]
    fn test_what_is_framing() {
        let exp = QueryExpander::default();
        let v = exp.expand("what is retention");
        assert_eq!(v[1], "what is product management retention");
    }

    #[test]
    fn test_question_mark_variants() {
        let exp = QueryExpander::default();
        let v = exp.expand("Should we raise prices?");
        assert_eq!(
            v,
            vec![
                "Should we raise prices?".to_string(),
                "Should we raise prices".to_string(),
                "Should we raise prices in product management".to_string(),
            ]
        );
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let exp = QueryExpander::default();
        let v = exp.expand("framework?");
        assert_eq!(v.len(), 3);
        let v = dedup_case_insensitive(vec!["A b".into(), " a B ".into(), "c".into()]);
        assert_eq!(v, vec!["A b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_deterministic() {
        let exp = QueryExpander::default();
        let q = "How do I run a good roadmap review?";
        assert_eq!(exp.expand(q), exp.expand(q));
    }

    #[test]
    fn test_custom_vocabulary() {
        let exp = QueryExpander::new(ExpansionVocabulary {
            role_terms: vec!["engineer".into()],
            practitioners: "staff engineers".into(),
            field: "software engineering".into(),
        });
        let v = exp.expand("how to review code");
        assert_eq!(v[1], "how do staff engineers review code");
    }
}
