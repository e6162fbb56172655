//! Intent Classifier
//!
//! Matches free-text business questions against the semantic pattern
//! catalog. Pure function over immutable data: no I/O, never errors, and a
//! miss is a representable outcome rather than a failure.

use crate::catalog::{Matcher, PatternCatalog, PatternId, SemanticPattern, TemplateId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strsim::jaro_winkler;
use tracing::debug;

/// Confidence never exceeds this cap, regardless of coverage.
const CONFIDENCE_CAP: f64 = 0.95;
/// Weight of the coverage bonus: fraction of input consumed by the match.
const COVERAGE_WEIGHT: f64 = 0.20;
/// Token similarity needed for the bag-of-words fallback to count a hit.
const FALLBACK_TOKEN_SIM: f64 = 0.88;
/// Confidence assigned to fallback hits; deliberately below the regex range.
const FALLBACK_CONFIDENCE: f64 = 0.62;

/// Ranked runner-up kept for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedAlternative {
    pub pattern_id: PatternId,
    pub confidence: f64,
}

/// Outcome of a classification attempt. `pattern == None` means no pattern
/// cleared the floor; the router decides what happens next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub pattern: Option<PatternId>,
    pub template: Option<TemplateId>,
    pub parameters: HashMap<String, String>,
    pub confidence: f64,
    pub alternatives: Vec<RankedAlternative>,
}

impl ClassificationResult {
    pub fn no_match() -> Self {
        Self {
            pattern: None,
            template: None,
            parameters: HashMap::new(),
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.pattern.is_some()
    }
}

struct Candidate {
    pattern_id: PatternId,
    template: TemplateId,
    parameters: HashMap<String, String>,
    confidence: f64,
}

pub struct IntentClassifier {
    catalog: Arc<PatternCatalog>,
    /// Patterns below this confidence report as no-match.
    confidence_floor: f64,
}

impl IntentClassifier {
    pub fn new(catalog: Arc<PatternCatalog>) -> Self {
        Self {
            catalog,
            confidence_floor: 0.6,
        }
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.confidence_floor = floor.clamp(0.0, 1.0);
        self
    }

    /// Classify a question against the pattern catalog.
    ///
    /// For each pattern the matchers are tried in order; the first hit wins
    /// for that pattern. Confidence is `min(0.95, base + 0.20 * coverage)`
    /// where coverage is the fraction of the input consumed by the match.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ClassificationResult::no_match();
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for pattern in self.catalog.patterns() {
            if let Some(cand) = self.try_pattern(pattern, trimmed) {
                candidates.push(cand);
            }
        }

        self.rank(candidates, trimmed)
    }

    /// Secondary bag-of-words classifier, consulted by the engine when no
    /// regex pattern clears the floor. Scores each pattern's vocabulary
    /// against the question tokens with Jaro-Winkler similarity.
    pub fn classify_fallback(&self, text: &str) -> ClassificationResult {
        let trimmed = text.trim();
        let tokens: Vec<String> = tokenize(trimmed);
        if tokens.is_empty() {
            return ClassificationResult::no_match();
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for pattern in self.catalog.patterns() {
            let vocab = pattern_vocabulary(pattern.id);
            let mut hits = 0usize;
            for word in &vocab {
                let best = tokens
                    .iter()
                    .map(|t| jaro_winkler(word, t))
                    .fold(0.0_f64, f64::max);
                if best >= FALLBACK_TOKEN_SIM {
                    hits += 1;
                }
            }
            // Conservative: every vocabulary word must be present (modulo
            // typos the similarity threshold absorbs).
            if hits < vocab.len() {
                continue;
            }
            let Some(parameters) =
                extract_remainder(&tokens, &vocab, &pattern.parameter_names)
            else {
                continue;
            };
            candidates.push(Candidate {
                pattern_id: pattern.id,
                template: pattern.template,
                parameters,
                confidence: FALLBACK_CONFIDENCE,
            });
        }

        debug!(
            candidates = candidates.len(),
            "bag-of-words fallback classification"
        );
        self.rank(candidates, trimmed)
    }

    fn try_pattern(&self, pattern: &SemanticPattern, text: &str) -> Option<Candidate> {
        for matcher in &pattern.matchers {
            match matcher {
                Matcher::Regex(re) => {
                    if let Some(caps) = re.captures(text) {
                        let whole = caps.get(0).map(|m| m.len()).unwrap_or(0);
                        let coverage = whole as f64 / text.chars().count().max(1) as f64;
                        let confidence = (pattern.base_confidence
                            + COVERAGE_WEIGHT * coverage.min(1.0))
                        .min(CONFIDENCE_CAP);

                        let mut parameters = HashMap::new();
                        for (slot, name) in pattern.parameter_names.iter().enumerate() {
                            if let Some(m) = caps.get(slot + 1) {
                                parameters.insert(name.clone(), m.as_str().trim().to_string());
                            }
                        }
                        // A regex that matched but did not fill every slot
                        // is not a usable hit.
                        if parameters.len() != pattern.parameter_names.len() {
                            continue;
                        }
                        return Some(Candidate {
                            pattern_id: pattern.id,
                            template: pattern.template,
                            parameters,
                            confidence,
                        });
                    }
                }
                Matcher::Keywords(words) => {
                    let lower = text.to_lowercase();
                    if !words.iter().all(|w| lower.contains(w.as_str())) {
                        continue;
                    }
                    let tokens = tokenize(text);
                    let Some(parameters) =
                        extract_remainder(&tokens, words, &pattern.parameter_names)
                    else {
                        continue;
                    };
                    let kw_len: usize = words.iter().map(|w| w.chars().count()).sum();
                    let coverage = kw_len as f64 / text.chars().count().max(1) as f64;
                    let confidence = (pattern.base_confidence - 0.05
                        + COVERAGE_WEIGHT * coverage.min(1.0))
                    .min(CONFIDENCE_CAP);
                    return Some(Candidate {
                        pattern_id: pattern.id,
                        template: pattern.template,
                        parameters,
                        confidence,
                    });
                }
            }
        }
        None
    }

    fn rank(&self, candidates: Vec<Candidate>, text: &str) -> ClassificationResult {
        let ranked: Vec<Candidate> = candidates
            .into_iter()
            .sorted_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .collect();

        let alternatives: Vec<RankedAlternative> = ranked
            .iter()
            .skip(1)
            .take(2)
            .map(|c| RankedAlternative {
                pattern_id: c.pattern_id,
                confidence: c.confidence,
            })
            .collect();

        match ranked.into_iter().next() {
            Some(best) if best.confidence >= self.confidence_floor => {
                debug!(
                    pattern = best.pattern_id.as_str(),
                    confidence = best.confidence,
                    "classified question"
                );
                ClassificationResult {
                    pattern: Some(best.pattern_id),
                    template: Some(best.template),
                    parameters: best.parameters,
                    confidence: best.confidence,
                    alternatives,
                }
            }
            Some(best) => {
                debug!(
                    pattern = best.pattern_id.as_str(),
                    confidence = best.confidence,
                    floor = self.confidence_floor,
                    "best candidate below confidence floor"
                );
                ClassificationResult {
                    pattern: None,
                    template: None,
                    parameters: HashMap::new(),
                    confidence: best.confidence,
                    alternatives,
                }
            }
            None => {
                debug!(text_len = text.len(), "no pattern matched");
                ClassificationResult::no_match()
            }
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// German filler words ignored when recovering a parameter value from the
/// tokens left over after keyword matching.
const STOPWORDS: &[&str] = &[
    "der", "die", "das", "den", "dem", "des", "ein", "eine", "einer", "von", "vom", "für",
    "fuer", "in", "im", "aus", "zu", "zum", "zur", "alle", "aller", "hat", "haben", "ist",
    "sind", "wer", "welche", "welcher", "wie", "was", "und", "mir", "bitte", "zeige", "zeig",
];

/// Recover parameter values from tokens that are neither keywords nor
/// stopwords. Only patterns with exactly one parameter slot are recoverable
/// this way; anything else is skipped rather than guessed.
fn extract_remainder(
    tokens: &[String],
    keywords: &[String],
    parameter_names: &[String],
) -> Option<HashMap<String, String>> {
    if parameter_names.is_empty() {
        return Some(HashMap::new());
    }
    if parameter_names.len() != 1 {
        return None;
    }
    let remainder: Vec<&str> = tokens
        .iter()
        .filter(|t| {
            !STOPWORDS.contains(&t.as_str())
                && !keywords
                    .iter()
                    .any(|k| jaro_winkler(k, t) >= FALLBACK_TOKEN_SIM)
        })
        .map(|t| t.as_str())
        .collect();
    if remainder.is_empty() {
        return None;
    }
    let mut parameters = HashMap::new();
    parameters.insert(parameter_names[0].clone(), remainder.join(" "));
    Some(parameters)
}

/// Vocabulary used by the bag-of-words fallback, per pattern.
fn pattern_vocabulary(id: PatternId) -> Vec<String> {
    let words: &[&str] = match id {
        PatternId::MieterByOwner => &["mieter", "eigentümer"],
        PatternId::MieterByLocation => &["mieter", "wohnt"],
        PatternId::EigentuemerByObjekt => &["eigentümer", "objekt"],
        PatternId::LeerstandByObjekt => &["leerstand", "wohnungen"],
        PatternId::KostenByKategorie => &["kosten", "kategorie"],
        PatternId::ObjektDetails => &["details", "objekt"],
        PatternId::MieterKontakt => &["kontakt", "mieter"],
    };
    words.iter().map(|w| w.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PatternCatalog;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(Arc::new(PatternCatalog::builtin()))
    }

    #[test]
    fn classifies_mieter_by_owner_with_umlauts() {
        let result = classifier().classify("alle mieter von Müller GmbH");
        assert_eq!(result.pattern, Some(PatternId::MieterByOwner));
        assert_eq!(result.parameters.get("owner").map(String::as_str), Some("Müller GmbH"));
        assert!(result.confidence >= 0.7, "confidence {}", result.confidence);
    }

    #[test]
    fn classifies_mieter_by_location() {
        let result = classifier().classify("wer wohnt in der Marienstraße 26");
        assert_eq!(result.pattern, Some(PatternId::MieterByLocation));
        assert_eq!(
            result.parameters.get("location").map(String::as_str),
            Some("Marienstraße 26")
        );
    }

    #[test]
    fn classifies_leerstand() {
        let result = classifier().classify("freie Wohnungen in der Hauptstraße");
        assert_eq!(result.pattern, Some(PatternId::LeerstandByObjekt));
    }

    #[test]
    fn full_match_caps_at_095() {
        let result = classifier().classify("alle mieter von Weber");
        assert!(result.confidence <= CONFIDENCE_CAP + f64::EPSILON);
    }

    #[test]
    fn gibberish_is_a_normal_no_match() {
        let result = classifier().classify("xyzzy plugh 42");
        assert!(!result.is_match());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn empty_input_is_no_match() {
        assert!(!classifier().classify("   ").is_match());
    }

    #[test]
    fn alternatives_are_ranked_and_capped_at_two() {
        let result = classifier().classify("alle mieter von Müller GmbH");
        assert!(result.alternatives.len() <= 2);
        for pair in result.alternatives.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn fallback_recovers_misspelled_intent() {
        // "Kontkat" is a typo the regex patterns will not match.
        let c = classifier();
        let direct = c.classify("Kontkat Schmidt");
        assert!(!direct.is_match());
        let fallback = c.classify_fallback("Kontkat mieter Schmidt");
        assert_eq!(fallback.pattern, Some(PatternId::MieterKontakt));
        assert_eq!(
            fallback.parameters.get("name").map(String::as_str),
            Some("schmidt")
        );
        assert!(fallback.confidence < 0.7);
    }

    #[test]
    fn classification_is_pure() {
        let c = classifier();
        let a = c.classify("alle mieter von Müller GmbH");
        let b = c.classify("alle mieter von Müller GmbH");
        assert_eq!(a.pattern, b.pattern);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.parameters, b.parameters);
    }
}
