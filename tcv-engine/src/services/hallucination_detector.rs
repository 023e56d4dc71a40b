//! Hallucination Detector
//!
//! Runs over Tier 3 claim candidates before anything is surfaced:
//! - forbidden phrases, exact substring or fuzzy word-window match
//!   (normalized Levenshtein), flagged at the phrase's own severity
//! - claims with no `source_audit_id`: absolute ones are BLOCKED, the rest
//!   are INFO and withheld, so an unsourced claim never reaches the result
//! - claims the provider said the content does not support are WARNING
//!
//! BLOCKED drops the claim; WARNING keeps it flagged.

use strsim::normalized_levenshtein;
use tracing::debug;
use uuid::Uuid;

use crate::services::claim_extractor::is_absolute;
use crate::tiers::words;
use crate::types::{ClaimCandidate, ForbiddenPhrase, HallucinationDetection, Severity};

/// Similarity at or above which a word window counts as the forbidden phrase
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

pub const UNSOURCED_ABSOLUTE: &str = "unsourced_absolute_claim";
pub const UNSOURCED: &str = "unsourced_claim";
pub const UNSUPPORTED: &str = "unsupported_claim";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    /// Claims that survived detection, in input order
    pub surfaced: Vec<ClaimCandidate>,
    pub detections: Vec<HallucinationDetection>,
}

impl DetectionReport {
    pub fn blocked_count(&self) -> usize {
        self.count(Severity::Blocked)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.detections.iter().filter(|d| d.severity == severity).count()
    }
}

/// True when `text` contains `phrase` exactly or approximately
pub fn matches_phrase(text: &str, phrase: &str) -> bool {
    let text_lower = text.to_lowercase();
    let phrase_lower = phrase.to_lowercase();
    if phrase_lower.trim().is_empty() {
        return false;
    }
    if text_lower.contains(&phrase_lower) {
        return true;
    }

    let phrase_words = words(&phrase_lower);
    let text_words = words(&text_lower);
    if phrase_words.is_empty() || text_words.len() < phrase_words.len() {
        return false;
    }
    let target = phrase_words.join(" ");
    text_words
        .windows(phrase_words.len())
        .any(|window| normalized_levenshtein(&window.join(" "), &target) >= FUZZY_MATCH_THRESHOLD)
}

pub fn detect<'a>(
    assessment_id: Uuid,
    candidates: Vec<ClaimCandidate>,
    phrases: impl IntoIterator<Item = &'a ForbiddenPhrase>,
) -> DetectionReport {
    let phrases: Vec<&ForbiddenPhrase> = phrases.into_iter().filter(|p| p.active).collect();
    let mut report = DetectionReport::default();

    let flag = |text: &str, rule: String, severity: Severity| HallucinationDetection {
        detection_id: tcv_common::uuid_utils::generate(),
        assessment_id,
        flagged_content: text.to_string(),
        rule,
        severity,
        resolved: false,
    };

    'candidates: for candidate in candidates {
        for phrase in &phrases {
            if !matches_phrase(&candidate.text, &phrase.phrase) {
                continue;
            }
            debug!(
                assessment_id = %assessment_id,
                phrase = %phrase.phrase,
                severity = phrase.severity.as_str(),
                "Forbidden phrase in claim"
            );
            report.detections.push(flag(
                &candidate.text,
                format!("forbidden_phrase: {}", phrase.phrase),
                phrase.severity,
            ));
            if phrase.severity == Severity::Blocked {
                continue 'candidates;
            }
        }

        if candidate.source_audit_id.is_none() {
            let (rule, severity) = if is_absolute(&candidate.text) {
                (UNSOURCED_ABSOLUTE, Severity::Blocked)
            } else {
                (UNSOURCED, Severity::Info)
            };
            report.detections.push(flag(&candidate.text, rule.to_string(), severity));
            continue;
        }

        if candidate.supported == Some(false) {
            report
                .detections
                .push(flag(&candidate.text, UNSUPPORTED.to_string(), Severity::Warning));
        }
        report.surfaced.push(candidate);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConfidenceLevel;

    const NO_PHRASES: &[ForbiddenPhrase] = &[];

    fn sourced(text: &str, supported: bool) -> ClaimCandidate {
        ClaimCandidate {
            text: text.to_string(),
            source_audit_id: Some(Uuid::new_v4()),
            confidence_level: ConfidenceLevel::High,
            supported: Some(supported),
        }
    }

    fn phrase(text: &str, severity: Severity) -> ForbiddenPhrase {
        ForbiddenPhrase {
            phrase: text.to_string(),
            reason: "compliance".to_string(),
            severity,
            active: true,
        }
    }

    #[test]
    fn test_fuzzy_phrase_match() {
        assert!(matches_phrase("We offer Guaranteed Results today", "guaranteed results"));
        assert!(matches_phrase("We offer guaranted results today", "guaranteed results"));
        assert!(!matches_phrase("We offer measured results today", "guaranteed results"));
    }

    #[test]
    fn test_unsourced_claims_never_surface() {
        let report = detect(
            Uuid::new_v4(),
            vec![
                ClaimCandidate::unverified("We are always the fastest option."),
                ClaimCandidate::unverified("Load time dropped by 40% in March."),
            ],
            NO_PHRASES,
        );
        assert!(report.surfaced.is_empty());
        assert_eq!(report.detections[0].rule, UNSOURCED_ABSOLUTE);
        assert_eq!(report.detections[0].severity, Severity::Blocked);
        assert_eq!(report.detections[1].rule, UNSOURCED);
        assert_eq!(report.detections[1].severity, Severity::Info);
    }

    #[test]
    fn test_forbidden_phrase_severity_applies() {
        let mut phrases = vec![
            phrase("clinically proven", Severity::Blocked),
            phrase("risk-free", Severity::Warning),
            phrase("retired phrase", Severity::Blocked),
        ];
        phrases[2].active = false;

        let report = detect(
            Uuid::new_v4(),
            vec![
                sourced("Our serum is clinically proven to work.", true),
                sourced("Try it risk-free for 30 days.", true),
                sourced("This retired phrase is fine now.", true),
            ],
            &phrases,
        );

        assert_eq!(report.blocked_count(), 1);
        assert_eq!(report.warning_count(), 1);
        let surfaced: Vec<_> = report.surfaced.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            surfaced,
            vec!["Try it risk-free for 30 days.", "This retired phrase is fine now."]
        );
    }

    #[test]
    fn test_unsupported_claim_kept_with_warning() {
        let report = detect(Uuid::new_v4(), vec![sourced("Setup takes 5 minutes.", false)], NO_PHRASES);
        assert_eq!(report.surfaced.len(), 1);
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].rule, UNSUPPORTED);
        assert_eq!(report.detections[0].severity, Severity::Warning);
    }
}
