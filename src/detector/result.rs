use crate::language::{LanguageId, UNDETERMINED};
use compact_str::CompactString;
use thiserror::Error;

/// Why a detection has no language
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum Failure {
    #[error("Text too short for detection")]
    TextTooShort,
    #[error("Not enough distinct ngrams")]
    InsufficientNgrams,
    #[error("No language was identified with enough confidence")]
    UnsureDetection,
    #[error("No language detected")]
    NoLanguageDetected,
}

/// Thresholds of [`DetectionResult::is_reliable`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reliability {
    /// Minimum ratio of the top score to the language calibration baseline
    pub min_baseline_ratio: f64,
    /// Minimum relative gap between the top two scores
    pub min_relative_gap: f64,
    pub min_ngrams: usize,
}

impl Default for Reliability {
    #[inline]
    fn default() -> Self {
        Self {
            min_baseline_ratio: 0.75,
            min_relative_gap: 0.05,
            min_ngrams: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    pub(super) language: CompactString,
    pub(super) outcome: Result<LanguageId, Failure>,
    /// Ordered by score descending
    pub(super) raw_scores: Vec<(LanguageId, f64)>,
    pub(super) scores: Vec<(CompactString, f64)>,
    pub(super) ngram_count: usize,
    pub(super) baseline: f64,
    pub(super) reliability: Reliability,
}

impl DetectionResult {
    #[inline]
    pub(super) fn failed(failure: Failure, ngram_count: usize, reliability: Reliability) -> Self {
        Self {
            language: CompactString::const_new(UNDETERMINED),
            outcome: Err(failure),
            raw_scores: Vec::new(),
            scores: Vec::new(),
            ngram_count,
            baseline: 0.0,
            reliability,
        }
    }

    /// Detected language in the detector output scheme, `"und"` on failure
    #[inline]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[inline]
    pub fn language_id(&self) -> Option<LanguageId> {
        self.outcome.ok()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.outcome.is_ok()
    }

    #[inline]
    pub fn failure(&self) -> Option<Failure> {
        self.outcome.err()
    }

    /// Score of the detected language
    #[inline]
    pub fn score(&self) -> Option<f64> {
        self.outcome.ok().and(self.raw_scores.first().map(|(_, s)| *s))
    }

    /// Scores in the output scheme, ordered by score descending
    #[inline]
    pub fn scores(&self) -> &[(CompactString, f64)] {
        &self.scores
    }

    /// Scores by language id, ordered by score descending
    #[inline]
    pub fn raw_scores(&self) -> &[(LanguageId, f64)] {
        &self.raw_scores
    }

    /// Distinct n-grams of the analysed text
    #[inline]
    pub fn ngram_count(&self) -> usize {
        self.ngram_count
    }

    /// Confidence heuristic. Unreliable if no language was detected,
    /// if the text has too few n-grams, if the top score is low compared to
    /// the language calibration baseline, or if the runner-up is too close.
    pub fn is_reliable(&self) -> bool {
        if self.outcome.is_err() || self.ngram_count < self.reliability.min_ngrams {
            return false;
        }
        let Some(&(_, top)) = self.raw_scores.first() else {
            return false;
        };
        if top < self.baseline * self.reliability.min_baseline_ratio {
            return false;
        }
        match self.raw_scores.get(1) {
            Some(&(_, second)) => (top - second) / top >= self.reliability.min_relative_gap,
            None => true,
        }
    }
}
