use crate::{
    cleanup::cleanup_text,
    database::{Backend, LanguageDatabase},
    language::{LanguageId, OutputScheme},
    ngrams::{extract_ngrams, normalize_text, TextNgrams},
    subset::LanguageSubset,
};
use ::core::cmp::Ordering;
use compact_str::CompactString;
#[cfg(not(target_family = "wasm"))]
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

mod builder;
mod result;

pub use builder::DetectorBuilder;
pub use result::{DetectionResult, Failure, Reliability};

/// Scores below are dropped
const SCORE_EPSILON: f64 = 0.0001;
/// Normalizes the score sum by the number of text n-grams
const SCORE_DIVISOR: f64 = 3.2;

/// Weight of an n-gram by the number of languages it belongs to
#[inline]
fn relevancy(languages_count: usize) -> f64 {
    match languages_count {
        1 => 27.0,
        count if count < 16 => (16 - count) as f64 / 2.0 + 1.0,
        _ => 1.0,
    }
}

/// Adds every matched n-gram to its languages:
/// `relevancy * min(freq, db_freq) / max(freq, db_freq) + 2`
fn accumulate_scores(ngrams: &TextNgrams, backend: &Backend, languages_count: usize) -> Vec<f64> {
    let mut scores = vec![0.0; languages_count];
    let mut buf = Vec::new();

    for (key, frequency) in ngrams.iter() {
        let Some(languages) = backend.scores(key, &mut buf) else {
            continue;
        };
        let relevancy = relevancy(languages.len());

        for &(lang, db_frequency) in languages {
            let db_frequency = f64::from(db_frequency);
            let ratio = if frequency > db_frequency {
                db_frequency / frequency
            } else {
                frequency / db_frequency
            };
            if let Some(score) = scores.get_mut(lang as usize) {
                *score += ratio * relevancy + 2.0;
            }
        }
    }

    scores
}

fn order_by_score_and_lang(first: &(LanguageId, f64), second: &(LanguageId, f64)) -> Ordering {
    second
        .1
        .total_cmp(&first.1)
        .then_with(|| first.0.cmp(&second.0))
}

/// Normalized scores of the languages kept by `subset`, ordered by score descending
fn finalize_scores(
    scores: Vec<f64>,
    ngram_count: usize,
    subset: Option<&LanguageSubset>,
) -> Vec<(LanguageId, f64)> {
    let divisor = ngram_count as f64 * SCORE_DIVISOR;
    let mut res: Vec<(LanguageId, f64)> = scores
        .into_iter()
        .enumerate()
        .map(|(lang, score)| (lang as LanguageId, score / divisor))
        .filter(|(lang, score)| {
            *score >= SCORE_EPSILON && subset.is_none_or(|s| s.contains(*lang))
        })
        .collect();
    res.sort_unstable_by(order_by_score_and_lang);
    res
}

/// Language detector over a [`LanguageDatabase`], cheap to clone
#[derive(Clone, Debug)]
pub struct Detector<'d> {
    database: &'d LanguageDatabase,
    scheme: OutputScheme,
    /// Output names, indexed by [`LanguageId`]
    names: Vec<CompactString>,
    languages: Option<LanguageSubset>,
    min_byte_length: usize,
    min_ngrams: usize,
    clean_text: bool,
    check_confidence: bool,
    reliability: Reliability,
}

impl<'d> Detector<'d> {
    #[inline]
    fn new(builder: DetectorBuilder<'d>) -> Self {
        let names = builder
            .scheme
            .format_all(builder.database.languages().iter().map(CompactString::as_str));
        Self {
            database: builder.database,
            scheme: builder.scheme,
            names,
            languages: builder.languages,
            min_byte_length: builder.min_byte_length,
            min_ngrams: builder.min_ngrams.max(1),
            clean_text: builder.clean_text,
            check_confidence: builder.check_confidence,
            reliability: builder.reliability,
        }
    }

    #[inline]
    pub fn database(&self) -> &'d LanguageDatabase {
        self.database
    }

    #[inline]
    pub fn scheme(&self) -> OutputScheme {
        self.scheme
    }

    /// Active output filter
    #[inline]
    pub fn languages(&self) -> Option<&LanguageSubset> {
        self.languages.as_ref()
    }

    /// Filters results to `languages` after scoring, `None` shows all languages.
    /// The database is shared and not changed.
    #[inline]
    pub fn apply_dynamic(&mut self, languages: Option<LanguageSubset>) {
        self.languages = languages;
    }

    /// Clone detector with new languages selected
    #[inline]
    pub fn clone_with_languages(&self, languages: Option<LanguageSubset>) -> Self {
        Self {
            languages,
            ..self.clone()
        }
    }

    /// Ids of `codes`, matched against the database codes and the output scheme names
    #[inline]
    pub fn limit_to<S: AsRef<str>>(&self, codes: impl IntoIterator<Item = S>) -> LanguageSubset {
        self.database.limit_to(codes, self.scheme)
    }

    /// Scores every database language for the text, ordered by score descending.
    /// N-grams are extracted from the normalized text, no length checks are done.
    pub fn scores(&self, text: &str) -> Vec<(LanguageId, f64)> {
        let text = normalize_text(text);
        let ngrams = extract_ngrams(&text, self.database.ngram_length(), self.database.ngram_stride());
        if ngrams.is_empty() {
            return Vec::new();
        }
        self.score_ngrams(&ngrams)
    }

    fn score_ngrams(&self, ngrams: &TextNgrams) -> Vec<(LanguageId, f64)> {
        let backend = self.database.backend();
        let scores = accumulate_scores(ngrams, &backend, self.database.languages().len());
        finalize_scores(scores, ngrams.len(), self.languages.as_ref())
    }

    pub fn detect(&self, text: &str) -> DetectionResult {
        let cleaned;
        let text = if self.clean_text {
            cleaned = cleanup_text(text);
            &cleaned
        } else {
            text
        };

        let text = normalize_text(text);
        if text.len() < self.min_byte_length {
            return DetectionResult::failed(Failure::TextTooShort, 0, self.reliability);
        }

        let ngrams = extract_ngrams(&text, self.database.ngram_length(), self.database.ngram_stride());
        let ngram_count = ngrams.len();
        if ngram_count < self.min_ngrams {
            return DetectionResult::failed(Failure::InsufficientNgrams, ngram_count, self.reliability);
        }

        let raw_scores = self.score_ngrams(&ngrams);
        let Some(&(top, _)) = raw_scores.first() else {
            return DetectionResult::failed(Failure::NoLanguageDetected, ngram_count, self.reliability);
        };

        let result = DetectionResult {
            language: self.names[top as usize].clone(),
            outcome: Ok(top),
            scores: raw_scores
                .iter()
                .map(|(lang, score)| (self.names[*lang as usize].clone(), *score))
                .collect(),
            raw_scores,
            ngram_count,
            baseline: self
                .database
                .avg_scores()
                .get(top as usize)
                .copied()
                .unwrap_or_default(),
            reliability: self.reliability,
        };

        if self.check_confidence && !result.is_reliable() {
            tracing::debug!("Unsure detection of {}, dropped", result.language);
            return DetectionResult::failed(Failure::UnsureDetection, ngram_count, self.reliability);
        }
        result
    }

    /// Detects every text, in parallel where threads are available
    pub fn detect_batch<T: AsRef<str> + Sync>(&self, texts: &[T]) -> Vec<DetectionResult> {
        #[cfg(not(target_family = "wasm"))]
        let iter = texts.par_iter();
        #[cfg(target_family = "wasm")]
        let iter = texts.iter();

        iter.map(|text| self.detect(text.as_ref())).collect()
    }
}
