use super::{Detector, Reliability};
use crate::{database::LanguageDatabase, language::OutputScheme, subset::LanguageSubset};

#[derive(Clone, Debug)]
pub struct DetectorBuilder<'d> {
    pub(super) database: &'d LanguageDatabase,
    pub(super) scheme: OutputScheme,
    pub(super) languages: Option<LanguageSubset>,
    pub(super) min_byte_length: usize,
    pub(super) min_ngrams: usize,
    pub(super) clean_text: bool,
    pub(super) check_confidence: bool,
    pub(super) reliability: Reliability,
}

impl<'d> DetectorBuilder<'d> {
    /// All database languages, ISO 639-1 output
    #[inline]
    pub fn new(database: &'d LanguageDatabase) -> Self {
        Self {
            database,
            scheme: OutputScheme::default(),
            languages: None,
            min_byte_length: 12,
            min_ngrams: 3,
            clean_text: false,
            check_confidence: false,
            reliability: Reliability::default(),
        }
    }

    #[inline]
    pub fn build(self) -> Detector<'d> {
        Detector::new(self)
    }

    #[inline]
    pub fn scheme(mut self, scheme: OutputScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Limits the output to a subset of languages, the database is not changed
    #[inline]
    pub fn languages(mut self, languages: LanguageSubset) -> Self {
        self.languages = Some(languages);
        self
    }

    /// Shorter normalized texts (in bytes) fail with `TextTooShort`
    #[inline]
    pub fn min_byte_length(mut self, min_byte_length: usize) -> Self {
        self.min_byte_length = min_byte_length;
        self
    }

    /// Texts with fewer distinct n-grams fail with `InsufficientNgrams`, at least 1
    #[inline]
    pub fn min_ngrams(mut self, min_ngrams: usize) -> Self {
        self.min_ngrams = min_ngrams;
        self
    }

    /// Removes urls, emails, domains and number codes before detection
    #[inline]
    pub fn clean_text(mut self, clean_text: bool) -> Self {
        self.clean_text = clean_text;
        self
    }

    /// Unreliable detections fail with `UnsureDetection`
    #[inline]
    pub fn check_confidence(mut self, check_confidence: bool) -> Self {
        self.check_confidence = check_confidence;
        self
    }

    #[inline]
    pub fn reliability(mut self, reliability: Reliability) -> Self {
        self.reliability = reliability;
        self
    }
}
