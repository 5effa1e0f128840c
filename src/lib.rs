//! # Efficient n-gram language detection
//!
//! Texts are normalized, split into byte n-grams (4 bytes with a stride of 3
//! by default), and every n-gram is looked up in a frequency database of 60 languages.
//!
//! Databases come in 4 sizes ([`SizeTier`]), and can be held in 4 ways ([`BackendMode`]):
//! an in-memory hash map, or a compact blob read into memory, memory mapped,
//! or read from disk on every lookup.
//!
//! # Example
//! ```rust,no_run
//! use eld::{BackendMode, DataCache, DetectorBuilder, LanguageDatabase, LoadOptions};
//!
//! let cache = DataCache::new();
//! let options = LoadOptions::default().mode(BackendMode::RawBytes);
//! let database = LanguageDatabase::load("medium", options, &cache).unwrap();
//! let detector = DetectorBuilder::new(&database).build();
//!
//! let result = detector.detect("Hola, cómo te llamas?");
//! assert_eq!(result.language(), "es");
//! println!("{} {:?} reliable: {}", result.language(), result.scores(), result.is_reliable());
//!
//! // only Spanish and English in the output
//! let subset = detector.limit_to(["es", "en"]);
//! let detector = detector.clone_with_languages(Some(subset));
//!
//! // or multithreaded
//! let results = detector.detect_batch(&["text1", "text2"]);
//! ```
//! `detector` also has [other methods](struct.Detector.html#implementations)

mod cleanup;
mod database;
mod detector;
mod error;
mod language;
mod ngrams;
mod subset;

pub use cleanup::cleanup_text;
pub use database::{
    default_data_dir, score_multiplier, slot_count, write_blob, BackendMode, BlobFiles, BlobInfo,
    DataCache, DatabaseSource, LanguageDatabase, LoadOptions, NgramTable, ScoreMap, SizeTier,
    DATA_DIR_ENV,
};
pub use detector::{DetectionResult, Detector, DetectorBuilder, Failure, Reliability};
pub use error::{DatabaseError, ErrorKind};
pub use language::{LanguageId, OutputScheme, UNDETERMINED};
pub use ngrams::{
    extract_ngrams, normalize_text, NgramKey, TextNgrams, FREQUENCY_CALIBRATION, NGRAM_MAX_LEN,
};
pub use subset::{subset_cache_key, LanguageSubset, SubsetResult};
