use super::write_atomic;
use crate::{
    error::DatabaseError,
    language::LanguageId,
    ngrams::{NgramKey, NGRAM_MAX_LEN},
};
use ::std::{
    fmt::Write as _,
    fs::File,
    io::{ErrorKind, Read, Write},
    path::Path,
};
use brotli::{CompressorWriter, Decompressor};
use compact_str::CompactString;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Languages and their frequencies for one n-gram, sorted by language id
pub type ScoreMap = Box<[(LanguageId, f32)]>;
pub(crate) type TableNgrams = FxHashMap<NgramKey, ScoreMap>;

pub(crate) const TABLE_FILE_VERSION: u32 = 1;

/// Everything a database knows besides the n-grams themselves
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseMeta {
    pub(crate) name: CompactString,
    pub(crate) languages: Vec<CompactString>,
    pub(crate) avg_score: Vec<f64>,
    pub(crate) ngram_length: usize,
    pub(crate) ngram_stride: usize,
    pub(crate) subset: Option<Vec<LanguageId>>,
}

impl DatabaseMeta {
    pub(crate) fn validate(&self, path: &Path) -> Result<(), DatabaseError> {
        if self.languages.is_empty() {
            return Err(DatabaseError::malformed(path, "no languages"));
        }
        if self.languages.len() > LanguageId::MAX as usize + 1 {
            return Err(DatabaseError::malformed(path, "too many languages"));
        }
        if self.avg_score.len() != self.languages.len() {
            return Err(DatabaseError::malformed(
                path,
                format!(
                    "{} average scores for {} languages",
                    self.avg_score.len(),
                    self.languages.len()
                ),
            ));
        }
        if !(1..=NGRAM_MAX_LEN).contains(&self.ngram_length) || self.ngram_stride == 0 {
            return Err(DatabaseError::malformed(
                path,
                format!(
                    "ngram length {} or stride {} not supported",
                    self.ngram_length, self.ngram_stride
                ),
            ));
        }
        Ok(())
    }
}

/// N-gram frequency table, the `array` representation of a database
#[derive(Clone, Debug)]
pub struct NgramTable {
    pub(crate) meta: DatabaseMeta,
    pub(crate) ngrams: TableNgrams,
}

impl NgramTable {
    /// Empty table, every calibration baseline is set to 0.0
    pub fn new<L: Into<CompactString>>(
        name: &str,
        languages: impl IntoIterator<Item = L>,
        ngram_length: usize,
        ngram_stride: usize,
    ) -> Self {
        let languages: Vec<CompactString> = languages.into_iter().map(Into::into).collect();
        Self {
            meta: DatabaseMeta {
                name: name.into(),
                avg_score: vec![0.0; languages.len()],
                languages,
                ngram_length,
                ngram_stride,
                subset: None,
            },
            ngrams: Default::default(),
        }
    }

    /// Sets the calibration baselines, one per language
    #[inline]
    pub fn with_avg_scores(mut self, avg_score: Vec<f64>) -> Self {
        self.meta.avg_score = avg_score;
        self
    }

    /// Replaces the frequencies of `key`.
    /// Empty `scores` removes the n-gram, duplicated languages keep the last value.
    pub fn insert(
        &mut self,
        key: &[u8],
        scores: impl IntoIterator<Item = (LanguageId, f32)>,
    ) -> Result<(), DatabaseError> {
        let key = NgramKey::try_from(key).map_err(|_| {
            DatabaseError::OutOfRange(format!("ngram {:?} is too long", escape_key(key, true)))
        })?;

        let mut checked: Vec<(LanguageId, f32)> = Vec::new();
        for (lang, score) in scores {
            if lang as usize >= self.meta.languages.len() {
                return Err(DatabaseError::OutOfRange(format!(
                    "language id {lang} is not in 0..{}",
                    self.meta.languages.len()
                )));
            }
            if !score.is_finite() || score < 0.0 {
                return Err(DatabaseError::OutOfRange(format!(
                    "score {score} for language id {lang}"
                )));
            }
            match checked.iter_mut().find(|(l, _)| *l == lang) {
                Some(entry) => entry.1 = score,
                None => checked.push((lang, score)),
            }
        }

        if checked.is_empty() {
            self.ngrams.remove(&key);
        } else {
            checked.sort_unstable_by_key(|(l, _)| *l);
            self.ngrams.insert(key, checked.into_boxed_slice());
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<&[(LanguageId, f32)]> {
        self.ngrams.get(key).map(AsRef::as_ref)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ngrams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ngrams.is_empty()
    }

    #[inline]
    pub fn languages(&self) -> &[CompactString] {
        &self.meta.languages
    }

    /// Highest frequency in the table
    pub fn max_score(&self) -> f32 {
        self.ngrams
            .values()
            .flat_map(|scores| scores.iter().map(|(_, s)| *s))
            .fold(0.0, f32::max)
    }

    /// Entries ordered by key, so files built from equal tables are equal
    pub(crate) fn sorted_entries(&self) -> Vec<(&NgramKey, &ScoreMap)> {
        let mut entries: Vec<_> = self.ngrams.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// New table with only the languages in `ids` (sorted), n-grams left
    /// without languages are dropped
    pub fn retain_languages(&self, ids: &[LanguageId]) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must be sorted");

        let ngrams = self
            .ngrams
            .iter()
            .filter_map(|(key, scores)| {
                let kept: ScoreMap = scores
                    .iter()
                    .filter(|(lang, _)| ids.binary_search(lang).is_ok())
                    .copied()
                    .collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect();

        let mut meta = self.meta.clone();
        meta.subset = Some(ids.to_vec());

        Self { meta, ngrams }
    }

    pub(crate) fn validate(&self, path: &Path) -> Result<(), DatabaseError> {
        self.meta.validate(path)?;
        if self.ngrams.is_empty() {
            return Err(DatabaseError::malformed(path, "no ngrams"));
        }
        let languages_count = self.meta.languages.len();
        for scores in self.ngrams.values() {
            if scores.is_empty() {
                return Err(DatabaseError::malformed(path, "ngram without languages"));
            }
            if scores.iter().any(|(lang, score)| {
                *lang as usize >= languages_count || !score.is_finite() || *score < 0.0
            }) {
                return Err(DatabaseError::malformed(path, "invalid language score"));
            }
        }
        Ok(())
    }

    /// Reads a brotli compressed EnCom table file
    pub fn read(path: &Path) -> Result<Self, DatabaseError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::NotFound(path.to_owned()),
            _ => DatabaseError::io(path)(e),
        })?;
        let mut content = String::new();
        Decompressor::new(file, 4096)
            .read_to_string(&mut content)
            .map_err(|e| DatabaseError::malformed(path, e.to_string()))?;

        let file_table: TableFile = serde_encom::from_str(&content)
            .map_err(|e| DatabaseError::malformed(path, e.to_string()))?;
        let table = file_table.into_table(path)?;
        table.validate(path)?;

        tracing::debug!(
            "Read ngram table {:?}: {} ngrams, {} languages",
            path,
            table.len(),
            table.meta.languages.len()
        );
        Ok(table)
    }

    /// Writes a brotli compressed EnCom table file. With `encode` the n-gram
    /// keys are kept printable ASCII, otherwise only invalid UTF-8 is escaped.
    pub fn write(&self, path: &Path, encode: bool) -> Result<(), DatabaseError> {
        let file_table = TableFile::from_table(self, encode);
        let ser = serde_encom::to_string(&file_table)
            .map_err(|e| DatabaseError::malformed(path, e.to_string()))?;

        write_atomic(path, |file| {
            let mut compressed = CompressorWriter::new(file, 4096, 11, 22);
            compressed.write_all(ser.as_bytes())?;
            compressed.flush()?;
            drop(compressed.into_inner());
            Ok(())
        })
    }
}

#[derive(Serialize, Deserialize)]
struct TableFile {
    version: u32,
    name: CompactString,
    ngram_length: usize,
    ngram_stride: usize,
    languages: Vec<CompactString>,
    avg_score: Vec<f64>,
    subset: Option<Vec<LanguageId>>,
    ngrams: Vec<(String, Vec<(LanguageId, f32)>)>,
}

impl TableFile {
    fn from_table(table: &NgramTable, encode: bool) -> Self {
        let meta = &table.meta;
        Self {
            version: TABLE_FILE_VERSION,
            name: meta.name.clone(),
            ngram_length: meta.ngram_length,
            ngram_stride: meta.ngram_stride,
            languages: meta.languages.clone(),
            avg_score: meta.avg_score.clone(),
            subset: meta.subset.clone(),
            ngrams: table
                .sorted_entries()
                .into_iter()
                .map(|(key, scores)| (escape_key(key, encode), scores.to_vec()))
                .collect(),
        }
    }

    fn into_table(self, path: &Path) -> Result<NgramTable, DatabaseError> {
        if self.version != TABLE_FILE_VERSION {
            return Err(DatabaseError::malformed(
                path,
                format!("unsupported version {}", self.version),
            ));
        }

        let mut ngrams = TableNgrams::with_capacity_and_hasher(self.ngrams.len(), Default::default());
        for (escaped, scores) in self.ngrams {
            let key = unescape_key(&escaped)
                .ok_or_else(|| DatabaseError::malformed(path, format!("bad ngram {escaped:?}")))?;
            if ngrams.insert(key, scores.into_boxed_slice()).is_some() {
                return Err(DatabaseError::malformed(
                    path,
                    format!("duplicated ngram {escaped:?}"),
                ));
            }
        }

        Ok(NgramTable {
            meta: DatabaseMeta {
                name: self.name,
                languages: self.languages,
                avg_score: self.avg_score,
                ngram_length: self.ngram_length,
                ngram_stride: self.ngram_stride,
                subset: self.subset,
            },
            ngrams,
        })
    }
}

#[inline]
fn push_hex(out: &mut String, byte: u8) {
    let _ = write!(out, "\\x{byte:02x}");
}

/// Escapes n-gram bytes into a string as `\xNN`.
/// `encode` escapes everything outside printable ASCII (and `\`, `"`),
/// otherwise only bytes that are not valid UTF-8 and `\` are escaped.
pub(crate) fn escape_key(key: &[u8], encode: bool) -> String {
    let mut res = String::with_capacity(key.len() * 2);
    if encode {
        for &b in key {
            if !(32..=126).contains(&b) || b == b'\\' || b == b'"' {
                push_hex(&mut res, b);
            } else {
                res.push(b as char);
            }
        }
        return res;
    }

    for chunk in key.utf8_chunks() {
        for ch in chunk.valid().chars() {
            if ch == '\\' {
                push_hex(&mut res, b'\\');
            } else {
                res.push(ch);
            }
        }
        for &b in chunk.invalid() {
            push_hex(&mut res, b);
        }
    }
    res
}

#[inline]
fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Reverses [`escape_key`], works for both forms
pub(crate) fn unescape_key(escaped: &str) -> Option<NgramKey> {
    let bytes = escaped.as_bytes();
    let mut key = NgramKey::new_const();
    let mut i = 0;
    while i < bytes.len() {
        let b = if bytes[i] == b'\\' {
            if bytes.get(i + 1) != Some(&b'x') {
                return None;
            }
            let hi = hex_value(*bytes.get(i + 2)?)?;
            let lo = hex_value(*bytes.get(i + 3)?)?;
            i += 4;
            hi << 4 | lo
        } else {
            i += 1;
            bytes[i - 1]
        };
        key.try_push(b).ok()?;
    }
    Some(key)
}
