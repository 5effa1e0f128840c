use crate::BuildError;
use ::std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::mpsc,
};
use ahash::AHashMap;
use eld::{
    extract_ngrams, normalize_text, DetectorBuilder, LanguageDatabase, LanguageId, LoadOptions,
    NgramTable,
};
use itertools::Itertools;
use threadpool::ThreadPool;

/// Lines kept per corpus to compute the calibration baseline
const CALIBRATION_SAMPLES: usize = 1000;

/// N-gram frequencies of one language corpus, summed over its lines
#[derive(Debug, Default)]
pub struct CorpusFrequencies {
    frequencies: AHashMap<Vec<u8>, f64>,
    lines: usize,
    samples: Vec<String>,
}

impl CorpusFrequencies {
    /// Every line is a separate text, lines without n-grams are skipped
    pub fn from_lines<S: AsRef<str>>(
        lines: impl IntoIterator<Item = S>,
        ngram_length: usize,
        ngram_stride: usize,
    ) -> Self {
        let mut res = Self::default();
        for line in lines {
            let line = line.as_ref();
            let ngrams = extract_ngrams(&normalize_text(line), ngram_length, ngram_stride);
            if ngrams.is_empty() {
                continue;
            }
            res.lines += 1;
            for (key, frequency) in ngrams.iter() {
                *res.frequencies.entry(key.to_vec()).or_default() += frequency;
            }
            if res.samples.len() < CALIBRATION_SAMPLES {
                res.samples.push(line.to_owned());
            }
        }
        res
    }

    pub fn read(path: &Path, ngram_length: usize, ngram_stride: usize) -> Result<Self, BuildError> {
        let file = File::open(path).map_err(BuildError::read(path))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(BuildError::read(path))?;
        Ok(Self::from_lines(lines, ngram_length, ngram_stride))
    }

    #[inline]
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// `top` most frequent n-grams (all if `None`) with their mean frequency per line,
    /// most frequent first
    pub fn top(&self, top: Option<usize>) -> Vec<(&[u8], f32)> {
        let lines = self.lines.max(1) as f64;
        let sorted = self
            .frequencies
            .iter()
            .map(|(key, frequency)| (key.as_slice(), (frequency / lines) as f32))
            .sorted_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        sorted.take(top.unwrap_or(usize::MAX)).collect()
    }
}

#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub name: String,
    pub ngram_length: usize,
    pub ngram_stride: usize,
    /// N-grams kept per language
    pub top: Option<usize>,
    pub threads: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            name: "ngrams-custom".to_owned(),
            ngram_length: 4,
            ngram_stride: 3,
            top: None,
            threads: 8,
        }
    }
}

/// Table of the `top` n-grams of every corpus, language ids follow the order of `codes`
pub fn build_table(
    codes: &[String],
    corpora: &[CorpusFrequencies],
    options: &TrainOptions,
) -> Result<NgramTable, BuildError> {
    let mut ngrams: BTreeMap<Vec<u8>, Vec<(LanguageId, f32)>> = BTreeMap::new();
    for (lang, corpus) in corpora.iter().enumerate() {
        for (key, frequency) in corpus.top(options.top) {
            ngrams
                .entry(key.to_vec())
                .or_default()
                .push((lang as LanguageId, frequency));
        }
    }

    let mut table = NgramTable::new(
        &options.name,
        codes.iter().map(String::as_str),
        options.ngram_length,
        options.ngram_stride,
    );
    for (key, scores) in ngrams {
        table.insert(&key, scores)?;
    }
    Ok(table)
}

/// Sets every language baseline to the mean score its own corpus lines get
pub fn calibrate(table: NgramTable, corpora: &[CorpusFrequencies]) -> Result<NgramTable, BuildError> {
    let database = LanguageDatabase::from_table(table.clone(), LoadOptions::default())?;
    let detector = DetectorBuilder::new(&database)
        .min_byte_length(0)
        .min_ngrams(1)
        .build();

    let avg_scores = corpora
        .iter()
        .enumerate()
        .map(|(lang, corpus)| {
            let lang = lang as LanguageId;
            if corpus.samples.is_empty() {
                return 0.0;
            }
            let sum: f64 = corpus
                .samples
                .iter()
                .map(|line| {
                    detector
                        .scores(line)
                        .into_iter()
                        .find(|(l, _)| *l == lang)
                        .map_or(0.0, |(_, score)| score)
                })
                .sum();
            sum / corpus.samples.len() as f64
        })
        .collect();

    Ok(table.with_avg_scores(avg_scores))
}

/// Trains a calibrated table from `<code>.txt` files, one text per line
pub fn train_dir(dir: &Path, options: &TrainOptions) -> Result<NgramTable, BuildError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(BuildError::read(dir))? {
        let path = entry.map_err(BuildError::read(dir))?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(code) = path.file_stem().and_then(|s| s.to_str()) {
            files.push((code.to_owned(), path.clone()));
        }
    }
    if files.is_empty() {
        return Err(BuildError::EmptyCorpus(dir.to_path_buf()));
    }
    files.sort_unstable();

    let pool = ThreadPool::new(options.threads.max(1));
    let (tx, rx) = mpsc::channel();
    for (lang, (code, path)) in files.iter().enumerate() {
        let tx = tx.clone();
        let (code, path) = (code.clone(), path.clone());
        let (ngram_length, ngram_stride) = (options.ngram_length, options.ngram_stride);
        pool.execute(move || {
            println!("*{code}* started");
            let res = CorpusFrequencies::read(&path, ngram_length, ngram_stride);
            // receiver is gone only if another corpus failed
            let _ = tx.send((lang, res));
        });
    }
    drop(tx);

    let mut corpora: Vec<Option<CorpusFrequencies>> = files.iter().map(|_| None).collect();
    for (lang, res) in rx {
        let corpus = res?;
        println!("*{}* done, {} lines", files[lang].0, corpus.lines());
        corpora[lang] = Some(corpus);
    }
    pool.join();

    let corpora: Vec<CorpusFrequencies> = corpora
        .into_iter()
        .zip(&files)
        .map(|(corpus, (code, _))| corpus.ok_or_else(|| BuildError::Worker(code.clone())))
        .collect::<Result<_, _>>()?;
    let codes: Vec<String> = files.into_iter().map(|(code, _)| code).collect();

    let table = build_table(&codes, &corpora, options)?;
    calibrate(table, &corpora)
}
