use ahash::AHashMap;
use arrayvec::ArrayVec;

pub const NGRAM_MAX_LEN: usize = 8;

/// Raw n-gram bytes, including the word boundary spaces
pub type NgramKey = ArrayVec<u8, { NGRAM_MAX_LEN + 2 }>;

/// Scale of text frequencies, matching the scale the databases were built with
pub const FREQUENCY_CALIBRATION: f64 = 13200.0;

const TEXT_PREFIX_LEN: usize = 1000;
const TEXT_CUT_OFFSET: usize = 350;
const TEXT_CUT_MAX: usize = 380;
const WORD_MAX_LEN: usize = 70;

#[inline]
fn is_apostrophe(ch: char) -> bool {
    matches!(ch, '\'' | '`' | '\u{2019}')
}

#[inline]
fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Appends a run of non-letters: apostrophes closing the run are kept,
/// anything before them becomes a single space
fn flush_separators(out: &mut String, run: &mut String) {
    if run.is_empty() {
        return;
    }
    match run.char_indices().rfind(|(_, ch)| !is_apostrophe(*ch)) {
        Some((i, ch)) => {
            out.push(' ');
            out.push_str(&run[i + ch.len_utf8()..]);
        }
        None => out.push_str(run),
    }
    run.clear();
}

/// Collapses word separators and bounds the text length.
/// Returned text is not lower-cased yet.
pub fn normalize_text(text: &str) -> String {
    let text = &text[..floor_char_boundary(text, TEXT_PREFIX_LEN)];

    let mut res = String::with_capacity(text.len());
    let mut run = String::new();
    for ch in text.chars() {
        // wider than `\p{L}`: vowel signs and other alphabetic marks stay inside words
        if ch.is_alphabetic() {
            flush_separators(&mut res, &mut run);
            res.push(ch);
        } else {
            run.push(ch);
        }
    }
    flush_separators(&mut res, &mut run);

    let trimmed = res.trim_matches(' ');
    if trimmed.len() != res.len() {
        res = trimmed.to_owned();
    }

    if res.len() > TEXT_CUT_OFFSET {
        // cut to the first space after the offset, but never longer than the max
        let cut = res.as_bytes()[TEXT_CUT_OFFSET..]
            .iter()
            .position(|&b| b == b' ')
            .map_or(TEXT_CUT_OFFSET, |p| p + TEXT_CUT_OFFSET)
            .min(TEXT_CUT_MAX);
        res.truncate(floor_char_boundary(&res, cut));
    }

    res
}

#[inline]
fn make_key(word_start: bool, bytes: &[u8], word_end: bool) -> NgramKey {
    let mut key = NgramKey::new_const();
    if word_start {
        key.push(b' ');
    }
    key.extend(bytes.iter().copied());
    if word_end {
        key.push(b' ');
    }
    key
}

/// Distinct n-grams of a text with their calibrated frequencies,
/// ordered by first appearance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextNgrams {
    pub(crate) ngrams: Vec<(NgramKey, f64)>,
}

impl TextNgrams {
    /// Number of distinct n-grams
    #[inline]
    pub fn len(&self) -> usize {
        self.ngrams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ngrams.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> {
        self.ngrams.iter().map(|(k, f)| (k.as_slice(), *f))
    }

    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<f64> {
        self.ngrams
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, f)| *f)
    }
}

/// Lower-cases a normalized text, and splits its words into byte n-grams.
///
/// The first n-gram of a word gets a leading space, the last one a trailing space.
/// The last n-gram always covers the final `ngram_length` bytes of the word,
/// and words not longer than `ngram_length` produce a single n-gram.
pub fn extract_ngrams(text: &str, ngram_length: usize, ngram_stride: usize) -> TextNgrams {
    let ngram_length = ngram_length.clamp(1, NGRAM_MAX_LEN);
    let ngram_stride = ngram_stride.max(1);
    let text = text.to_lowercase();

    let mut positions: AHashMap<NgramKey, usize> = AHashMap::new();
    let mut counts: Vec<(NgramKey, u32)> = Vec::new();
    let mut total: u32 = 0;

    let mut add = |key: NgramKey| {
        total += 1;
        match positions.get(&key) {
            Some(&i) => counts[i].1 += 1,
            None => {
                positions.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    };

    for word in text.split(' ').filter(|w| !w.is_empty()) {
        let word = word.as_bytes();
        let word = &word[..word.len().min(WORD_MAX_LEN)];
        let len = word.len();

        let mut j = 0;
        while j + ngram_length < len {
            add(make_key(j == 0, &word[j..j + ngram_length], false));
            j += ngram_stride;
        }
        add(make_key(
            j == 0,
            &word[len.saturating_sub(ngram_length)..],
            true,
        ));
    }

    if total == 0 {
        return TextNgrams::default();
    }

    let total = f64::from(total);
    TextNgrams {
        ngrams: counts
            .into_iter()
            .map(|(k, cnt)| (k, f64::from(cnt) / total * FREQUENCY_CALIBRATION))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use rstest::*;

    fn keys(ngrams: &TextNgrams) -> Vec<&[u8]> {
        ngrams.iter().map(|(k, _)| k).collect()
    }

    #[rstest(
        text,
        expected,
        case("Hola, cómo te llamas?", "Hola cómo te llamas"),
        case("  --¿Qué?  ", "Qué"),
        case("don't stop", "don't stop"),
        case("rock 'n roll", "rock 'n roll"),
        case("a.'b", "a 'b"),
        case("x123y", "x y"),
        case("''", "''"),
        case("काम करो!", "काम करो"),
        case("", "")
    )]
    fn test_normalize_text(text: &str, expected: &str) {
        assert_eq!(normalize_text(text), expected);
    }

    #[test]
    fn test_normalize_cut_at_space_after_offset() {
        let word = "abcdefghi ";
        let text = word.repeat(60);
        let normalized = normalize_text(&text);
        // spaces at 9, 19 .. 349, next one after 350 is 359
        assert_eq!(normalized.len(), 359);
        assert!(!normalized.ends_with(' '));
    }

    #[test]
    fn test_normalize_cut_max() {
        let text = "a".repeat(500);
        assert_eq!(normalize_text(&text).len(), TEXT_CUT_OFFSET);

        let text = format!("{} {}", "a".repeat(349), "b".repeat(100));
        // space is exactly at 349, so the next space search from 350 fails
        assert_eq!(normalize_text(&text).len(), TEXT_CUT_OFFSET);

        let text = format!("{} c", "a".repeat(390));
        assert_eq!(normalize_text(&text).len(), TEXT_CUT_MAX);
    }

    #[test]
    fn test_normalize_cut_char_boundary() {
        let text = "é".repeat(300);
        let normalized = normalize_text(&text);
        assert_eq!(normalized.len(), TEXT_CUT_OFFSET);
        let text = format!("a{}", "é".repeat(300));
        assert_eq!(normalize_text(&text).len(), TEXT_CUT_OFFSET - 1);
    }

    #[test]
    fn test_extract_word_boundaries() {
        let ngrams = extract_ngrams("cat catalog", 4, 3);
        assert_eq!(
            keys(&ngrams),
            vec![&b" cat "[..], &b" cata"[..], &b"alog "[..]]
        );
    }

    #[test]
    fn test_extract_stride() {
        let ngrams = extract_ngrams("abcdefghij", 4, 3);
        assert_eq!(
            keys(&ngrams),
            vec![&b" abcd"[..], &b"defg"[..], &b"ghij "[..]]
        );

        let ngrams = extract_ngrams("abcdefghij", 4, 4);
        assert_eq!(
            keys(&ngrams),
            vec![&b" abcd"[..], &b"efgh"[..], &b"ghij "[..]]
        );
    }

    #[test]
    fn test_extract_lowercase_and_counts() {
        let ngrams = extract_ngrams("To to TO be", 4, 3);
        assert_eq!(ngrams.len(), 2);
        let to = ngrams.get(b" to ").unwrap();
        let be = ngrams.get(b" be ").unwrap();
        assert!(approx_eq!(f64, to, 3.0 / 4.0 * FREQUENCY_CALIBRATION, ulps = 2));
        assert!(approx_eq!(f64, be, 1.0 / 4.0 * FREQUENCY_CALIBRATION, ulps = 2));
    }

    #[test]
    fn test_extract_long_word_truncated() {
        let word = "a".repeat(200);
        let ngrams = extract_ngrams(&word, 4, 3);
        // 70 bytes: starts 0, 3 .. 63, then the tail
        assert_eq!(ngrams.len(), 3);
        assert_eq!(keys(&ngrams), vec![&b" aaaa"[..], &b"aaaa"[..], &b"aaaa "[..]]);
    }

    #[test]
    fn test_extract_multibyte_split() {
        let ngrams = extract_ngrams("señora", 4, 3);
        // keys are raw bytes and may split a char
        assert_eq!(keys(&ngrams), vec![&b" se\xc3\xb1"[..], &b"\xb1ora "[..]]);
    }

    #[test]
    fn test_extract_empty() {
        assert!(extract_ngrams("", 4, 3).is_empty());
        assert!(extract_ngrams("   ", 4, 3).is_empty());
    }
}
