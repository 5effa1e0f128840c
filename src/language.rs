use crate::error::DatabaseError;
use ::core::str::FromStr;
use compact_str::CompactString;
use strum_macros::{EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Internal compact language id, index into the database language list
pub type LanguageId = u16;

/// Code returned for undetermined detections
pub const UNDETERMINED: &str = "und";

/// Output representation of detected languages
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumCount, EnumIter, EnumString, IntoStaticStr,
)]
pub enum OutputScheme {
    #[default]
    #[strum(serialize = "ISO639_1")]
    Iso639_1,
    #[strum(serialize = "ISO639_2T")]
    Iso639_2T,
    #[strum(serialize = "ISO639_1_BCP47")]
    Iso639_1Bcp47,
    #[strum(serialize = "ISO639_2T_BCP47")]
    Iso639_2TBcp47,
    #[strum(serialize = "FULL_TEXT")]
    FullText,
}

impl OutputScheme {
    /// Parses a scheme name, e.g. `"ISO639_2T"`
    #[inline]
    pub fn parse(name: &str) -> Result<Self, DatabaseError> {
        Self::from_str(name).map_err(|_| DatabaseError::InvalidScheme(name.to_owned()))
    }

    /// Maps a database language code (ISO 639-1) into this scheme.
    /// Codes without a known mapping are returned unchanged.
    pub fn format(self, code: &str) -> CompactString {
        let Some(row) = KNOWN_LANGUAGES.iter().find(|row| row.0 == code) else {
            return CompactString::from(code);
        };

        match self {
            Self::Iso639_1 => CompactString::from(row.0),
            Self::Iso639_2T => CompactString::from(row.1),
            Self::Iso639_1Bcp47 => match row.2 {
                Some(script) => CompactString::from(format!("{}-{script}", row.0)),
                None => CompactString::from(row.0),
            },
            Self::Iso639_2TBcp47 => match row.2 {
                Some(script) => CompactString::from(format!("{}-{script}", row.1)),
                None => CompactString::from(row.1),
            },
            Self::FullText => CompactString::from(row.3),
        }
    }

    /// All output names for a list of database codes, index aligned
    #[inline]
    pub fn format_all<'a>(self, codes: impl IntoIterator<Item = &'a str>) -> Vec<CompactString> {
        codes.into_iter().map(|c| self.format(c)).collect()
    }
}

/// Lower-cases and collapses non `a-z` runs into a single space,
/// so `"EN"`, `" en "` and `"Azerbaijani (Latin)"` compare loosely
pub(crate) fn normalize_code(code: &str) -> String {
    let mut res = String::with_capacity(code.len());
    let mut pending_space = false;
    for ch in code.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() {
            if pending_space && !res.is_empty() {
                res.push(' ');
            }
            pending_space = false;
            res.push(ch);
        } else {
            pending_space = true;
        }
    }
    res
}

/// (ISO 639-1, ISO 639-2/T, BCP-47 script tag, full name)
type LanguageRow = (&'static str, &'static str, Option<&'static str>, &'static str);

const KNOWN_LANGUAGES: [LanguageRow; 60] = [
    ("am", "amh", None, "Amharic"),
    ("ar", "ara", None, "Arabic"),
    ("az", "aze", Some("Latn"), "Azerbaijani (Latin)"),
    ("be", "bel", None, "Belarusian"),
    ("bg", "bul", None, "Bulgarian"),
    ("bn", "ben", None, "Bengali"),
    ("ca", "cat", None, "Catalan"),
    ("cs", "ces", None, "Czech"),
    ("da", "dan", None, "Danish"),
    ("de", "deu", None, "German"),
    ("el", "ell", None, "Greek"),
    ("en", "eng", None, "English"),
    ("es", "spa", None, "Spanish"),
    ("et", "est", None, "Estonian"),
    ("eu", "eus", None, "Basque"),
    ("fa", "fas", None, "Persian"),
    ("fi", "fin", None, "Finnish"),
    ("fr", "fra", None, "French"),
    ("gu", "guj", None, "Gujarati"),
    ("he", "heb", None, "Hebrew"),
    ("hi", "hin", None, "Hindi"),
    ("hr", "hrv", None, "Croatian"),
    ("hu", "hun", None, "Hungarian"),
    ("hy", "hye", None, "Armenian"),
    ("is", "isl", None, "Icelandic"),
    ("it", "ita", None, "Italian"),
    ("ja", "jpn", None, "Japanese"),
    ("ka", "kat", None, "Georgian"),
    ("kn", "kan", None, "Kannada"),
    ("ko", "kor", None, "Korean"),
    ("ku", "kur", Some("Arab"), "Kurdish (Arabic)"),
    ("lo", "lao", None, "Lao"),
    ("lt", "lit", None, "Lithuanian"),
    ("lv", "lav", None, "Latvian"),
    ("ml", "mal", None, "Malayalam"),
    ("mr", "mar", None, "Marathi"),
    ("ms", "msa", Some("Latn"), "Malay (Latin)"),
    ("nl", "nld", None, "Dutch"),
    ("no", "nor", None, "Norwegian"),
    ("or", "ori", None, "Oriya"),
    ("pa", "pan", None, "Punjabi"),
    ("pl", "pol", None, "Polish"),
    ("pt", "por", None, "Portuguese"),
    ("ro", "ron", None, "Romanian"),
    ("ru", "rus", None, "Russian"),
    ("sk", "slk", None, "Slovak"),
    ("sl", "slv", None, "Slovene"),
    ("sq", "sqi", None, "Albanian"),
    ("sr", "srp", Some("Cyrl"), "Serbian (Cyrillic)"),
    ("sv", "swe", None, "Swedish"),
    ("ta", "tam", None, "Tamil"),
    ("te", "tel", None, "Telugu"),
    ("th", "tha", None, "Thai"),
    ("tl", "tgl", None, "Tagalog"),
    ("tr", "tur", None, "Turkish"),
    ("uk", "ukr", None, "Ukrainian"),
    ("ur", "urd", None, "Urdu"),
    ("vi", "vie", None, "Vietnamese"),
    ("yo", "yor", None, "Yoruba"),
    ("zh", "zho", None, "Chinese"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use strum::{EnumCount, IntoEnumIterator};

    #[rstest(
        scheme,
        code,
        expected,
        case(OutputScheme::Iso639_1, "es", "es"),
        case(OutputScheme::Iso639_2T, "es", "spa"),
        case(OutputScheme::Iso639_1Bcp47, "sr", "sr-Cyrl"),
        case(OutputScheme::Iso639_1Bcp47, "en", "en"),
        case(OutputScheme::Iso639_2TBcp47, "az", "aze-Latn"),
        case(OutputScheme::FullText, "ku", "Kurdish (Arabic)"),
        case::unknown(OutputScheme::FullText, "xx", "xx")
    )]
    fn test_format(scheme: OutputScheme, code: &str, expected: &str) {
        assert_eq!(scheme.format(code), expected);
    }

    #[test]
    fn test_parse() {
        for scheme in OutputScheme::iter() {
            let name: &'static str = scheme.into();
            assert_eq!(OutputScheme::parse(name).unwrap(), scheme);
        }
        assert_eq!(OutputScheme::COUNT, 5);
        assert!(matches!(
            OutputScheme::parse("ISO"),
            Err(DatabaseError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" EN "), "en");
        assert_eq!(normalize_code("Azerbaijani (Latin)"), "azerbaijani latin");
        assert_eq!(normalize_code("sr-Cyrl"), "sr cyrl");
    }

    #[test]
    fn test_table_codes_unique() {
        let mut codes: Vec<_> = KNOWN_LANGUAGES.iter().map(|r| r.0).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), KNOWN_LANGUAGES.len());
    }
}
