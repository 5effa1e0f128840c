use crate::BuildError;
use ::std::path::Path;
use eld::{write_blob, BlobInfo, LanguageId, NgramTable};
use itertools::Itertools;

/// Ids of `codes` in the table, codes compare case insensitively
pub fn select_languages(
    table: &NgramTable,
    codes: &[String],
) -> Result<Vec<LanguageId>, BuildError> {
    let ids: Vec<LanguageId> = codes
        .iter()
        .map(|code| {
            table
                .languages()
                .iter()
                .position(|l| l.eq_ignore_ascii_case(code.trim()))
                .map(|i| i as LanguageId)
                .ok_or_else(|| BuildError::UnknownLanguage(code.clone()))
        })
        .collect::<Result<_, _>>()?;
    Ok(ids.into_iter().sorted_unstable().dedup().collect())
}

/// File name of `path` without the array suffix
pub fn default_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".encom.br") {
        Some(stem) => stem.to_owned(),
        None => name,
    }
}

/// Writes the blob files of an array database, restricted to `codes` unless empty
pub fn array_to_blob(
    input: &Path,
    out_dir: &Path,
    stem: Option<&str>,
    codes: &[String],
) -> Result<BlobInfo, BuildError> {
    let mut table = NgramTable::read(input)?;
    if !codes.is_empty() {
        let ids = select_languages(&table, codes)?;
        table = table.retain_languages(&ids);
    }
    let stem = stem.map_or_else(|| default_stem(input), ToOwned::to_owned);
    Ok(write_blob(&table, out_dir, &stem)?)
}

/// Rewrites an array database with or without escaped keys, returns the n-gram count
pub fn reencode(input: &Path, output: &Path, encode: bool) -> Result<usize, BuildError> {
    let table = NgramTable::read(input)?;
    table.write(output, encode)?;
    Ok(table.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eld::{BackendMode, BlobFiles, DataCache, LanguageDatabase, LoadOptions};

    fn table() -> NgramTable {
        let mut table = NgramTable::new("ngrams-t", ["en", "es", "de"], 4, 3)
            .with_avg_scores(vec![1.0; 3]);
        table.insert(b" the ", [(0, 3000.0)]).unwrap();
        table.insert(b" el ", [(1, 2500.0)]).unwrap();
        table.insert(b" die ", [(0, 10.0), (2, 2800.0)]).unwrap();
        table
    }

    #[test]
    fn test_select_languages() {
        let table = table();
        let codes = ["DE".to_owned(), "en".to_owned(), " de ".to_owned()];
        assert_eq!(select_languages(&table, &codes).unwrap(), vec![0, 2]);
        assert!(matches!(
            select_languages(&table, &["fr".to_owned()]),
            Err(BuildError::UnknownLanguage(_))
        ));
    }

    #[test]
    fn test_default_stem() {
        assert_eq!(default_stem(Path::new("/data/array/ngrams-m.encom.br")), "ngrams-m");
        assert_eq!(default_stem(Path::new("custom")), "custom");
    }

    #[test]
    fn test_array_to_blob_subset() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ngrams-t.encom.br");
        table().write(&input, true).unwrap();

        let out = dir.path().join("blob");
        let info = array_to_blob(&input, &out, None, &["de".to_owned()]).unwrap();
        assert_eq!(info.subset, Some(vec![2]));
        let files = BlobFiles::new(&out, "ngrams-t");
        assert!(files.index.is_file() && files.data.is_file());

        let database = LanguageDatabase::load(
            files.info.to_str().unwrap(),
            LoadOptions::default().mode(BackendMode::RawBytes),
            &DataCache::new(),
        )
        .unwrap();
        assert_eq!(database.lookup(b" the "), None);
        assert_eq!(database.lookup(b" die ").map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_reencode() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.encom.br");
        let output = dir.path().join("out.encom.br");
        table().write(&input, true).unwrap();

        assert_eq!(reencode(&input, &output, false).unwrap(), 3);
        let table = NgramTable::read(&output).unwrap();
        assert_eq!(table.get(b" el "), Some(&[(1, 2500.0)][..]));
    }
}
