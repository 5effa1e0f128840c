use crate::{
    database::{open_backend, write_blob, Backend, DatabaseSource, LanguageDatabase, NgramTable},
    error::DatabaseError,
    language::{normalize_code, LanguageId, OutputScheme},
};
use ::std::{fmt::Write as _, sync::Arc};
use compact_str::CompactString;
use itertools::Itertools;
use parking_lot::Mutex;

/// Sorted set of language ids
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LanguageSubset {
    ids: Vec<LanguageId>,
}

impl LanguageSubset {
    #[inline]
    pub fn new(ids: impl IntoIterator<Item = LanguageId>) -> Self {
        Self {
            ids: ids.into_iter().sorted_unstable().dedup().collect(),
        }
    }

    #[inline]
    pub fn ids(&self) -> &[LanguageId] {
        &self.ids
    }

    #[inline]
    pub fn contains(&self, id: LanguageId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Short string unique to the set: ids are grouped by 31 into bitfields,
    /// each written in base 35, groups joined by `z` (missing groups stay empty)
    pub fn bitfield(&self) -> String {
        let Some(&max) = self.ids.last() else {
            return String::new();
        };

        let mut groups = vec![0u32; max as usize / 31 + 1];
        for &id in &self.ids {
            groups[id as usize / 31] |= 1 << (id % 31);
        }

        groups
            .into_iter()
            .map(|bits| match bits {
                0 => String::new(),
                bits => to_base35(bits),
            })
            .join("z")
    }
}

fn to_base35(mut value: u32) -> String {
    const DIGITS: &[u8; 35] = b"0123456789abcdefghijklmnopqrstuvwxy";
    let mut res = Vec::new();
    loop {
        res.push(DIGITS[(value % 35) as usize]);
        value /= 35;
        if value == 0 {
            break;
        }
    }
    res.reverse();
    String::from_utf8_lossy(&res).into_owned()
}

/// `<name>_<count>_<d?><bitfield>`, `d` marks files with unencoded n-gram keys
pub fn subset_cache_key(name: &str, subset: &LanguageSubset, encode: bool) -> String {
    let mut key = String::with_capacity(name.len() + 16);
    let _ = write!(
        key,
        "{name}_{}_{}{}",
        subset.len(),
        if encode { "" } else { "d" },
        subset.bitfield()
    );
    key
}

/// Outcome of [`LanguageDatabase::apply_materialized`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubsetResult {
    pub success: bool,
    /// Codes of the subset languages
    pub languages: Vec<CompactString>,
    pub error: Option<String>,
    /// Cache key the subset is stored under, usable as a database identifier
    pub saved_as: Option<String>,
}

impl SubsetResult {
    #[inline]
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct SubsetState {
    /// Cache key of the active materialized subset
    loaded: Option<String>,
    /// Unfiltered backend, kept while a subset is active
    original: Option<Arc<Backend>>,
}

/// Materialized subset state of a database, serializes subset switches
#[derive(Default)]
pub(crate) struct SubsetManager {
    state: Mutex<SubsetState>,
}

impl LanguageDatabase {
    /// Ids of the languages in `codes`, matched loosely against the database codes
    /// and against their `scheme` names. Unknown codes are skipped.
    pub fn limit_to<S: AsRef<str>>(
        &self,
        codes: impl IntoIterator<Item = S>,
        scheme: OutputScheme,
    ) -> LanguageSubset {
        let languages = self.languages();
        let codes_normalized: Vec<String> =
            languages.iter().map(|l| normalize_code(l)).collect();
        let names_normalized: Vec<String> = match scheme {
            OutputScheme::Iso639_1 => Vec::new(),
            _ => languages
                .iter()
                .map(|l| normalize_code(&scheme.format(l)))
                .collect(),
        };

        let mut ids = Vec::new();
        for code in codes {
            let code = code.as_ref();
            let normalized = normalize_code(code);
            let found = codes_normalized
                .iter()
                .position(|c| *c == normalized)
                .or_else(|| names_normalized.iter().position(|n| *n == normalized));
            match found {
                Some(i) => ids.push(i as LanguageId),
                None => tracing::warn!("Unknown language {code:?} skipped"),
            }
        }
        LanguageSubset::new(ids)
    }

    /// Cache key of the active materialized subset
    #[inline]
    pub fn active_subset(&self) -> Option<String> {
        self.subsets.state.lock().loaded.clone()
    }

    /// Replaces the backend with one holding only the `subset` languages,
    /// `None` restores the full database.
    ///
    /// A stored subset with the same cache key is reused. With `persist` a new
    /// subset is stored in the backend format, and reopened in the backend mode;
    /// if storing fails the subset stays active in memory, and the error is reported.
    /// A database loaded from a stored subset accepts only languages of that subset.
    pub fn apply_materialized(
        &self,
        subset: Option<&LanguageSubset>,
        persist: bool,
        encode: bool,
    ) -> Result<SubsetResult, DatabaseError> {
        let mut state = self.subsets.state.lock();

        let Some(subset) = subset else {
            self.restore_original(&mut state)?;
            return Ok(SubsetResult {
                success: true,
                ..Default::default()
            });
        };
        if subset.is_empty() {
            return Ok(SubsetResult::failed("No language matched this set"));
        }
        if let Some(id) = subset
            .ids()
            .iter()
            .find(|id| **id as usize >= self.languages().len())
        {
            return Ok(SubsetResult::failed(format!("Unknown language id {id}")));
        }
        // a database loaded from a stored subset only holds its own languages
        if let Some(base) = &self.meta.subset {
            if let Some(id) = subset.ids().iter().find(|id| !base.contains(id)) {
                return Ok(SubsetResult::failed(format!(
                    "Language {} is not in the subset database {}",
                    self.languages()[*id as usize],
                    self.name()
                )));
            }
        }

        let key = subset_cache_key(self.name(), subset, encode);
        let mut saved_as = None;
        let mut error = None;

        if state.loaded.as_deref() != Some(key.as_str()) {
            let backend = match self.open_stored_subset(&key, subset) {
                Some(backend) => {
                    saved_as = Some(key.clone());
                    backend
                }
                None => {
                    let filtered = self.unfiltered_table(&state)?.retain_languages(subset.ids());
                    if persist {
                        match self.store_subset(&filtered, &key, encode) {
                            Ok(()) => {
                                saved_as = Some(key.clone());
                                self.open_subset(&key, filtered)
                            }
                            Err(e) => {
                                tracing::warn!("Subset {key} not stored: {e}");
                                error = Some(e.to_string());
                                Backend::InMemory(Arc::new(filtered))
                            }
                        }
                    } else {
                        Backend::InMemory(Arc::new(filtered))
                    }
                }
            };

            let previous = self.swap_backend(Arc::new(backend));
            if state.loaded.is_none() && self.options.keep_original {
                state.original = Some(previous);
            }
            state.loaded = Some(key.clone());
            tracing::info!("Subset {key} active, {} languages", subset.len());
        } else if persist {
            if self.stored_subset_exists(&key) {
                saved_as = Some(key.clone());
            } else if let Some(table) = self.backend().table() {
                match self.store_subset(table, &key, encode) {
                    Ok(()) => saved_as = Some(key.clone()),
                    Err(e) => {
                        tracing::warn!("Subset {key} not stored: {e}");
                        error = Some(e.to_string());
                    }
                }
            }
        }

        Ok(SubsetResult {
            success: true,
            languages: subset
                .ids()
                .iter()
                .map(|id| self.languages()[*id as usize].clone())
                .collect(),
            error,
            saved_as,
        })
    }

    fn restore_original(&self, state: &mut SubsetState) -> Result<(), DatabaseError> {
        if state.loaded.is_none() {
            return Ok(());
        }
        let backend = match state.original.take() {
            Some(backend) => backend,
            None => Arc::new(self.reopen_source()?),
        };
        self.swap_backend(backend);
        state.loaded = None;
        tracing::info!("Subset disabled for {}", self.name());
        Ok(())
    }

    fn unfiltered_table(&self, state: &SubsetState) -> Result<Arc<NgramTable>, DatabaseError> {
        if state.loaded.is_none() {
            if let Some(table) = self.backend().table() {
                return Ok(table.clone());
            }
        } else if let Some(table) = state.original.as_ref().and_then(|b| b.table()) {
            return Ok(table.clone());
        }
        self.source_table()
    }

    fn stored_subset_exists(&self, key: &str) -> bool {
        let source = DatabaseSource::Subset(key.to_owned());
        let data_dir = &self.options.data_dir;
        if self.options.mode.is_blob() {
            source.blob_files(data_dir).info.is_file()
        } else {
            source.array_path(data_dir).is_file()
        }
    }

    /// Opens a stored subset, if it exists and holds exactly `subset`
    fn open_stored_subset(&self, key: &str, subset: &LanguageSubset) -> Option<Backend> {
        if !self.stored_subset_exists(key) {
            return None;
        }

        let source = DatabaseSource::Subset(key.to_owned());
        let data_dir = &self.options.data_dir;
        match open_backend(
            &source.array_path(data_dir),
            &source.blob_files(data_dir),
            self.options.mode,
            &self.cache,
        ) {
            Ok((meta, backend))
                if meta.languages == self.meta.languages
                    && meta.subset.as_deref() == Some(subset.ids()) =>
            {
                tracing::debug!("Stored subset {key} reused");
                Some(backend)
            }
            Ok(_) => {
                tracing::warn!("Stored subset {key} does not match the database, rebuilding");
                None
            }
            Err(e) => {
                tracing::warn!("Stored subset {key} unreadable, rebuilding: {e}");
                None
            }
        }
    }

    fn store_subset(&self, table: &NgramTable, key: &str, encode: bool) -> Result<(), DatabaseError> {
        let source = DatabaseSource::Subset(key.to_owned());
        let data_dir = &self.options.data_dir;
        if self.options.mode.is_blob() {
            write_blob(table, &self.options.subset_dir(), key)?;
            let files = source.blob_files(data_dir);
            self.cache.invalidate(&files.index);
            self.cache.invalidate(&files.data);
        } else {
            let path = source.array_path(data_dir);
            table.write(&path, encode)?;
            self.cache.invalidate(&path);
        }
        Ok(())
    }

    /// Backend of a just stored subset, blob modes reopen the written files
    fn open_subset(&self, key: &str, table: NgramTable) -> Backend {
        if !self.options.mode.is_blob() {
            return Backend::InMemory(Arc::new(table));
        }

        let source = DatabaseSource::Subset(key.to_owned());
        let data_dir = &self.options.data_dir;
        match open_backend(
            &source.array_path(data_dir),
            &source.blob_files(data_dir),
            self.options.mode,
            &self.cache,
        ) {
            Ok((_, backend)) => backend,
            Err(e) => {
                tracing::warn!("Stored subset {key} not reopened, kept in memory: {e}");
                Backend::InMemory(Arc::new(table))
            }
        }
    }
}
