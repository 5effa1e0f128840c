mod blob;
mod cache;
mod memory;
mod table;

pub use blob::{score_multiplier, slot_count, write_blob, BlobFiles, BlobInfo};
pub use cache::DataCache;
pub use memory::SizeTier;
pub use table::{NgramTable, ScoreMap};

use crate::{error::DatabaseError, language::LanguageId, subset::SubsetManager};
use ::core::str::FromStr;
use ::std::{
    env, fmt,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use blob::{map_blob_file, BlobBytes, BlobIndex, DiskBlob};
use table::DatabaseMeta;
use compact_str::CompactString;
use memmap2::Mmap;
use parking_lot::RwLock;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};
use tempfile::NamedTempFile;

/// Environment variable overriding the default data directory
pub const DATA_DIR_ENV: &str = "ELD_DATA_DIR";

const ARRAY_DIR: &str = "array";
const BLOB_DIR: &str = "blob";
const SUBSET_DIR: &str = "subset";
pub(crate) const ARRAY_SUFFIX: &str = ".encom.br";
const FILE_SUFFIXES: [&str; 4] = [ARRAY_SUFFIX, ".info.encom", ".index.bin", ".data.bin"];

/// How the n-gram table is held and queried
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr,
)]
pub enum BackendMode {
    /// Hash map in memory, the fastest and the most memory hungry
    #[default]
    #[strum(serialize = "array")]
    InMemoryMap,
    /// Blob files read into memory once, shared through [`DataCache`]
    #[strum(serialize = "string")]
    SerializedBlob,
    /// Blob files mapped into memory
    #[strum(serialize = "bytes")]
    RawBytes,
    /// Blob files read with a seek per probe, for minimal memory
    #[strum(serialize = "disk")]
    DiskStream,
}

impl BackendMode {
    #[inline]
    pub fn parse(name: &str) -> Result<Self, DatabaseError> {
        Self::from_str(name).map_err(|_| DatabaseError::InvalidMode(name.to_owned()))
    }

    #[inline]
    pub const fn is_blob(self) -> bool {
        !matches!(self, Self::InMemoryMap)
    }
}

/// Where a database comes from
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DatabaseSource {
    /// One of the bundled databases
    Tier(SizeTier),
    /// A materialized subset, by its cache key
    Subset(String),
    /// Explicit file path, of the array file or of any blob file
    Path(PathBuf),
}

impl DatabaseSource {
    /// Parses a tier name (`"small"`, `"m"` ...), a subset cache key, or a file path
    pub fn parse(id: &str) -> Result<Self, DatabaseError> {
        if let Ok(tier) = SizeTier::from_str(id) {
            return Ok(Self::Tier(tier));
        }
        if id.contains(['/', '\\']) || FILE_SUFFIXES.iter().any(|s| id.ends_with(s)) {
            return Ok(Self::Path(PathBuf::from(id)));
        }
        if !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Ok(Self::Subset(id.to_owned()));
        }
        Err(DatabaseError::UnknownDatabase(id.to_owned()))
    }

    /// Directory and file stem
    fn location(&self, data_dir: &Path) -> (PathBuf, String) {
        match self {
            Self::Tier(tier) => (data_dir.join(ARRAY_DIR), tier.stem().to_owned()),
            Self::Subset(key) => (data_dir.join(SUBSET_DIR), key.clone()),
            Self::Path(path) => split_stem(path),
        }
    }

    pub fn array_path(&self, data_dir: &Path) -> PathBuf {
        let (dir, stem) = self.location(data_dir);
        dir.join(format!("{stem}{ARRAY_SUFFIX}"))
    }

    pub fn blob_files(&self, data_dir: &Path) -> BlobFiles {
        match self {
            Self::Tier(tier) => BlobFiles::new(&data_dir.join(BLOB_DIR), tier.stem()),
            _ => {
                let (dir, stem) = self.location(data_dir);
                BlobFiles::new(&dir, &stem)
            }
        }
    }
}

fn split_stem(path: &Path) -> (PathBuf, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = FILE_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(&name)
        .to_owned();
    (
        path.parent().map(Path::to_path_buf).unwrap_or_default(),
        stem,
    )
}

/// `ELD_DATA_DIR` if set, otherwise `eld_data` next to the executable
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = env::var_os(DATA_DIR_ENV) {
        return dir.into();
    }
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("eld_data")))
        .unwrap_or_else(|| PathBuf::from("eld_data"))
}

#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub data_dir: PathBuf,
    pub mode: BackendMode,
    /// Memory budget in bytes for in-memory tiers, host available memory if `None`
    pub memory_limit: Option<u64>,
    /// Keep the unfiltered database resident while a materialized subset is active
    pub keep_original: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mode: BackendMode::default(),
            memory_limit: None,
            keep_original: true,
        }
    }
}

impl LoadOptions {
    #[inline]
    pub fn data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    #[inline]
    pub fn mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    #[inline]
    pub fn keep_original(mut self, keep: bool) -> Self {
        self.keep_original = keep;
        self
    }

    #[inline]
    pub(crate) fn subset_dir(&self) -> PathBuf {
        self.data_dir.join(SUBSET_DIR)
    }
}

pub(crate) enum Backend {
    InMemory(Arc<NgramTable>),
    Serialized(BlobIndex<BlobBytes>),
    RawBytes(BlobIndex<Mmap>),
    DiskStream(DiskBlob),
}

impl Backend {
    /// Scores of `key`, blob backends decode them into `buf`
    #[inline]
    pub(crate) fn scores<'a>(
        &'a self,
        key: &[u8],
        buf: &'a mut Vec<(LanguageId, f32)>,
    ) -> Option<&'a [(LanguageId, f32)]> {
        match self {
            Self::InMemory(table) => table.get(key),
            Self::Serialized(blob) => blob.lookup_into(key, buf).then_some(&buf[..]),
            Self::RawBytes(blob) => blob.lookup_into(key, buf).then_some(&buf[..]),
            Self::DiskStream(blob) => match blob.lookup_into(key, buf) {
                Ok(true) => Some(&buf[..]),
                Ok(false) => None,
                Err(e) => {
                    tracing::error!("Blob read error, ngram skipped: {e}");
                    None
                }
            },
        }
    }

    pub(crate) fn mode(&self) -> BackendMode {
        match self {
            Self::InMemory(_) => BackendMode::InMemoryMap,
            Self::Serialized(_) => BackendMode::SerializedBlob,
            Self::RawBytes(_) => BackendMode::RawBytes,
            Self::DiskStream(_) => BackendMode::DiskStream,
        }
    }

    pub(crate) fn table(&self) -> Option<&Arc<NgramTable>> {
        match self {
            Self::InMemory(table) => Some(table),
            _ => None,
        }
    }
}

/// Opens `mode` backend of the database at the given files
pub(crate) fn open_backend(
    array_path: &Path,
    files: &BlobFiles,
    mode: BackendMode,
    cache: &DataCache,
) -> Result<(DatabaseMeta, Backend), DatabaseError> {
    if mode == BackendMode::InMemoryMap {
        let table = cache.table(array_path)?;
        return Ok((table.meta.clone(), Backend::InMemory(table)));
    }

    let info = BlobInfo::read(&files.info)?;
    let backend = match mode {
        BackendMode::SerializedBlob => Backend::Serialized(BlobIndex::new(
            &info,
            files,
            cache.blob_bytes(&files.index)?,
            cache.blob_bytes(&files.data)?,
        )?),
        BackendMode::RawBytes => Backend::RawBytes(BlobIndex::new(
            &info,
            files,
            map_blob_file(&files.index)?,
            map_blob_file(&files.data)?,
        )?),
        _ => Backend::DiskStream(DiskBlob::open(&info, files)?),
    };
    Ok((info.meta(), backend))
}

/// Writes into a temporary file in the same directory, then renames it into place
pub(crate) fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut File) -> io::Result<()>,
) -> Result<(), DatabaseError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(DatabaseError::io(dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(DatabaseError::io(dir))?;
    write(tmp.as_file_mut()).map_err(DatabaseError::io(path))?;
    tmp.persist(path)
        .map_err(|e| DatabaseError::io(path)(e.error))?;
    Ok(())
}

/// N-gram database with a swappable backend
pub struct LanguageDatabase {
    pub(crate) meta: DatabaseMeta,
    pub(crate) source: Option<DatabaseSource>,
    pub(crate) options: LoadOptions,
    pub(crate) cache: DataCache,
    backend: RwLock<Arc<Backend>>,
    pub(crate) subsets: SubsetManager,
}

impl fmt::Debug for LanguageDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageDatabase")
            .field("name", &self.meta.name)
            .field("languages", &self.meta.languages.len())
            .field("mode", &self.mode())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl LanguageDatabase {
    /// Loads a database by tier name, subset cache key, or file path
    #[inline]
    pub fn load(id: &str, options: LoadOptions, cache: &DataCache) -> Result<Self, DatabaseError> {
        Self::load_source(DatabaseSource::parse(id)?, options, cache)
    }

    pub fn load_source(
        source: DatabaseSource,
        options: LoadOptions,
        cache: &DataCache,
    ) -> Result<Self, DatabaseError> {
        if let (BackendMode::InMemoryMap, DatabaseSource::Tier(tier)) = (options.mode, &source) {
            memory::check_budget(*tier, options.memory_limit)?;
        }

        let (meta, backend) = open_backend(
            &source.array_path(&options.data_dir),
            &source.blob_files(&options.data_dir),
            options.mode,
            cache,
        )?;

        tracing::info!(
            "Loaded database {} ({:?}) in {} mode, {} languages",
            meta.name,
            source,
            <&'static str>::from(options.mode),
            meta.languages.len()
        );

        Ok(Self {
            meta,
            source: Some(source),
            options,
            cache: cache.clone(),
            backend: RwLock::new(Arc::new(backend)),
            subsets: SubsetManager::default(),
        })
    }

    /// Database over a table built by the host, always in [`BackendMode::InMemoryMap`].
    /// Materialized subsets are stored in `options.data_dir`.
    pub fn from_table(table: NgramTable, options: LoadOptions) -> Result<Self, DatabaseError> {
        table.validate(Path::new(table.meta.name.as_str()))?;
        let meta = table.meta.clone();
        Ok(Self {
            meta,
            source: None,
            options: LoadOptions {
                mode: BackendMode::InMemoryMap,
                keep_original: true,
                ..options
            },
            cache: DataCache::new(),
            backend: RwLock::new(Arc::new(Backend::InMemory(Arc::new(table)))),
            subsets: SubsetManager::default(),
        })
    }

    /// Base name, shared by the subsets of this database
    #[inline]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Database language codes, indexed by [`LanguageId`]
    #[inline]
    pub fn languages(&self) -> &[CompactString] {
        &self.meta.languages
    }

    /// Calibration baseline of every language
    #[inline]
    pub fn avg_scores(&self) -> &[f64] {
        &self.meta.avg_score
    }

    #[inline]
    pub fn ngram_length(&self) -> usize {
        self.meta.ngram_length
    }

    #[inline]
    pub fn ngram_stride(&self) -> usize {
        self.meta.ngram_stride
    }

    #[inline]
    pub fn source(&self) -> Option<&DatabaseSource> {
        self.source.as_ref()
    }

    #[inline]
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Mode of the active backend, a subset not persisted is always in-memory
    #[inline]
    pub fn mode(&self) -> BackendMode {
        self.backend.read().mode()
    }

    /// Languages and frequencies stored for an n-gram
    pub fn lookup(&self, key: &[u8]) -> Option<Vec<(LanguageId, f32)>> {
        let backend = self.backend();
        let mut buf = Vec::new();
        backend.scores(key, &mut buf).map(<[_]>::to_vec)
    }

    /// Snapshot of the active backend, stays valid across swaps
    #[inline]
    pub(crate) fn backend(&self) -> Arc<Backend> {
        self.backend.read().clone()
    }

    /// Replaces the active backend, returns the previous one
    #[inline]
    pub(crate) fn swap_backend(&self, backend: Arc<Backend>) -> Arc<Backend> {
        ::core::mem::replace(&mut *self.backend.write(), backend)
    }

    /// Unfiltered table, read from the source when it's not resident
    pub(crate) fn source_table(&self) -> Result<Arc<NgramTable>, DatabaseError> {
        let Some(source) = &self.source else {
            return Err(DatabaseError::UnknownDatabase(self.meta.name.to_string()));
        };
        self.cache.table(&source.array_path(&self.options.data_dir))
    }

    /// Reopens the source in the configured mode
    pub(crate) fn reopen_source(&self) -> Result<Backend, DatabaseError> {
        let Some(source) = &self.source else {
            return Err(DatabaseError::UnknownDatabase(self.meta.name.to_string()));
        };
        let data_dir = &self.options.data_dir;
        open_backend(
            &source.array_path(data_dir),
            &source.blob_files(data_dir),
            self.options.mode,
            &self.cache,
        )
        .map(|(_, backend)| backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest(
        id,
        expected,
        case("small", DatabaseSource::Tier(SizeTier::Small)),
        case("XL", DatabaseSource::Tier(SizeTier::ExtraLarge)),
        case("ngrams-m_3_d1z", DatabaseSource::Subset("ngrams-m_3_d1z".to_owned())),
        case("/data/my.encom.br", DatabaseSource::Path("/data/my.encom.br".into())),
        case("my.info.encom", DatabaseSource::Path("my.info.encom".into()))
    )]
    fn test_source_parse(id: &str, expected: DatabaseSource) {
        assert_eq!(DatabaseSource::parse(id).unwrap(), expected);
    }

    #[rstest(id, case(""), case("what is this?"))]
    fn test_source_parse_unknown(id: &str) {
        assert!(matches!(
            DatabaseSource::parse(id),
            Err(DatabaseError::UnknownDatabase(_))
        ));
    }

    #[test]
    fn test_source_paths() {
        let data_dir = Path::new("/data");
        let tier = DatabaseSource::Tier(SizeTier::Medium);
        assert_eq!(
            tier.array_path(data_dir),
            Path::new("/data/array/ngrams-m.encom.br")
        );
        assert_eq!(
            tier.blob_files(data_dir),
            BlobFiles::new(Path::new("/data/blob"), "ngrams-m")
        );

        let subset = DatabaseSource::Subset("k".to_owned());
        assert_eq!(
            subset.array_path(data_dir),
            Path::new("/data/subset/k.encom.br")
        );

        for name in ["db.encom.br", "db.info.encom", "db.index.bin", "db.data.bin"] {
            let path = DatabaseSource::Path(Path::new("/x").join(name));
            assert_eq!(path.array_path(data_dir), Path::new("/x/db.encom.br"));
            assert_eq!(path.blob_files(data_dir), BlobFiles::new(Path::new("/x"), "db"));
        }
    }

    #[rstest(
        name,
        mode,
        case("array", BackendMode::InMemoryMap),
        case("string", BackendMode::SerializedBlob),
        case("bytes", BackendMode::RawBytes),
        case("disk", BackendMode::DiskStream)
    )]
    fn test_mode_parse(name: &str, mode: BackendMode) {
        assert_eq!(BackendMode::parse(name).unwrap(), mode);
        assert_eq!(mode.is_blob(), name != "array");
    }

    #[test]
    fn test_mode_parse_invalid() {
        let err = BackendMode::parse("ram").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidMode(_)));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_memory_guard_runs_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let options = LoadOptions::default()
            .data_dir(dir.path())
            .memory_limit(1);
        assert!(matches!(
            LanguageDatabase::load("large", options.clone(), &DataCache::new()),
            Err(DatabaseError::MemoryBudget { .. })
        ));

        // blob modes are not guarded
        assert!(matches!(
            LanguageDatabase::load("large", options.mode(BackendMode::DiskStream), &DataCache::new()),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("f.bin");
        write_atomic(&path, |f| io::Write::write_all(f, b"one")).unwrap();
        write_atomic(&path, |f| io::Write::write_all(f, b"two")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }
}
