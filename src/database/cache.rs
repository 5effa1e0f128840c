use super::{
    blob::{read_blob_bytes, BlobBytes},
    table::NgramTable,
};
use crate::error::DatabaseError;
use ::std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use ahash::AHashMap;
use parking_lot::RwLock;

#[derive(Default)]
struct CacheInner {
    tables: RwLock<AHashMap<PathBuf, Arc<NgramTable>>>,
    blobs: RwLock<AHashMap<PathBuf, BlobBytes>>,
}

/// Parsed tables and blob bytes, shared between databases by the host.
/// Cloning gives another handle to the same cache.
#[derive(Clone, Default)]
pub struct DataCache(Arc<CacheInner>);

impl fmt::Debug for DataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCache")
            .field("tables", &self.0.tables.read().len())
            .field("blobs", &self.0.blobs.read().len())
            .finish()
    }
}

/// Builds the value while holding the write lock, so a key is built at most once
fn get_or_load<T: Clone>(
    map: &RwLock<AHashMap<PathBuf, T>>,
    path: &Path,
    load: impl FnOnce(&Path) -> Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    if let Some(value) = map.read().get(path) {
        return Ok(value.clone());
    }

    let mut map = map.write();
    if let Some(value) = map.get(path) {
        return Ok(value.clone());
    }
    let value = load(path)?;
    map.insert(path.to_owned(), value.clone());
    tracing::debug!("Cached {:?}", path);
    Ok(value)
}

impl DataCache {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn table(&self, path: &Path) -> Result<Arc<NgramTable>, DatabaseError> {
        get_or_load(&self.0.tables, path, |p| NgramTable::read(p).map(Arc::new))
    }

    pub(crate) fn blob_bytes(&self, path: &Path) -> Result<BlobBytes, DatabaseError> {
        get_or_load(&self.0.blobs, path, read_blob_bytes)
    }

    /// Forgets cached data of `path`, called after the file was rewritten
    pub(crate) fn invalidate(&self, path: &Path) {
        self.0.tables.write().remove(path);
        self.0.blobs.write().remove(path);
    }

    /// Number of cached files
    pub fn len(&self) -> usize {
        self.0.tables.read().len() + self.0.blobs.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.0.tables.write().clear();
        self.0.blobs.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_cached_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.encom.br");
        let mut table = NgramTable::new("t", ["en"], 4, 3);
        table.insert(b" a ", [(0, 1.0)]).unwrap();
        table.write(&path, true).unwrap();

        let cache = DataCache::new();
        let first = cache.table(&path).unwrap();
        let second = cache.clone().table(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.invalidate(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_errors_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DataCache::new();
        assert!(matches!(
            cache.table(&dir.path().join("missing.encom.br")),
            Err(DatabaseError::NotFound(_))
        ));
        assert!(cache.blob_bytes(&dir.path().join("missing.bin")).is_err());
        assert!(cache.is_empty());
    }
}
