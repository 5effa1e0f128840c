//! Binary open-addressing hash table of n-gram scores.
//!
//! A blob database is three files sharing a stem:
//! - `<stem>.index.bin`: header, `slots` entries of 8 bytes, trailer.
//!   An entry is the key fingerprint (4 bytes), the data offset in records
//!   (3 bytes, big-endian), and the record count (1 byte). All zeros is an empty slot.
//! - `<stem>.data.bin`: header, 3 byte records `[language, score u16 big-endian]`, trailer.
//! - `<stem>.info.encom`: [`BlobInfo`] metadata.
//!
//! Lookups probe linearly from `crc32(key) % slots`, and stop at the first
//! empty slot or the first fingerprint match. Only the first 4 key bytes are
//! compared, so any key, present in the table or not, may resolve to the scores
//! of another n-gram sharing its prefix (`" the "`, `" them"`) when their probe
//! runs overlap.

use super::{
    table::{DatabaseMeta, NgramTable},
    write_atomic,
};
use crate::{error::DatabaseError, language::LanguageId};
use ::std::{
    fs::{self, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use compact_str::CompactString;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub(crate) const BLOB_HEADER: &[u8; 36] = b"ELD ngram blob database, format v1\n\0";
pub(crate) const BLOB_TRAILER: &[u8; 16] = b"\n\0ELD BLOB END\n\0";
const FRAME_LEN: usize = BLOB_HEADER.len() + BLOB_TRAILER.len();

const SLOT_LEN: usize = 8;
const RECORD_LEN: usize = 3;
const MAX_RECORDS: usize = 0xFF_FFFF;
const DEFAULT_SCORE_MULTIPLIER: f64 = 2100.0;
pub(crate) const BLOB_INFO_VERSION: u32 = 1;

/// Metadata of a blob database, stored next to its binary files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub version: u32,
    pub name: CompactString,
    pub ngram_length: usize,
    pub ngram_stride: usize,
    pub slots: u32,
    pub score_multiplier: f64,
    pub languages: Vec<CompactString>,
    pub avg_score: Vec<f64>,
    pub subset: Option<Vec<LanguageId>>,
}

impl BlobInfo {
    pub(crate) fn meta(&self) -> DatabaseMeta {
        DatabaseMeta {
            name: self.name.clone(),
            languages: self.languages.clone(),
            avg_score: self.avg_score.clone(),
            ngram_length: self.ngram_length,
            ngram_stride: self.ngram_stride,
            subset: self.subset.clone(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, DatabaseError> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::NotFound(path.to_owned()),
            _ => DatabaseError::io(path)(e),
        })?;
        let info: Self = serde_encom::from_str(&content)
            .map_err(|e| DatabaseError::malformed(path, e.to_string()))?;

        if info.version != BLOB_INFO_VERSION {
            return Err(DatabaseError::malformed(
                path,
                format!("unsupported version {}", info.version),
            ));
        }
        if info.slots == 0 {
            return Err(DatabaseError::malformed(path, "empty index"));
        }
        if !(info.score_multiplier.is_finite() && info.score_multiplier > 0.0) {
            return Err(DatabaseError::malformed(path, "invalid score multiplier"));
        }
        info.meta().validate(path)?;
        Ok(info)
    }
}

/// Paths of the files of one blob database
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobFiles {
    pub info: PathBuf,
    pub index: PathBuf,
    pub data: PathBuf,
}

impl BlobFiles {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            info: dir.join(format!("{stem}.info.encom")),
            index: dir.join(format!("{stem}.index.bin")),
            data: dir.join(format!("{stem}.data.bin")),
        }
    }
}

/// Number of index slots for `ngrams` entries
pub fn slot_count(ngrams: usize) -> usize {
    let factor = match ngrams {
        0..10_000 => 5,
        10_000..30_000 => 4,
        30_000..100_000 => 3,
        _ => 2,
    };
    ngrams.max(1) * factor
}

/// Multiplier that maps the highest score into `u16`
pub fn score_multiplier(max_score: f64) -> f64 {
    if max_score * DEFAULT_SCORE_MULTIPLIER > f64::from(u16::MAX) {
        f64::from(u16::MAX) / max_score
    } else {
        DEFAULT_SCORE_MULTIPLIER
    }
}

#[inline]
fn fingerprint(key: &[u8]) -> [u8; 4] {
    let mut res = [0; 4];
    let len = key.len().min(4);
    res[..len].copy_from_slice(&key[..len]);
    res
}

#[inline]
fn home_slot(key: &[u8], slots: u32) -> u32 {
    crc32fast::hash(key) % slots
}

/// Encodes a table into index and data bytes, both framed
fn encode(table: &NgramTable, slots: u32, multiplier: f64) -> Result<(Vec<u8>, Vec<u8>), DatabaseError> {
    let entries = table.sorted_entries();
    let records_count: usize = entries.iter().map(|(_, scores)| scores.len()).sum();
    if records_count > MAX_RECORDS {
        return Err(DatabaseError::OutOfRange(format!(
            "{records_count} records, at most {MAX_RECORDS} are addressable"
        )));
    }

    let mut index = Vec::with_capacity(slots as usize * SLOT_LEN + FRAME_LEN);
    index.extend_from_slice(BLOB_HEADER);
    index.resize(BLOB_HEADER.len() + slots as usize * SLOT_LEN, 0);

    let mut data = Vec::with_capacity(records_count * RECORD_LEN + FRAME_LEN);
    data.extend_from_slice(BLOB_HEADER);

    let mut offset = 0usize;
    for (key, scores) in entries {
        let count = u8::try_from(scores.len()).map_err(|_| {
            DatabaseError::OutOfRange(format!("{} languages for one ngram", scores.len()))
        })?;

        for &(lang, score) in scores.iter() {
            let lang = u8::try_from(lang)
                .map_err(|_| DatabaseError::OutOfRange(format!("language id {lang}")))?;
            let value = (f64::from(score) * multiplier).round();
            if !(0.0..=f64::from(u16::MAX)).contains(&value) {
                return Err(DatabaseError::OutOfRange(format!("score {score}")));
            }
            data.push(lang);
            data.extend_from_slice(&(value as u16).to_be_bytes());
        }

        let mut slot_bytes = [0u8; SLOT_LEN];
        slot_bytes[..4].copy_from_slice(&fingerprint(key));
        slot_bytes[4..7].copy_from_slice(&(offset as u32).to_be_bytes()[1..]);
        slot_bytes[7] = count;

        let body = &mut index[BLOB_HEADER.len()..];
        let mut slot = home_slot(key, slots);
        let mut placed = false;
        for _ in 0..slots {
            let at = slot as usize * SLOT_LEN;
            let entry = &mut body[at..at + SLOT_LEN];
            if entry.iter().all(|b| *b == 0) {
                entry.copy_from_slice(&slot_bytes);
                placed = true;
                break;
            }
            slot = (slot + 1) % slots;
        }
        if !placed {
            return Err(DatabaseError::TableFull { slots });
        }

        offset += scores.len();
    }

    index.extend_from_slice(BLOB_TRAILER);
    data.extend_from_slice(BLOB_TRAILER);
    Ok((index, data))
}

/// Builds the blob files of `table` into `dir`, the info file is written last
pub fn write_blob(table: &NgramTable, dir: &Path, stem: &str) -> Result<BlobInfo, DatabaseError> {
    if table.is_empty() {
        return Err(DatabaseError::OutOfRange("empty ngram table".to_owned()));
    }
    if table.languages().len() > usize::from(u8::MAX) + 1 {
        return Err(DatabaseError::OutOfRange(format!(
            "{} languages, at most 256 fit",
            table.languages().len()
        )));
    }

    let slots = u32::try_from(slot_count(table.len()))
        .map_err(|_| DatabaseError::OutOfRange(format!("{} ngrams", table.len())))?;
    let multiplier = score_multiplier(f64::from(table.max_score()));
    let (index, data) = encode(table, slots, multiplier)?;

    let files = BlobFiles::new(dir, stem);
    write_atomic(&files.data, |f| io::Write::write_all(f, &data))?;
    write_atomic(&files.index, |f| io::Write::write_all(f, &index))?;

    let meta = &table.meta;
    let info = BlobInfo {
        version: BLOB_INFO_VERSION,
        name: meta.name.clone(),
        ngram_length: meta.ngram_length,
        ngram_stride: meta.ngram_stride,
        slots,
        score_multiplier: multiplier,
        languages: meta.languages.clone(),
        avg_score: meta.avg_score.clone(),
        subset: meta.subset.clone(),
    };
    let ser = serde_encom::to_string(&info)
        .map_err(|e| DatabaseError::malformed(&files.info, e.to_string()))?;
    write_atomic(&files.info, |f| io::Write::write_all(f, ser.as_bytes()))?;

    tracing::debug!(
        "Wrote blob {:?}: {} ngrams, {} slots, multiplier {}",
        files.info,
        table.len(),
        slots,
        multiplier
    );
    Ok(info)
}

/// Probes the index, returns `(offset, count)` in records
fn probe(
    slots: u32,
    key: &[u8],
    mut read_slot: impl FnMut(u32) -> io::Result<[u8; SLOT_LEN]>,
) -> io::Result<Option<(usize, usize)>> {
    let fingerprint = fingerprint(key);
    let mut slot = home_slot(key, slots);
    for _ in 0..slots {
        let entry = read_slot(slot)?;
        if entry == [0; SLOT_LEN] {
            return Ok(None);
        }
        if entry[..4] == fingerprint {
            let offset = u32::from_be_bytes([0, entry[4], entry[5], entry[6]]) as usize;
            return Ok(Some((offset, entry[7] as usize)));
        }
        slot = (slot + 1) % slots;
    }
    Ok(None)
}

fn decode_records(records: &[u8], multiplier: f32, out: &mut Vec<(LanguageId, f32)>) {
    out.clear();
    out.extend(records.chunks_exact(RECORD_LEN).map(|r| {
        (
            LanguageId::from(r[0]),
            f32::from(u16::from_be_bytes([r[1], r[2]])) / multiplier,
        )
    }));
}

fn check_frame(path: &Path, head: &[u8], tail: &[u8]) -> Result<(), DatabaseError> {
    if head != BLOB_HEADER {
        return Err(DatabaseError::Corrupted {
            path: path.to_owned(),
            reason: "invalid header",
        });
    }
    if tail != BLOB_TRAILER {
        return Err(DatabaseError::Corrupted {
            path: path.to_owned(),
            reason: "invalid trailer",
        });
    }
    Ok(())
}

fn check_sizes(files: &BlobFiles, slots: u32, index_len: usize, data_len: usize) -> Result<(), DatabaseError> {
    if index_len < FRAME_LEN || index_len - FRAME_LEN != slots as usize * SLOT_LEN {
        return Err(DatabaseError::Corrupted {
            path: files.index.clone(),
            reason: "index size does not match the slot count",
        });
    }
    if data_len < FRAME_LEN || (data_len - FRAME_LEN) % RECORD_LEN != 0 {
        return Err(DatabaseError::Corrupted {
            path: files.data.clone(),
            reason: "data size is not a whole number of records",
        });
    }
    Ok(())
}

fn check_bytes(path: &Path, bytes: &[u8]) -> Result<(), DatabaseError> {
    if bytes.len() < FRAME_LEN {
        return Err(DatabaseError::Corrupted {
            path: path.to_owned(),
            reason: "file is truncated",
        });
    }
    check_frame(
        path,
        &bytes[..BLOB_HEADER.len()],
        &bytes[bytes.len() - BLOB_TRAILER.len()..],
    )
}

#[inline]
fn body(bytes: &[u8]) -> &[u8] {
    &bytes[BLOB_HEADER.len()..bytes.len() - BLOB_TRAILER.len()]
}

/// Blob index over bytes resident in memory, either owned or mapped
pub(crate) struct BlobIndex<B> {
    index: B,
    data: B,
    slots: u32,
    multiplier: f32,
}

impl<B: AsRef<[u8]>> BlobIndex<B> {
    pub(crate) fn new(info: &BlobInfo, files: &BlobFiles, index: B, data: B) -> Result<Self, DatabaseError> {
        check_bytes(&files.index, index.as_ref())?;
        check_bytes(&files.data, data.as_ref())?;
        check_sizes(files, info.slots, index.as_ref().len(), data.as_ref().len())?;

        Ok(Self {
            index,
            data,
            slots: info.slots,
            multiplier: info.score_multiplier as f32,
        })
    }

    /// Fills `out` with the scores of `key`, returns `false` if not found
    pub(crate) fn lookup_into(&self, key: &[u8], out: &mut Vec<(LanguageId, f32)>) -> bool {
        let index = body(self.index.as_ref());
        let data = body(self.data.as_ref());

        let found = probe(self.slots, key, |slot| {
            let at = slot as usize * SLOT_LEN;
            let mut entry = [0; SLOT_LEN];
            entry.copy_from_slice(&index[at..at + SLOT_LEN]);
            Ok(entry)
        });
        let Ok(Some((offset, count))) = found else {
            return false;
        };

        match data.get(offset * RECORD_LEN..(offset + count) * RECORD_LEN) {
            Some(records) => {
                decode_records(records, self.multiplier, out);
                true
            }
            None => false,
        }
    }
}

/// Owned blob bytes, as read by [`read_blob_bytes`]
pub(crate) type BlobBytes = ::std::sync::Arc<[u8]>;

pub(crate) fn read_blob_bytes(path: &Path) -> Result<BlobBytes, DatabaseError> {
    fs::read(path)
        .map(BlobBytes::from)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::NotFound(path.to_owned()),
            _ => DatabaseError::io(path)(e),
        })
}

pub(crate) fn map_blob_file(path: &Path) -> Result<memmap2::Mmap, DatabaseError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DatabaseError::NotFound(path.to_owned()),
        _ => DatabaseError::io(path)(e),
    })?;
    // SAFETY: blob files are replaced by rename, never modified in place
    unsafe { memmap2::Mmap::map(&file) }.map_err(DatabaseError::io(path))
}

/// Blob index read from disk on every lookup
pub(crate) struct DiskBlob {
    index: Mutex<File>,
    data: Mutex<File>,
    slots: u32,
    multiplier: f32,
    records: usize,
}

impl DiskBlob {
    fn open_checked(path: &Path) -> Result<(File, usize), DatabaseError> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::NotFound(path.to_owned()),
            _ => DatabaseError::io(path)(e),
        })?;
        let len = file.metadata().map_err(DatabaseError::io(path))?.len() as usize;
        if len < FRAME_LEN {
            return Err(DatabaseError::Corrupted {
                path: path.to_owned(),
                reason: "file is truncated",
            });
        }

        let mut head = [0u8; BLOB_HEADER.len()];
        let mut tail = [0u8; BLOB_TRAILER.len()];
        file.read_exact(&mut head).map_err(DatabaseError::io(path))?;
        file.seek(SeekFrom::Start((len - BLOB_TRAILER.len()) as u64))
            .and_then(|_| file.read_exact(&mut tail))
            .map_err(DatabaseError::io(path))?;
        check_frame(path, &head, &tail)?;

        Ok((file, len))
    }

    pub(crate) fn open(info: &BlobInfo, files: &BlobFiles) -> Result<Self, DatabaseError> {
        let (index, index_len) = Self::open_checked(&files.index)?;
        let (data, data_len) = Self::open_checked(&files.data)?;
        check_sizes(files, info.slots, index_len, data_len)?;

        Ok(Self {
            index: Mutex::new(index),
            data: Mutex::new(data),
            slots: info.slots,
            multiplier: info.score_multiplier as f32,
            records: (data_len - FRAME_LEN) / RECORD_LEN,
        })
    }

    pub(crate) fn lookup_into(&self, key: &[u8], out: &mut Vec<(LanguageId, f32)>) -> io::Result<bool> {
        let found = {
            let mut index = self.index.lock();
            probe(self.slots, key, |slot| {
                let mut entry = [0; SLOT_LEN];
                index.seek(SeekFrom::Start(
                    (BLOB_HEADER.len() + slot as usize * SLOT_LEN) as u64,
                ))?;
                index.read_exact(&mut entry)?;
                Ok(entry)
            })?
        };
        let Some((offset, count)) = found else {
            return Ok(false);
        };
        if offset + count > self.records {
            return Ok(false);
        }

        let mut records = vec![0u8; count * RECORD_LEN];
        {
            let mut data = self.data.lock();
            data.seek(SeekFrom::Start(
                (BLOB_HEADER.len() + offset * RECORD_LEN) as u64,
            ))?;
            data.read_exact(&mut records)?;
        }
        decode_records(&records, self.multiplier, out);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn sample_table() -> NgramTable {
        let mut table = NgramTable::new("test", ["en", "es", "de"], 4, 3)
            .with_avg_scores(vec![0.5, 0.6, 0.7]);
        table.insert(b" the", [(0, 120.0)]).unwrap();
        table.insert(b" de ", [(1, 90.0), (2, 3.5), (0, 0.25)]).unwrap();
        table.insert(b"\xb1ora ", [(1, 12.0)]).unwrap();
        table.insert(b" a ", [(0, 30.0), (1, 1.0)]).unwrap();
        table
    }

    #[rstest(
        ngrams,
        slots,
        case(1, 5),
        case(9_999, 49_995),
        case(10_000, 40_000),
        case(29_999, 119_996),
        case(30_000, 90_000),
        case(100_000, 200_000)
    )]
    fn test_slot_count(ngrams: usize, slots: usize) {
        assert_eq!(slot_count(ngrams), slots);
    }

    #[test]
    fn test_score_multiplier() {
        assert_eq!(score_multiplier(20.0), DEFAULT_SCORE_MULTIPLIER);
        let multiplier = score_multiplier(1000.0);
        assert!(multiplier < DEFAULT_SCORE_MULTIPLIER);
        assert!(1000.0 * multiplier <= f64::from(u16::MAX));
    }

    fn assert_close(actual: &[(LanguageId, f32)], expected: &[(LanguageId, f32)], multiplier: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert_eq!(a.0, e.0);
            assert!((f64::from(a.1) - f64::from(e.1)).abs() <= 0.5 / multiplier + 1e-6);
        }
    }

    #[test]
    fn test_write_and_lookup_all_readers() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let info = write_blob(&table, dir.path(), "test").unwrap();
        assert_eq!(info, BlobInfo::read(&dir.path().join("test.info.encom")).unwrap());
        assert_eq!(info.slots as usize, slot_count(table.len()));

        let files = BlobFiles::new(dir.path(), "test");
        let bytes = BlobIndex::new(
            &info,
            &files,
            read_blob_bytes(&files.index).unwrap(),
            read_blob_bytes(&files.data).unwrap(),
        )
        .unwrap();
        let mapped = BlobIndex::new(
            &info,
            &files,
            map_blob_file(&files.index).unwrap(),
            map_blob_file(&files.data).unwrap(),
        )
        .unwrap();
        let disk = DiskBlob::open(&info, &files).unwrap();

        let mut out = Vec::new();
        for (key, scores) in table.ngrams.iter() {
            assert!(bytes.lookup_into(key, &mut out));
            assert_close(&out, scores, info.score_multiplier);
            assert!(mapped.lookup_into(key, &mut out));
            assert_close(&out, scores, info.score_multiplier);
            assert!(disk.lookup_into(key, &mut out).unwrap());
            assert_close(&out, scores, info.score_multiplier);
        }

        assert!(!bytes.lookup_into(b"zzzz", &mut out));
        assert!(!mapped.lookup_into(b"qqq ", &mut out));
        assert!(!disk.lookup_into(b" xyz", &mut out).unwrap());
    }

    #[test]
    fn test_out_of_range() {
        let dir = tempfile::tempdir().unwrap();

        let languages: Vec<String> = (0..300).map(|i| format!("l{i}")).collect();
        let mut table = NgramTable::new("many", languages, 4, 3)
            .with_avg_scores(vec![1.0; 300]);
        table.insert(b" a ", [(299, 1.0)]).unwrap();
        assert!(matches!(
            write_blob(&table, dir.path(), "many"),
            Err(DatabaseError::OutOfRange(_))
        ));

        let empty = NgramTable::new("empty", ["en"], 4, 3);
        assert!(matches!(
            write_blob(&empty, dir.path(), "empty"),
            Err(DatabaseError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_corrupted_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let info = write_blob(&sample_table(), dir.path(), "test").unwrap();
        let files = BlobFiles::new(dir.path(), "test");

        let mut data = fs::read(&files.data).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&files.data, &data).unwrap();

        let err = BlobIndex::new(
            &info,
            &files,
            read_blob_bytes(&files.index).unwrap(),
            read_blob_bytes(&files.data).unwrap(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DatabaseError::Corrupted { reason: "invalid trailer", .. }));
        assert!(matches!(
            DiskBlob::open(&info, &files),
            Err(DatabaseError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_truncated_index() {
        let dir = tempfile::tempdir().unwrap();
        let info = write_blob(&sample_table(), dir.path(), "test").unwrap();
        let files = BlobFiles::new(dir.path(), "test");

        let index = fs::read(&files.index).unwrap();
        let mut cut = index[..index.len() - BLOB_TRAILER.len() - SLOT_LEN].to_vec();
        cut.extend_from_slice(BLOB_TRAILER);
        fs::write(&files.index, &cut).unwrap();

        assert!(matches!(
            DiskBlob::open(&info, &files),
            Err(DatabaseError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_probe_matches_prefix_only() {
        // single slot holding " them" at offset 7 with 2 records
        let mut entry = [0u8; SLOT_LEN];
        entry[..4].copy_from_slice(b" the");
        entry[6] = 7;
        entry[7] = 2;
        let read_slot = |_: u32| -> io::Result<[u8; SLOT_LEN]> { Ok(entry) };

        assert_eq!(probe(1, b" them", read_slot).unwrap(), Some((7, 2)));
        // other keys with the same first 4 bytes resolve to the same entry
        assert_eq!(probe(1, b" ther", read_slot).unwrap(), Some((7, 2)));
        assert_eq!(probe(1, b" the ", read_slot).unwrap(), Some((7, 2)));
        assert_eq!(probe(1, b" thy ", read_slot).unwrap(), None);
    }
}
