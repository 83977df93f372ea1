use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::core::error::{Error, Result};
use crate::kv::{
    bucket_key, bucket_prefix, read_record, sibling, write_record, KvStore, DEFAULT_BUCKET,
};

/// Dead bytes tolerated before the log is rewritten.
const COMPACTION_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Log-structured store: one append-only file, an in-memory ordered key
/// directory pointing at the latest record per key. Values stay on disk
/// and are read back on demand; overwritten and deleted records become
/// garbage until compaction rewrites the live set.
pub struct LogStore {
    path: PathBuf,
    bucket: RwLock<String>,
    inner: Mutex<LogInner>,
}

struct LogInner {
    writer: BufWriter<File>,
    reader: File,
    /// key -> (record offset, record length) of the latest live record.
    keydir: BTreeMap<Vec<u8>, (u64, u64)>,
    tail: u64,
    garbage: u64,
    closed: bool,
}

impl LogStore {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let reader = File::open(path)?;

        let (keydir, tail, garbage) = load_keydir(&file, path)?;
        if file.metadata()?.len() > tail {
            // Replay stopped early; drop the torn tail so appends line up
            // with the key directory again.
            file.set_len(tail)?;
        }
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(tail))?;

        Ok(LogStore {
            path: path.to_path_buf(),
            bucket: RwLock::new(DEFAULT_BUCKET.to_string()),
            inner: Mutex::new(LogInner {
                writer,
                reader,
                keydir,
                tail,
                garbage,
                closed: false,
            }),
        })
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        bucket_key(&self.bucket.read(), key)
    }

    fn append(inner: &mut LogInner, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let len = write_record(&mut inner.writer, key, value)?;
        let offset = inner.tail;
        inner.tail += len;
        let old = match value {
            Some(_) => inner.keydir.insert(key.to_vec(), (offset, len)),
            None => inner.keydir.remove(key),
        };
        if let Some((_, old_len)) = old {
            inner.garbage += old_len;
        }
        if value.is_none() {
            // The tombstone itself is garbage once applied.
            inner.garbage += len;
        }
        Ok(())
    }

    fn read_value(inner: &mut LogInner, offset: u64, len: u64) -> Result<Vec<u8>> {
        inner.reader.seek(SeekFrom::Start(offset))?;
        let mut take = (&inner.reader).take(len);
        let record = read_record(&mut take)?
            .ok_or_else(|| Error::Kv("dangling key directory entry".to_string()))?;
        record
            .value
            .ok_or_else(|| Error::Kv("key directory points at tombstone".to_string()))
    }

    /// Rewrite live records into a fresh file and swap it in.
    fn compact(&self, inner: &mut LogInner) -> Result<()> {
        let tmp_path = sibling(&self.path, ".compact");
        let tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp);

        let mut keydir = BTreeMap::new();
        let mut tail = 0u64;
        let entries: Vec<(Vec<u8>, (u64, u64))> = inner
            .keydir
            .iter()
            .map(|(k, loc)| (k.clone(), *loc))
            .collect();
        for (key, (offset, len)) in entries {
            let value = Self::read_value(inner, offset, len)?;
            let written = write_record(&mut writer, &key, Some(&value))?;
            keydir.insert(key, (tail, written));
            tail += written;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        inner.reader = File::open(&self.path)?;
        inner.writer = BufWriter::new(file);
        inner.writer.seek(SeekFrom::Start(tail))?;
        inner.keydir = keydir;
        inner.garbage = 0;
        inner.tail = tail;
        debug!(path = %self.path.display(), live = tail, "compacted log store");
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut LogInner) -> Result<()> {
        if inner.garbage > COMPACTION_THRESHOLD {
            self.compact(inner)?;
        }
        Ok(())
    }
}

/// Replay the log, keeping the latest record per key. A corrupt tail ends
/// the replay; everything before it stays usable.
fn load_keydir(
    file: &File,
    path: &Path,
) -> Result<(BTreeMap<Vec<u8>, (u64, u64)>, u64, u64)> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;
    let mut keydir = BTreeMap::new();
    let mut offset = 0u64;
    let mut garbage = 0u64;
    loop {
        match read_record(&mut reader) {
            Ok(Some(record)) => {
                let old = match record.value {
                    Some(_) => keydir.insert(record.key, (offset, record.len)),
                    None => keydir.remove(&record.key),
                };
                if let Some((_, old_len)) = old {
                    garbage += old_len;
                }
                if record.value.is_none() {
                    garbage += record.len;
                }
                offset += record.len;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(path = %path.display(), offset, error = %e, "log replay stopped at corrupt tail");
                break;
            }
        }
    }
    Ok((keydir, offset, garbage))
}

impl KvStore for LogStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_bucket(&self, bucket: &str) -> Result<()> {
        *self.bucket.write() = bucket.to_string();
        Ok(())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let full = self.full_key(key);
        let mut inner = self.inner.lock();
        Self::append(&mut inner, &full, Some(value))?;
        inner.writer.flush()?;
        self.maybe_compact(&mut inner)
    }

    fn batch_set(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(Error::Kv("keys and values differ in length".to_string()));
        }
        let mut inner = self.inner.lock();
        for (key, value) in keys.iter().zip(values) {
            let full = self.full_key(key);
            Self::append(&mut inner, &full, Some(value))?;
        }
        inner.writer.flush()?;
        self.maybe_compact(&mut inner)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let full = self.full_key(key);
        let mut inner = self.inner.lock();
        match inner.keydir.get(&full).copied() {
            Some((offset, len)) => Self::read_value(&mut inner, offset, len),
            None => Ok(Vec::new()),
        }
    }

    fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let full = self.full_key(key);
            match inner.keydir.get(&full).copied() {
                Some((offset, len)) => out.push(Self::read_value(&mut inner, offset, len)?),
                None => out.push(Vec::new()),
            }
        }
        Ok(out)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let full = self.full_key(key);
        let mut inner = self.inner.lock();
        if inner.keydir.contains_key(&full) {
            Self::append(&mut inner, &full, None)?;
            inner.writer.flush()?;
        }
        self.maybe_compact(&mut inner)
    }

    fn batch_delete(&self, keys: &[Vec<u8>]) -> Result<()> {
        let mut inner = self.inner.lock();
        for key in keys {
            let full = self.full_key(key);
            if inner.keydir.contains_key(&full) {
                Self::append(&mut inner, &full, None)?;
            }
        }
        inner.writer.flush()?;
        self.maybe_compact(&mut inner)
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        let full = self.full_key(key);
        Ok(self.inner.lock().keydir.contains_key(&full))
    }

    fn iter_all(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<u64> {
        let prefix = bucket_prefix(&self.bucket.read());
        let mut inner = self.inner.lock();
        let entries: Vec<(Vec<u8>, (u64, u64))> = inner
            .keydir
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, loc)| (k.clone(), *loc))
            .collect();
        let mut visited = 0u64;
        for (full, (offset, len)) in entries {
            let value = Self::read_value(&mut inner, offset, len)?;
            if f(&full[prefix.len()..], &value).is_ok() {
                visited += 1;
            }
        }
        Ok(visited)
    }

    fn iter_keys(&self, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<u64> {
        let prefix = bucket_prefix(&self.bucket.read());
        let inner = self.inner.lock();
        let mut visited = 0u64;
        for (full, _) in inner
            .keydir
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
        {
            if f(&full[prefix.len()..]).is_ok() {
                visited += 1;
            }
        }
        Ok(visited)
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        inner.closed = true;
        Ok(())
    }
}
