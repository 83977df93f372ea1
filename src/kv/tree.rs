use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::core::error::{Error, Result};
use crate::kv::{
    bucket_key, bucket_prefix, read_record, sibling, write_record, KvStore, DEFAULT_BUCKET,
};

/// Tree store: the full ordered image lives in memory, every mutation is
/// journaled for durability, and `close` collapses journal + image into a
/// snapshot file. Reads never touch the disk.
pub struct TreeStore {
    path: PathBuf,
    journal_path: PathBuf,
    bucket: RwLock<String>,
    inner: Mutex<TreeInner>,
}

struct TreeInner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    journal: BufWriter<File>,
    closed: bool,
}

impl TreeStore {
    pub fn open(path: &Path) -> Result<Self> {
        let journal_path = sibling(path, ".journal");

        let mut map: BTreeMap<Vec<u8>, Vec<u8>> = if path.exists() {
            let snapshot = BufReader::new(File::open(path)?);
            bincode::deserialize_from(snapshot)
                .map_err(|e| Error::Kv(format!("snapshot unreadable: {e}")))?
        } else {
            BTreeMap::new()
        };

        let mut replayed = 0u64;
        if journal_path.exists() {
            let mut reader = BufReader::new(File::open(&journal_path)?);
            loop {
                match read_record(&mut reader) {
                    Ok(Some(record)) => {
                        replayed += record.len;
                        match record.value {
                            Some(v) => {
                                map.insert(record.key, v);
                            }
                            None => {
                                map.remove(&record.key);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %journal_path.display(), error = %e,
                              "journal replay stopped at corrupt tail");
                        break;
                    }
                }
            }
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;
        if journal.metadata()?.len() > replayed {
            // New appends must follow the last good record, not the junk.
            journal.set_len(replayed)?;
        }

        Ok(TreeStore {
            path: path.to_path_buf(),
            journal_path,
            bucket: RwLock::new(DEFAULT_BUCKET.to_string()),
            inner: Mutex::new(TreeInner {
                map,
                journal: BufWriter::new(journal),
                closed: false,
            }),
        })
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        bucket_key(&self.bucket.read(), key)
    }

    /// Write the image atomically and start a fresh journal.
    fn checkpoint(&self, inner: &mut TreeInner) -> Result<()> {
        let tmp_path = sibling(&self.path, ".snap");
        let tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(tmp);
        bincode::serialize_into(&mut writer, &inner.map)
            .map_err(|e| Error::Kv(format!("snapshot write failed: {e}")))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        let journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.journal_path)?;
        inner.journal = BufWriter::new(journal);
        Ok(())
    }
}

impl KvStore for TreeStore {
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
        write_record(&mut inner.journal, &full, Some(value))?;
        inner.journal.flush()?;
        inner.map.insert(full, value.to_vec());
        Ok(())
    }

    fn batch_set(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(Error::Kv("keys and values differ in length".to_string()));
        }
        let mut inner = self.inner.lock();
        for (key, value) in keys.iter().zip(values) {
            let full = self.full_key(key);
            write_record(&mut inner.journal, &full, Some(value))?;
            inner.map.insert(full, value.to_vec());
        }
        inner.journal.flush()?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let full = self.full_key(key);
        Ok(self.inner.lock().map.get(&full).cloned().unwrap_or_default())
    }

    fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .map(|key| {
                let full = self.full_key(key);
                inner.map.get(&full).cloned().unwrap_or_default()
            })
            .collect())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let full = self.full_key(key);
        let mut inner = self.inner.lock();
        if inner.map.remove(&full).is_some() {
            write_record(&mut inner.journal, &full, None)?;
            inner.journal.flush()?;
        }
        Ok(())
    }

    fn batch_delete(&self, keys: &[Vec<u8>]) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut touched = false;
        for key in keys {
            let full = self.full_key(key);
            if inner.map.remove(&full).is_some() {
                write_record(&mut inner.journal, &full, None)?;
                touched = true;
            }
        }
        if touched {
            inner.journal.flush()?;
        }
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        let full = self.full_key(key);
        Ok(self.inner.lock().map.contains_key(&full))
    }

    fn iter_all(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<u64> {
        let prefix = bucket_prefix(&self.bucket.read());
        let inner = self.inner.lock();
        let mut visited = 0u64;
        for (full, value) in inner
            .map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
        {
            if f(&full[prefix.len()..], value).is_ok() {
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
            .map
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
        inner.journal.flush()?;
        self.checkpoint(&mut inner)?;
        inner.closed = true;
        Ok(())
    }
}
