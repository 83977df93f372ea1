use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

pub mod log;
pub mod tree;

pub use log::LogStore;
pub use tree::TreeStore;

/// Default key namespace, used when no bucket was selected.
pub const DEFAULT_BUCKET: &str = "radic";

/// Which embedded store implementation backs a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvKind {
    /// In-memory ordered image, journal + snapshot file.
    Tree,
    /// Append-only log file with an in-memory key directory.
    Log,
}

/// Uniform interface over an ordered embedded key-value store.
///
/// `set`/`delete` are durable on return. Batch variants are atomic per
/// batch unless an error splits them, in which case the completed part
/// stays committed. Iteration is ascending by key and visits each entry
/// at most once. `get` on a missing key is not an error and returns
/// empty bytes. Higher layers must not assume a particular backend.
pub trait KvStore: Send + Sync {
    fn path(&self) -> &Path;

    /// Switch the key namespace. Keys written under different buckets
    /// never collide.
    fn set_bucket(&self, bucket: &str) -> Result<()>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn batch_set(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()>;
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;
    fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Vec<u8>>>;
    fn delete(&self, key: &[u8]) -> Result<()>;
    fn batch_delete(&self, keys: &[Vec<u8>]) -> Result<()>;
    fn has(&self, key: &[u8]) -> Result<bool>;

    /// Visit every `(key, value)` in the current bucket; returns how many
    /// entries the visitor accepted. A visitor error skips the entry.
    fn iter_all(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<u64>;
    fn iter_keys(&self, f: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<u64>;

    /// Flush buffered state and release the file.
    fn close(&self) -> Result<()>;
}

/// Open a store of the given kind, creating parent directories.
pub fn open(kind: KvKind, path: &Path) -> Result<Box<dyn KvStore>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    match kind {
        KvKind::Tree => Ok(Box::new(TreeStore::open(path)?)),
        KvKind::Log => Ok(Box::new(LogStore::open(path)?)),
    }
}

const BUCKET_SEP: u8 = 0x1f;

/// Namespace a user key under a bucket.
pub(crate) fn bucket_key(bucket: &str, key: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(bucket.len() + 1 + key.len());
    full.extend_from_slice(bucket.as_bytes());
    full.push(BUCKET_SEP);
    full.extend_from_slice(key);
    full
}

pub(crate) fn bucket_prefix(bucket: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(bucket.len() + 1);
    prefix.extend_from_slice(bucket.as_bytes());
    prefix.push(BUCKET_SEP);
    prefix
}

// On-disk record framing, shared by the log store and the tree journal:
// crc32(u32) | key_len(u32) | value_len(u32, MAX = tombstone) | key | value,
// all little-endian, crc covering everything after itself.

const TOMBSTONE: u32 = u32::MAX;
const RECORD_HEADER: usize = 12;

pub(crate) fn write_record(
    w: &mut impl Write,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<u64> {
    let vlen = match value {
        Some(v) => v.len() as u32,
        None => TOMBSTONE,
    };
    let mut body = Vec::with_capacity(8 + key.len());
    body.extend_from_slice(&(key.len() as u32).to_le_bytes());
    body.extend_from_slice(&vlen.to_le_bytes());
    body.extend_from_slice(key);
    if let Some(v) = value {
        body.extend_from_slice(v);
    }
    w.write_all(&crc32fast::hash(&body).to_le_bytes())?;
    w.write_all(&body)?;
    Ok((4 + body.len()) as u64)
}

pub(crate) struct Record {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    /// Total encoded length, header included.
    pub len: u64,
}

/// Read one record. `Ok(None)` at a clean end of file; a torn or corrupt
/// tail surfaces as `Error::Kv` so callers can stop replay there.
pub(crate) fn read_record(r: &mut impl Read) -> Result<Option<Record>> {
    let mut header = [0u8; RECORD_HEADER];
    match r.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let klen = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let vlen_raw = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let vlen = if vlen_raw == TOMBSTONE { 0 } else { vlen_raw as usize };

    let mut body = vec![0u8; klen + vlen];
    r.read_exact(&mut body)
        .map_err(|_| Error::Kv("torn record at end of log".to_string()))?;

    let mut checked = Vec::with_capacity(8 + body.len());
    checked.extend_from_slice(&header[4..12]);
    checked.extend_from_slice(&body);
    if crc32fast::hash(&checked) != crc {
        return Err(Error::Kv("record checksum mismatch".to_string()));
    }

    let value = if vlen_raw == TOMBSTONE {
        None
    } else {
        Some(body.split_off(klen))
    };
    body.truncate(klen);
    Ok(Some(Record {
        key: body,
        value,
        len: (RECORD_HEADER + klen + vlen) as u64,
    }))
}

/// A store's path names a single file; helper files (compaction target,
/// journal, snapshot) hang off it by suffix.
pub(crate) fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(ext);
    PathBuf::from(name)
}
