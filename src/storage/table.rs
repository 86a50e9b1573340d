use crate::common::{FaceWardError, Result};
use crate::storage::identity_store::EmbeddingRow;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const STORAGE_VERSION: u32 = 1;
const MAX_RECORD_LEN: usize = 1024 * 1024;

/// Persistent, append-only name/embedding table.
pub trait EmbeddingTable: Send + Sync {
    fn rows(&self) -> Result<Vec<EmbeddingRow>>;
    fn insert(&self, row: &EmbeddingRow) -> Result<()>;
}

/// Append-only file of `[u32 LE length][bincode record]` entries.
///
/// The first record is a header carrying the storage version. A truncated
/// trailing record (interrupted write) is ignored when reading.
pub struct LogTable {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogTable {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if !path.exists() {
            let mut file = File::create(&path)?;
            write_record(&mut file, &STORAGE_VERSION)?;
            file.sync_all()?;
            tracing::info!("Created embedding table at {:?}", path);
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_record<T: serde::Serialize>(file: &mut File, value: &T) -> Result<()> {
    let encoded = bincode::serialize(value)
        .map_err(|e| FaceWardError::Storage(format!("Failed to serialize: {}", e)))?;
    let len = (encoded.len() as u32).to_le_bytes();

    let mut buf = Vec::with_capacity(4 + encoded.len());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(&encoded);
    file.write_all(&buf)?;
    Ok(())
}

/// Splits the file into record payloads, stopping at a torn tail.
///
/// Also returns the length of the intact prefix; anything past it is torn.
fn split_records(data: &[u8]) -> (Vec<&[u8]>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if data.len() - offset < 4 {
            break;
        }
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&data[offset..offset + 4]);
        let len = u32::from_le_bytes(len_buf) as usize;
        let start = offset + 4;

        if len > MAX_RECORD_LEN || data.len() - start < len {
            break;
        }
        records.push(&data[start..start + len]);
        offset = start + len;
    }

    (records, offset)
}

impl EmbeddingTable for LogTable {
    fn rows(&self) -> Result<Vec<EmbeddingRow>> {
        let data = fs::read(&self.path)?;
        let (records, intact) = split_records(&data);
        if intact < data.len() {
            tracing::warn!("Ignoring truncated trailing record in {:?}", self.path);
        }

        let mut iter = records.into_iter();
        let version: u32 = match iter.next() {
            Some(header) => bincode::deserialize(header)
                .map_err(|e| FaceWardError::Storage(format!("Failed to read header: {}", e)))?,
            None => return Ok(Vec::new()),
        };
        if version > STORAGE_VERSION {
            return Err(FaceWardError::Storage(format!(
                "Embedding table version {} is newer than supported version {}", version, STORAGE_VERSION
            )));
        }

        iter.map(|record| {
            bincode::deserialize(record)
                .map_err(|e| FaceWardError::Storage(format!("Failed to deserialize: {}", e)))
        })
        .collect()
    }

    fn insert(&self, row: &EmbeddingRow) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // A record appended after a torn tail would be unreadable.
        let data = fs::read(&self.path)?;
        let (_, intact) = split_records(&data);
        if intact < data.len() {
            tracing::warn!(
                "Truncating {} torn trailing bytes in {:?}",
                data.len() - intact,
                self.path
            );
            let mut file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(intact as u64)?;
            if intact == 0 {
                write_record(&mut file, &STORAGE_VERSION)?;
            }
            file.sync_all()?;
        }

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        write_record(&mut file, row)?;
        file.sync_data()?;
        Ok(())
    }
}

/// In-memory table for tests and dry runs.
#[derive(Default)]
pub struct MemoryTable {
    rows: Mutex<Vec<EmbeddingRow>>,
    fail_inserts: std::sync::atomic::AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent insert fail, to exercise storage error paths.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

impl EmbeddingTable for MemoryTable {
    fn rows(&self) -> Result<Vec<EmbeddingRow>> {
        let rows = self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(rows.clone())
    }

    fn insert(&self, row: &EmbeddingRow) -> Result<()> {
        if self.fail_inserts.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FaceWardError::Storage("insert rejected".into()));
        }
        let mut rows = self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.push(row.clone());
        Ok(())
    }
}
