//! Disk storage backend.
//!
//! Append-only record logs per store, replayed into memory on open, with
//! the newest record for a key winning. The tip pointer is its own file,
//! replaced via write-to-temp-then-rename so the flip is atomic: the
//! write-ahead discipline (records first, tip last) means a crash between
//! the two leaves a valid, merely older, tip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use bisonwire::{BlockHash, FilterHeader};

use crate::error::{StorageError, StorageResult};
use crate::storage::{Storage, StoredHeader, STORED_HEADER_SIZE};

const HEADERS_FILE: &str = "headers.dat";
const BY_HEIGHT_FILE: &str = "byheight.dat";
const FILTER_HEADERS_FILE: &str = "filterheaders.dat";
const TIP_FILE: &str = "tip";

const HEADER_RECORD_SIZE: usize = 32 + STORED_HEADER_SIZE;
const HEIGHT_RECORD_SIZE: usize = 4 + 32;

/// A height-keyed record with an all-zero hash is a tombstone.
const TOMBSTONE: [u8; 32] = [0u8; 32];

/// Durable storage rooted at a directory.
pub struct DiskStorage {
    dir: PathBuf,
    headers_log: File,
    by_height_log: File,
    filter_headers_log: File,
    // In-memory replay of the logs; reads never touch the disk.
    headers: HashMap<BlockHash, StoredHeader>,
    by_height: HashMap<u32, BlockHash>,
    filter_headers: HashMap<u32, FilterHeader>,
    tip: Option<BlockHash>,
}

impl DiskStorage {
    /// Opens (creating if needed) the stores under `dir` and replays the
    /// logs.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<DiskStorage> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut headers = HashMap::new();
        for chunk in read_records(&dir.join(HEADERS_FILE), HEADER_RECORD_SIZE).await? {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&chunk[..32]);
            let entry = StoredHeader::decode_record(&chunk[32..])?;
            headers.insert(BlockHash::from_byte_array(hash), entry);
        }

        let mut by_height = HashMap::new();
        for chunk in read_records(&dir.join(BY_HEIGHT_FILE), HEIGHT_RECORD_SIZE).await? {
            let height = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&chunk[4..]);
            if hash == TOMBSTONE {
                by_height.remove(&height);
            } else {
                by_height.insert(height, BlockHash::from_byte_array(hash));
            }
        }

        let mut filter_headers = HashMap::new();
        for chunk in read_records(&dir.join(FILTER_HEADERS_FILE), HEIGHT_RECORD_SIZE).await? {
            let height = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&chunk[4..]);
            if hash == TOMBSTONE {
                filter_headers.remove(&height);
            } else {
                filter_headers.insert(height, FilterHeader::from_byte_array(hash));
            }
        }

        let tip = match tokio::fs::read(dir.join(TIP_FILE)).await {
            Ok(bytes) if bytes.len() == 32 => {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Some(BlockHash::from_byte_array(hash))
            }
            Ok(_) => return Err(StorageError::Corruption("tip record is not 32 bytes".into())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        // TODO: compact the by-height log on open once tombstones dominate
        // live records.

        let headers_log = open_append(&dir.join(HEADERS_FILE)).await?;
        let by_height_log = open_append(&dir.join(BY_HEIGHT_FILE)).await?;
        let filter_headers_log = open_append(&dir.join(FILTER_HEADERS_FILE)).await?;

        tracing::debug!(
            headers = headers.len(),
            best = by_height.len(),
            filter_headers = filter_headers.len(),
            "opened disk storage"
        );

        Ok(DiskStorage {
            dir,
            headers_log,
            by_height_log,
            filter_headers_log,
            headers,
            by_height,
            filter_headers,
            tip,
        })
    }
}

async fn open_append(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path).await?)
}

/// Reads a log file as fixed-size records, dropping a torn tail.
async fn read_records(path: &Path, record_size: usize) -> StorageResult<Vec<Vec<u8>>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    let whole = bytes.len() - bytes.len() % record_size;
    if whole != bytes.len() {
        tracing::warn!(path = %path.display(), "dropping torn record at log tail");
    }
    Ok(bytes[..whole].chunks(record_size).map(|c| c.to_vec()).collect())
}

fn height_record(height: u32, hash: &[u8; 32]) -> [u8; HEIGHT_RECORD_SIZE] {
    let mut record = [0u8; HEIGHT_RECORD_SIZE];
    record[..4].copy_from_slice(&height.to_be_bytes());
    record[4..].copy_from_slice(hash);
    record
}

#[async_trait]
impl Storage for DiskStorage {
    async fn put_header(&mut self, hash: &BlockHash, entry: &StoredHeader) -> StorageResult<()> {
        let mut record = Vec::with_capacity(HEADER_RECORD_SIZE);
        record.extend_from_slice(hash.as_byte_array());
        record.extend_from_slice(&entry.encode_record());
        self.headers_log.write_all(&record).await?;
        self.headers.insert(*hash, *entry);
        Ok(())
    }

    async fn header(&self, hash: &BlockHash) -> StorageResult<Option<StoredHeader>> {
        Ok(self.headers.get(hash).copied())
    }

    async fn set_hash_at_height(&mut self, height: u32, hash: &BlockHash) -> StorageResult<()> {
        self.by_height_log
            .write_all(&height_record(height, hash.as_byte_array()))
            .await?;
        self.by_height.insert(height, *hash);
        Ok(())
    }

    async fn hash_at_height(&self, height: u32) -> StorageResult<Option<BlockHash>> {
        Ok(self.by_height.get(&height).copied())
    }

    async fn truncate_above(&mut self, height: u32) -> StorageResult<()> {
        let doomed: Vec<u32> =
            self.by_height.keys().copied().filter(|h| *h > height).collect();
        for h in doomed {
            self.by_height_log.write_all(&height_record(h, &TOMBSTONE)).await?;
            self.by_height.remove(&h);
        }
        Ok(())
    }

    async fn set_tip(&mut self, hash: &BlockHash) -> StorageResult<()> {
        // Records for the new branch are already on disk; this flip is
        // the commit point.
        self.headers_log.sync_data().await?;
        self.by_height_log.sync_data().await?;
        let tmp = self.dir.join("tip.tmp");
        tokio::fs::write(&tmp, hash.as_byte_array()).await?;
        tokio::fs::rename(&tmp, self.dir.join(TIP_FILE)).await?;
        self.tip = Some(*hash);
        Ok(())
    }

    async fn tip(&self) -> StorageResult<Option<BlockHash>> {
        Ok(self.tip)
    }

    async fn put_filter_header(&mut self, height: u32, fh: &FilterHeader) -> StorageResult<()> {
        self.filter_headers_log
            .write_all(&height_record(height, fh.as_byte_array()))
            .await?;
        self.filter_headers.insert(height, *fh);
        Ok(())
    }

    async fn filter_header(&self, height: u32) -> StorageResult<Option<FilterHeader>> {
        Ok(self.filter_headers.get(&height).copied())
    }

    async fn filter_header_tip(&self) -> StorageResult<Option<u32>> {
        Ok(self.filter_headers.keys().copied().max())
    }

    async fn truncate_filter_headers_above(&mut self, height: u32) -> StorageResult<()> {
        let doomed: Vec<u32> =
            self.filter_headers.keys().copied().filter(|h| *h > height).collect();
        for h in doomed {
            self.filter_headers_log.write_all(&height_record(h, &TOMBSTONE)).await?;
            self.filter_headers.remove(&h);
        }
        Ok(())
    }

    async fn flush(&mut self) -> StorageResult<()> {
        self.headers_log.sync_data().await?;
        self.by_height_log.sync_data().await?;
        self.filter_headers_log.sync_data().await?;
        Ok(())
    }
}
