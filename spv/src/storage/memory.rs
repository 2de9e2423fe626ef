//! In-memory storage backend, for tests and throwaway sessions.

use std::collections::HashMap;

use async_trait::async_trait;

use bisonwire::{BlockHash, FilterHeader};

use crate::error::StorageResult;
use crate::storage::{Storage, StoredHeader};

/// Volatile storage. Same semantics as the disk backend, no durability.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    headers: HashMap<BlockHash, StoredHeader>,
    by_height: HashMap<u32, BlockHash>,
    tip: Option<BlockHash>,
    filter_headers: HashMap<u32, FilterHeader>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_header(&mut self, hash: &BlockHash, entry: &StoredHeader) -> StorageResult<()> {
        self.headers.insert(*hash, *entry);
        Ok(())
    }

    async fn header(&self, hash: &BlockHash) -> StorageResult<Option<StoredHeader>> {
        Ok(self.headers.get(hash).copied())
    }

    async fn set_hash_at_height(&mut self, height: u32, hash: &BlockHash) -> StorageResult<()> {
        self.by_height.insert(height, *hash);
        Ok(())
    }

    async fn hash_at_height(&self, height: u32) -> StorageResult<Option<BlockHash>> {
        Ok(self.by_height.get(&height).copied())
    }

    async fn truncate_above(&mut self, height: u32) -> StorageResult<()> {
        self.by_height.retain(|h, _| *h <= height);
        Ok(())
    }

    async fn set_tip(&mut self, hash: &BlockHash) -> StorageResult<()> {
        self.tip = Some(*hash);
        Ok(())
    }

    async fn tip(&self) -> StorageResult<Option<BlockHash>> {
        Ok(self.tip)
    }

    async fn put_filter_header(&mut self, height: u32, fh: &FilterHeader) -> StorageResult<()> {
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
        self.filter_headers.retain(|h, _| *h <= height);
        Ok(())
    }

    async fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
