//! The header chain: dual-indexed storage, consensus validation, and
//! reorganization.
//!
//! Entries are indexed by hash (all branches) and by height (best chain
//! only). Writes flow through one owner, the sync manager; readers take
//! snapshots through the surrounding lock.

use std::collections::HashMap;

use bisonwire::{BlockHash, BlockHeader, ChainParams, Target};

use crate::error::{HeaderError, SpvError, ValidationError};
use crate::storage::{Storage, StoredHeader};

/// What connecting one header did to the chain.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Appended to the best chain.
    Extended(StoredHeader),
    /// Stored on a side branch with less cumulative work than the tip.
    SideBranch(StoredHeader),
    /// The header's branch overtook the best chain.
    Reorganized {
        old_tip: BlockHash,
        new_tip: BlockHash,
        /// Old-branch entries, tip first, down to just above the fork.
        disconnected: Vec<StoredHeader>,
        /// New-branch entries, just above the fork first, up to the tip.
        connected: Vec<StoredHeader>,
    },
    /// Seen before; nothing changed.
    AlreadyKnown(BlockHash),
}

/// In-memory view of the header chain, mirrored to a [`Storage`].
pub struct HeaderStore {
    params: &'static ChainParams,
    by_hash: HashMap<BlockHash, StoredHeader>,
    /// `best[height]` is the best-chain hash at that height.
    best: Vec<BlockHash>,
}

impl HeaderStore {
    /// A fresh store holding only genesis.
    pub fn new(params: &'static ChainParams) -> HeaderStore {
        let genesis = StoredHeader {
            header: params.genesis,
            height: 0,
            work: Target::from_compact(params.genesis.bits).to_work(),
        };
        let hash = params.genesis_hash;
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, genesis);
        HeaderStore {
            params,
            by_hash,
            best: vec![hash],
        }
    }

    /// Loads the best chain from storage, or initializes storage with
    /// genesis when empty.
    pub async fn load<S: Storage>(
        params: &'static ChainParams,
        storage: &mut S,
    ) -> Result<HeaderStore, SpvError> {
        let mut store = HeaderStore::new(params);
        let Some(tip_hash) = storage.tip().await? else {
            let genesis = store.tip();
            storage.put_header(&params.genesis_hash, &genesis).await?;
            storage.set_hash_at_height(0, &params.genesis_hash).await?;
            storage.set_tip(&params.genesis_hash).await?;
            return Ok(store);
        };

        let mut height = 1u32;
        while let Some(hash) = storage.hash_at_height(height).await? {
            let entry = storage.header(&hash).await?.ok_or_else(|| {
                crate::error::StorageError::Corruption(format!(
                    "height index points at missing header {hash}"
                ))
            })?;
            store.by_hash.insert(hash, entry);
            store.best.push(hash);
            height += 1;
        }

        let tip = store.tip();
        if tip.block_hash() != tip_hash {
            return Err(crate::error::StorageError::Corruption(format!(
                "tip record {tip_hash} does not match height index tip {}",
                tip.block_hash()
            ))
            .into());
        }
        tracing::info!(height = tip.height, tip = %tip_hash, "loaded header chain");
        Ok(store)
    }

    /// The best-chain tip entry.
    pub fn tip(&self) -> StoredHeader {
        let hash = self.best.last().expect("chain always holds genesis");
        self.by_hash[hash]
    }

    /// Height of the best-chain tip.
    pub fn height(&self) -> u32 {
        (self.best.len() - 1) as u32
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<StoredHeader> {
        self.by_hash.get(hash).copied()
    }

    /// Best-chain entry at a height; side branches are not reachable this
    /// way.
    pub fn get_by_height(&self, height: u32) -> Option<StoredHeader> {
        let hash = self.best.get(height as usize)?;
        self.by_hash.get(hash).copied()
    }

    pub fn hash_at_height(&self, height: u32) -> Option<BlockHash> {
        self.best.get(height as usize).copied()
    }

    fn is_best(&self, entry: &StoredHeader) -> bool {
        self.best.get(entry.height as usize) == Some(&entry.block_hash())
    }

    /// The block locator for `getheaders`: tip, then exponentially
    /// thinning offsets, genesis always last.
    pub fn locator(&self) -> Vec<BlockHash> {
        let tip_height = self.height() as i64;
        let mut locator = Vec::with_capacity(34);
        locator.push(self.best[tip_height as usize]);
        let mut offset: i64 = 1;
        while tip_height - offset > 0 {
            locator.push(self.best[(tip_height - offset) as usize]);
            offset *= 2;
        }
        if tip_height > 0 {
            locator.push(self.best[0]);
        }
        locator
    }

    /// Validates a header against its parent and either extends the best
    /// chain, records a side branch, or reorganizes.
    pub async fn connect<S: Storage>(
        &mut self,
        header: BlockHeader,
        storage: &mut S,
    ) -> Result<ConnectOutcome, SpvError> {
        let hash = header.block_hash();
        if self.by_hash.contains_key(&hash) {
            return Ok(ConnectOutcome::AlreadyKnown(hash));
        }

        let prev = self
            .by_hash
            .get(&header.prev_blockhash)
            .copied()
            .ok_or(ValidationError::Header(HeaderError::PrevMissing))?;

        self.validate(&header, &hash, &prev)?;

        let entry = StoredHeader {
            header,
            height: prev.height + 1,
            work: prev.work + header.target().to_work(),
        };
        self.by_hash.insert(hash, entry);
        storage.put_header(&hash, &entry).await?;

        let tip = self.tip();
        if header.prev_blockhash == tip.block_hash() {
            self.best.push(hash);
            storage.set_hash_at_height(entry.height, &hash).await?;
            storage.set_tip(&hash).await?;
            return Ok(ConnectOutcome::Extended(entry));
        }

        if entry.work > tip.work {
            return self.reorganize(entry, storage).await;
        }

        Ok(ConnectOutcome::SideBranch(entry))
    }

    fn validate(
        &self,
        header: &BlockHeader,
        hash: &BlockHash,
        prev: &StoredHeader,
    ) -> Result<(), ValidationError> {
        let height = prev.height + 1;

        if header.time <= self.median_time_past(prev) {
            return Err(ValidationError::Header(HeaderError::BadTimestamp));
        }

        let expected = self.expected_bits(prev, header.time);
        if header.bits != expected {
            return Err(ValidationError::Header(HeaderError::BadDifficulty));
        }

        if header.target().0 > self.params.pow_limit.0 || !self.params.header_pow_valid(header) {
            return Err(ValidationError::Header(HeaderError::PowFail));
        }

        if let Some(pinned) = self.params.checkpoint_at(height) {
            if pinned != hash {
                return Err(ValidationError::Header(HeaderError::CheckpointMismatch));
            }
        }
        Ok(())
    }

    /// Median of the timestamps of the last 11 blocks ending at `from`,
    /// walked along `from`'s own branch.
    fn median_time_past(&self, from: &StoredHeader) -> u32 {
        let mut times = Vec::with_capacity(11);
        let mut cursor = *from;
        for _ in 0..11 {
            times.push(cursor.header.time);
            match self.by_hash.get(&cursor.header.prev_blockhash) {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// The difficulty bits required for a block following `prev` at time
    /// `new_time`.
    fn expected_bits(&self, prev: &StoredHeader, new_time: u32) -> u32 {
        let params = self.params;
        if params.pow_no_retargeting {
            return prev.header.bits;
        }
        let interval = params.retarget_interval();
        let height = prev.height + 1;

        if height % interval != 0 {
            if params.reduce_min_difficulty {
                // Testnet rule: a block arriving long after its parent may
                // drop to minimum difficulty.
                let allow_min_at =
                    u64::from(prev.header.time) + params.min_diff_reduction_time_secs;
                if u64::from(new_time) > allow_min_at {
                    return params.pow_limit_bits;
                }
                return self.last_real_difficulty(prev);
            }
            return prev.header.bits;
        }

        // Retarget boundary: rescale by the actual timespan of the last
        // interval, clamped to one factor in either direction.
        let first = self.ancestor(prev, interval - 1);
        let actual = u64::from(prev.header.time.saturating_sub(first.header.time)).max(1);
        let timespan = params.target_timespan_secs;
        let factor = params.retarget_adjustment_factor;
        let adjusted = actual.clamp(timespan / factor, timespan * factor);

        Target::from_compact(prev.header.bits)
            .scale_clamped(adjusted, timespan, params.pow_limit)
            .to_compact()
    }

    /// Walks back past min-difficulty blocks to the last actual target on
    /// a reduce-min-difficulty network.
    fn last_real_difficulty(&self, from: &StoredHeader) -> u32 {
        let interval = self.params.retarget_interval();
        let mut cursor = *from;
        while cursor.height % interval != 0 && cursor.header.bits == self.params.pow_limit_bits {
            match self.by_hash.get(&cursor.header.prev_blockhash) {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }
        cursor.header.bits
    }

    /// The entry `n` blocks behind `from` on its branch (clamped at
    /// genesis).
    fn ancestor(&self, from: &StoredHeader, n: u32) -> StoredHeader {
        let mut cursor = *from;
        for _ in 0..n {
            match self.by_hash.get(&cursor.header.prev_blockhash) {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }
        cursor
    }

    /// Switches the best chain to the branch ending at `new_tip`.
    ///
    /// Persistence is write-ahead: the new branch's height index entries
    /// land first, stale entries above the new tip are dropped, and the
    /// tip pointer flips last.
    async fn reorganize<S: Storage>(
        &mut self,
        new_tip: StoredHeader,
        storage: &mut S,
    ) -> Result<ConnectOutcome, SpvError> {
        let old_tip = self.tip();

        // Collect the new branch back to the fork point.
        let mut connected = vec![new_tip];
        let mut cursor = new_tip;
        loop {
            let parent = self
                .by_hash
                .get(&cursor.header.prev_blockhash)
                .copied()
                .ok_or(ValidationError::Header(HeaderError::PrevMissing))?;
            if self.is_best(&parent) {
                break;
            }
            connected.push(parent);
            cursor = parent;
        }
        connected.reverse();
        let fork_height = connected[0].height - 1;

        // Old-branch entries above the fork, tip first.
        let mut disconnected = Vec::with_capacity((old_tip.height - fork_height) as usize);
        for height in ((fork_height + 1)..=old_tip.height).rev() {
            disconnected.push(self.by_hash[&self.best[height as usize]]);
        }

        // Apply in memory.
        self.best.truncate(fork_height as usize + 1);
        for entry in &connected {
            self.best.push(entry.block_hash());
        }

        // Persist, tip flip last.
        for entry in &connected {
            storage.set_hash_at_height(entry.height, &entry.block_hash()).await?;
        }
        if old_tip.height > new_tip.height {
            storage.truncate_above(new_tip.height).await?;
        }
        storage.set_tip(&new_tip.block_hash()).await?;

        tracing::info!(
            old_tip = %old_tip.block_hash(),
            new_tip = %new_tip.block_hash(),
            fork_height,
            disconnected = disconnected.len(),
            connected = connected.len(),
            "chain reorganized"
        );

        Ok(ConnectOutcome::Reorganized {
            old_tip: old_tip.block_hash(),
            new_tip: new_tip.block_hash(),
            disconnected,
            connected,
        })
    }
}
