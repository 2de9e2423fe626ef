//! Known-peer address book with JSON persistence.
//!
//! Tracks where peers were last seen and how dialing them has gone, and
//! ranks candidates for the connection manager. One file per
//! (chain, network), next to the rest of the client's data.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use bisonwire::ChainParams;

use crate::error::{SpvError, StorageError};
use crate::network::constants::MAX_ADDRESS_BOOK_SIZE;

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

/// One known peer address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownAddress {
    pub services: u64,
    /// Unix seconds the address was last advertised or connected.
    pub last_seen: u64,
    /// Unix seconds of our last dial attempt, zero if never.
    pub last_attempt: u64,
    /// Unix seconds of the last completed handshake, zero if never.
    pub last_success: u64,
    /// Consecutive failed attempts since the last success.
    pub failed_attempts: u32,
}

#[derive(Serialize, Deserialize)]
struct SavedAddressBook {
    version: u32,
    network: String,
    addresses: Vec<(String, KnownAddress)>,
}

/// The shared address book.
pub struct AddressBook {
    entries: Mutex<HashMap<SocketAddr, KnownAddress>>,
    path: Option<PathBuf>,
    network_name: String,
}

impl AddressBook {
    /// Creates a book persisted under `data_dir`, or memory-only when
    /// `data_dir` is `None`.
    pub fn new(params: &'static ChainParams, data_dir: Option<PathBuf>) -> Self {
        let network_name = format!("{}_{}", params.chain, params.network);
        let path = data_dir.map(|dir| dir.join(format!("peers_{network_name}.json")));
        AddressBook {
            entries: Mutex::new(HashMap::new()),
            path,
            network_name,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Records an address sighting (gossip, DNS, config).
    pub async fn add(&self, addr: SocketAddr, services: u64, last_seen: u64) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= MAX_ADDRESS_BOOK_SIZE && !entries.contains_key(&addr) {
            // Full: drop the stalest never-successful entry to make room.
            let victim = entries
                .iter()
                .filter(|(_, known)| known.last_success == 0)
                .min_by_key(|(_, known)| known.last_seen)
                .map(|(addr, _)| *addr);
            match victim {
                Some(victim) => {
                    entries.remove(&victim);
                }
                None => return,
            }
        }
        let entry = entries.entry(addr).or_insert(KnownAddress {
            services,
            last_seen,
            last_attempt: 0,
            last_success: 0,
            failed_attempts: 0,
        });
        entry.services |= services;
        entry.last_seen = entry.last_seen.max(last_seen);
    }

    pub async fn note_attempt(&self, addr: &SocketAddr) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(addr) {
            entry.last_attempt = unix_now();
            entry.failed_attempts = entry.failed_attempts.saturating_add(1);
        }
    }

    pub async fn note_success(&self, addr: &SocketAddr, services: u64) {
        let now = unix_now();
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(*addr).or_insert(KnownAddress {
            services,
            last_seen: now,
            last_attempt: now,
            last_success: 0,
            failed_attempts: 0,
        });
        entry.services = services;
        entry.last_seen = now;
        entry.last_success = now;
        entry.failed_attempts = 0;
    }

    /// Ranks up to `n` dial candidates, excluding `exclude`.
    ///
    /// Weighting follows recency and history: proven addresses first,
    /// fresh gossip next, repeat offenders last.
    pub async fn select(&self, n: usize, exclude: &HashSet<SocketAddr>) -> Vec<SocketAddr> {
        let now = unix_now();
        let entries = self.entries.lock().await;
        let mut candidates: Vec<(i64, SocketAddr)> = entries
            .iter()
            .filter(|(addr, _)| !exclude.contains(addr))
            .map(|(addr, known)| (Self::score(known, now), *addr))
            .collect();
        candidates.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
        candidates.into_iter().take(n).map(|(_, addr)| addr).collect()
    }

    fn score(known: &KnownAddress, now: u64) -> i64 {
        let mut score: i64 = 0;
        if known.last_success > 0 {
            // Ever worked: strong signal, decaying over a week.
            let age = now.saturating_sub(known.last_success);
            score += 1_000_000 - (age.min(7 * 24 * 3600) as i64);
        }
        // Freshly seen addresses beat stale ones.
        let seen_age = now.saturating_sub(known.last_seen);
        score += 100_000 - (seen_age.min(24 * 3600) as i64 * 4);
        // Each consecutive failure pushes it down hard.
        score -= i64::from(known.failed_attempts) * 50_000;
        score
    }

    /// Loads the persisted book, merging into memory. Missing file is not
    /// an error.
    pub async fn load(&self) -> Result<usize, SpvError> {
        let Some(path) = &self.path else {
            return Ok(0);
        };
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::ReadFailed(e.to_string()).into()),
        };
        let saved: SavedAddressBook = serde_json::from_str(&json)
            .map_err(|e| StorageError::Corruption(format!("address book: {e}")))?;
        let mut entries = self.entries.lock().await;
        let mut loaded = 0;
        for (addr, known) in saved.addresses {
            if let Ok(addr) = addr.parse::<SocketAddr>() {
                entries.insert(addr, known);
                loaded += 1;
            }
        }
        tracing::debug!(count = loaded, "loaded address book");
        Ok(loaded)
    }

    /// Writes the book to disk, atomically (temp file then rename).
    pub async fn save(&self) -> Result<(), SpvError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let addresses: Vec<(String, KnownAddress)> = {
            let entries = self.entries.lock().await;
            entries.iter().map(|(addr, known)| (addr.to_string(), known.clone())).collect()
        };
        let saved = SavedAddressBook {
            version: 1,
            network: self.network_name.clone(),
            addresses,
        };
        let json = serde_json::to_string_pretty(&saved)
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisonwire::{chain_params, ChainKind, Network};

    fn book() -> AddressBook {
        AddressBook::new(chain_params(ChainKind::Bitcoin, Network::Regtest), None)
    }

    fn addr(last_octet: u8) -> SocketAddr {
        format!("10.1.2.{last_octet}:18444").parse().unwrap()
    }

    #[tokio::test]
    async fn selection_prefers_proven_and_fresh() {
        let book = book();
        let now = unix_now();
        book.add(addr(1), 0, now - 10).await; // fresh gossip
        book.add(addr(2), 0, now - 90_000).await; // stale gossip
        book.add(addr(3), 0, now - 50_000).await; // proven below
        book.note_success(&addr(3), 1).await;

        let picked = book.select(3, &HashSet::new()).await;
        assert_eq!(picked[0], addr(3));
        assert_eq!(picked[1], addr(1));
        assert_eq!(picked[2], addr(2));
    }

    #[tokio::test]
    async fn failures_push_addresses_down() {
        let book = book();
        let now = unix_now();
        book.add(addr(1), 0, now).await;
        book.add(addr(2), 0, now).await;
        book.note_attempt(&addr(1)).await;
        book.note_attempt(&addr(1)).await;
        let picked = book.select(2, &HashSet::new()).await;
        assert_eq!(picked[0], addr(2));
    }

    #[tokio::test]
    async fn exclusions_respected() {
        let book = book();
        book.add(addr(1), 0, unix_now()).await;
        book.add(addr(2), 0, unix_now()).await;
        let exclude: HashSet<_> = [addr(1)].into_iter().collect();
        let picked = book.select(5, &exclude).await;
        assert_eq!(picked, vec![addr(2)]);
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let params = chain_params(ChainKind::Bitcoin, Network::Regtest);
        let book = AddressBook::new(params, Some(dir.path().to_path_buf()));
        book.add(addr(7), 0x409, unix_now()).await;
        book.note_success(&addr(7), 0x409).await;
        book.save().await.unwrap();

        let reloaded = AddressBook::new(params, Some(dir.path().to_path_buf()));
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let picked = reloaded.select(1, &HashSet::new()).await;
        assert_eq!(picked, vec![addr(7)]);
    }
}
