//! Score-based peer banning.
//!
//! Misbehavior accumulates per IP; crossing the threshold bans the
//! address for a bounded time. Expiry is lazy, checked on lookup.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;

use crate::network::constants::{
    BAN_THRESHOLD, SCORE_DUPLICATE_HANDSHAKE, SCORE_INVALID_FILTER, SCORE_INVALID_HEADER,
    SCORE_PROTOCOL_VIOLATION, SCORE_STALLED_SYNC, SCORE_UNSOLICITED_MESSAGE,
};

/// Categories of peer misbehavior and their scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misbehavior {
    ProtocolViolation,
    DuplicateHandshake,
    InvalidHeader,
    InvalidFilter,
    UnsolicitedMessage,
    StalledSync,
}

impl Misbehavior {
    pub fn score(&self) -> u32 {
        match self {
            Misbehavior::ProtocolViolation => SCORE_PROTOCOL_VIOLATION,
            Misbehavior::DuplicateHandshake => SCORE_DUPLICATE_HANDSHAKE,
            Misbehavior::InvalidHeader => SCORE_INVALID_HEADER,
            Misbehavior::InvalidFilter => SCORE_INVALID_FILTER,
            Misbehavior::UnsolicitedMessage => SCORE_UNSOLICITED_MESSAGE,
            Misbehavior::StalledSync => SCORE_STALLED_SYNC,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Misbehavior::ProtocolViolation => "protocol violation",
            Misbehavior::DuplicateHandshake => "duplicate handshake",
            Misbehavior::InvalidHeader => "invalid header",
            Misbehavior::InvalidFilter => "invalid filter",
            Misbehavior::UnsolicitedMessage => "unsolicited message",
            Misbehavior::StalledSync => "stalled sync",
        }
    }
}

#[derive(Debug, Clone)]
struct BanEntry {
    expires_at: SystemTime,
    score: u32,
    reason: String,
}

#[derive(Default)]
struct BanState {
    scores: HashMap<IpAddr, u32>,
    bans: HashMap<IpAddr, BanEntry>,
}

/// The shared ban manager.
pub struct BanManager {
    state: Mutex<BanState>,
    duration: Duration,
}

impl BanManager {
    pub fn new(duration: Duration) -> Self {
        BanManager {
            state: Mutex::new(BanState::default()),
            duration,
        }
    }

    /// Adds misbehavior score for the peer at `addr`. Returns `true` when
    /// this pushed the peer over the ban threshold (the caller should
    /// disconnect it).
    pub async fn record(&self, addr: &SocketAddr, misbehavior: Misbehavior) -> bool {
        let ip = addr.ip();
        let mut state = self.state.lock().await;
        let score = state.scores.entry(ip).or_insert(0);
        *score = score.saturating_add(misbehavior.score());
        let score = *score;
        tracing::debug!(%ip, kind = misbehavior.as_str(), score, "peer misbehavior");
        if score >= BAN_THRESHOLD {
            state.bans.insert(
                ip,
                BanEntry {
                    expires_at: SystemTime::now() + self.duration,
                    score,
                    reason: misbehavior.as_str().to_string(),
                },
            );
            state.scores.remove(&ip);
            tracing::info!(%ip, score, "peer banned");
            true
        } else {
            false
        }
    }

    /// Bans an address outright, regardless of score.
    pub async fn ban(&self, addr: &SocketAddr, reason: &str) {
        let mut state = self.state.lock().await;
        state.bans.insert(
            addr.ip(),
            BanEntry {
                expires_at: SystemTime::now() + self.duration,
                score: BAN_THRESHOLD,
                reason: reason.to_string(),
            },
        );
        state.scores.remove(&addr.ip());
    }

    /// Whether the address is currently banned. Expired entries are
    /// removed here rather than by a sweeper.
    pub async fn is_banned(&self, addr: &SocketAddr) -> bool {
        let ip = addr.ip();
        let mut state = self.state.lock().await;
        match state.bans.get(&ip) {
            Some(entry) if entry.expires_at > SystemTime::now() => true,
            Some(_) => {
                state.bans.remove(&ip);
                false
            }
            None => false,
        }
    }

    /// Clears every ban and all accumulated scores.
    pub async fn unban_all(&self) {
        let mut state = self.state.lock().await;
        state.bans.clear();
        state.scores.clear();
    }

    /// Current number of unexpired bans.
    pub async fn banned_count(&self) -> usize {
        let now = SystemTime::now();
        let mut state = self.state.lock().await;
        state.bans.retain(|_, entry| entry.expires_at > now);
        state.bans.len()
    }

    /// The reason and score for a current ban, if any.
    pub async fn ban_info(&self, addr: &SocketAddr) -> Option<(String, u32)> {
        let state = self.state.lock().await;
        state
            .bans
            .get(&addr.ip())
            .filter(|entry| entry.expires_at > SystemTime::now())
            .map(|entry| (entry.reason.clone(), entry.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.0.2.1:8333".parse().unwrap()
    }

    #[tokio::test]
    async fn threshold_bans() {
        let bans = BanManager::new(Duration::from_secs(60));
        // Two duplicate handshakes (20 each) stay under the threshold.
        assert!(!bans.record(&addr(), Misbehavior::DuplicateHandshake).await);
        assert!(!bans.record(&addr(), Misbehavior::DuplicateHandshake).await);
        assert!(!bans.is_banned(&addr()).await);
        // An invalid header (100) crosses it.
        assert!(bans.record(&addr(), Misbehavior::InvalidHeader).await);
        assert!(bans.is_banned(&addr()).await);
    }

    #[tokio::test]
    async fn single_violation_at_threshold_bans() {
        let bans = BanManager::new(Duration::from_secs(60));
        assert!(bans.record(&addr(), Misbehavior::ProtocolViolation).await);
        assert!(bans.is_banned(&addr()).await);
    }

    #[tokio::test]
    async fn invalid_filter_is_half_threshold() {
        let bans = BanManager::new(Duration::from_secs(60));
        assert!(!bans.record(&addr(), Misbehavior::InvalidFilter).await);
        assert!(bans.record(&addr(), Misbehavior::InvalidFilter).await);
    }

    #[tokio::test]
    async fn bans_expire_lazily() {
        let bans = BanManager::new(Duration::ZERO);
        bans.ban(&addr(), "test").await;
        // Zero-duration ban is expired by the time we look.
        assert!(!bans.is_banned(&addr()).await);
        assert_eq!(bans.banned_count().await, 0);
    }

    #[tokio::test]
    async fn unban_all_clears_scores_too() {
        let bans = BanManager::new(Duration::from_secs(60));
        bans.record(&addr(), Misbehavior::InvalidFilter).await;
        bans.unban_all().await;
        // Score was cleared: another 50 does not ban.
        assert!(!bans.record(&addr(), Misbehavior::InvalidFilter).await);
    }
}
