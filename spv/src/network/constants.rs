//! Timeouts and limits for the networking layer.

use std::time::Duration;

/// Minimum peer protocol version we will talk to.
pub const MIN_PROTOCOL_VERSION: u32 = 70001;
/// Protocol version we advertise.
pub const PROTOCOL_VERSION: u32 = 70016;

// Timeouts.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const PING_INTERVAL: Duration = Duration::from_secs(120);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(15);
pub const HEADER_BATCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const BLOCK_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const FILTER_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const FILTER_CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(30);

// Dial scheduling: backoff per address after consecutive failures.
pub const DIAL_BACKOFF: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(8), Duration::from_secs(60)];
/// How often the connection maintenance loop runs.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);

// Channel depths. Bounded so slow consumers apply backpressure.
pub const INBOUND_CHANNEL_DEPTH: usize = 256;
pub const OUTBOUND_CHANNEL_DEPTH: usize = 64;
pub const BLOCK_RESULT_CHANNEL_DEPTH: usize = 64;

// Ban scoring.
pub const BAN_THRESHOLD: u32 = 100;
pub const SCORE_PROTOCOL_VIOLATION: u32 = 100;
pub const SCORE_INVALID_HEADER: u32 = 100;
pub const SCORE_INVALID_FILTER: u32 = 50;
pub const SCORE_DUPLICATE_HANDSHAKE: u32 = 20;
pub const SCORE_UNSOLICITED_MESSAGE: u32 = 20;
pub const SCORE_STALLED_SYNC: u32 = 100;

/// Most addresses kept in the address book.
pub const MAX_ADDRESS_BOOK_SIZE: usize = 2000;
/// How many block-fetch attempts before a block is declared unavailable.
pub const MAX_BLOCK_FETCH_ATTEMPTS: u32 = 8;
/// Maximum peers queried in parallel during filter-header sync.
pub const MAX_CFHEADER_PEERS: usize = 8;
/// Re-announce interval for pending broadcasts.
pub const REBROADCAST_INTERVAL: Duration = Duration::from_secs(15 * 60);
