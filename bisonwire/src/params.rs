//! Per-chain, per-network parameters.
//!
//! One canonical struct per (chain, network) pair. The hard-coded hashes
//! decode in const context, so an ill-formed constant fails the build
//! instead of surfacing at runtime.

use crate::block::BlockHeader;
use crate::encode::serialize;
use crate::hash_types::{BlockHash, TxMerkleNode};
use crate::pow::{Target, U256};

/// The UTXO chains this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    Bitcoin,
    Litecoin,
}

impl ChainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Bitcoin => "btc",
            ChainKind::Litecoin => "ltc",
        }
    }
}

impl std::fmt::Display for ChainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which network of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        })
    }
}

/// A hard-coded (height, hash) pair enforced during header validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: BlockHash,
}

/// Immutable parameters for one (chain, network) pair.
pub struct ChainParams {
    pub chain: ChainKind,
    pub network: Network,
    pub name: &'static str,
    /// Network magic, little-endian on the wire.
    pub magic: u32,
    pub default_port: u16,
    pub dns_seeds: &'static [&'static str],
    pub genesis: BlockHeader,
    pub genesis_hash: BlockHash,
    pub pow_limit: Target,
    pub pow_limit_bits: u32,
    pub target_timespan_secs: u64,
    pub target_time_per_block_secs: u64,
    /// Retarget clamp: at most this factor up, at most 1/factor down.
    pub retarget_adjustment_factor: u64,
    pub reduce_min_difficulty: bool,
    pub min_diff_reduction_time_secs: u64,
    pub pow_no_retargeting: bool,
    /// Ordered ascending by height.
    pub checkpoints: &'static [Checkpoint],
    pub bip34_height: u32,
    pub bip65_height: u32,
    pub bip66_height: u32,
    pub bech32_hrp: &'static str,
    pub pubkey_hash_addr_id: u8,
    pub script_hash_addr_id: u8,
    pub witness_pubkey_hash_addr_id: u8,
    pub witness_script_hash_addr_id: u8,
    pub private_key_id: u8,
    pub hd_private_key_id: [u8; 4],
    pub hd_public_key_id: [u8; 4],
    pub hd_coin_type: u32,
    pub coinbase_maturity: u16,
    pub max_money: i64,
    /// Chain-specific proof-of-work validator. `None` means the identity
    /// hash (double-SHA-256) is compared against the target.
    pub check_pow: Option<fn(&BlockHeader) -> bool>,
}

impl ChainParams {
    /// Number of blocks between difficulty retargets.
    pub fn retarget_interval(&self) -> u32 {
        (self.target_timespan_secs / self.target_time_per_block_secs) as u32
    }

    /// Runs the chain's proof-of-work check on a header.
    pub fn header_pow_valid(&self, header: &BlockHeader) -> bool {
        match self.check_pow {
            Some(check) => check(header),
            None => header.target().is_met_by(header.block_hash().to_byte_array()),
        }
    }

    /// Looks up the checkpoint pinned at a height, if any.
    pub fn checkpoint_at(&self, height: u32) -> Option<&'static BlockHash> {
        match self.checkpoints.binary_search_by_key(&height, |cp| cp.height) {
            Ok(idx) => Some(&self.checkpoints[idx].hash),
            Err(_) => None,
        }
    }

    /// The highest checkpoint height, or zero when there are none.
    pub fn last_checkpoint_height(&self) -> u32 {
        self.checkpoints.last().map(|cp| cp.height).unwrap_or(0)
    }
}

/// Returns the built-in parameters for a (chain, network) pair.
pub fn chain_params(chain: ChainKind, network: Network) -> &'static ChainParams {
    match (chain, network) {
        (ChainKind::Bitcoin, Network::Mainnet) => &BTC_MAINNET,
        (ChainKind::Bitcoin, Network::Testnet) => &BTC_TESTNET3,
        (ChainKind::Bitcoin, Network::Regtest) => &BTC_REGTEST,
        (ChainKind::Litecoin, Network::Mainnet) => &LTC_MAINNET,
        (ChainKind::Litecoin, Network::Testnet) => &LTC_TESTNET4,
        (ChainKind::Litecoin, Network::Regtest) => &LTC_REGTEST,
    }
}

/// Litecoin proof-of-work: scrypt(1024, 1, 1) over the serialized header,
/// with the header itself as salt, compared against the compact target.
pub fn scrypt_pow(header: &BlockHeader) -> bool {
    let bytes = serialize(header);
    let mut pow_hash = [0u8; 32];
    let Ok(params) = scrypt::Params::new(10, 1, 1, 32) else {
        return false;
    };
    if scrypt::scrypt(&bytes, &bytes, &params, &mut pow_hash).is_err() {
        return false;
    }
    header.target().is_met_by(pow_hash)
}

const fn nibble(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => panic!("invalid hex digit in hard-coded constant"),
    }
}

/// Parses display-order (big-endian) hash hex into internal little-endian
/// bytes. Const, so bad constants are build errors.
const fn hash_bytes(s: &str) -> [u8; 32] {
    let b = s.as_bytes();
    if b.len() != 64 {
        panic!("hard-coded hash must be 64 hex digits");
    }
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[31 - i] = (nibble(b[2 * i]) << 4) | nibble(b[2 * i + 1]);
        i += 1;
    }
    out
}

/// Parses numeric big-endian hex (for PoW limits), keeping byte order.
const fn be_bytes(s: &str) -> [u8; 32] {
    let b = s.as_bytes();
    if b.len() != 64 {
        panic!("hard-coded limit must be 64 hex digits");
    }
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 32 {
        out[i] = (nibble(b[2 * i]) << 4) | nibble(b[2 * i + 1]);
        i += 1;
    }
    out
}

const fn hash(s: &str) -> BlockHash {
    BlockHash::from_byte_array(hash_bytes(s))
}

const fn merkle(s: &str) -> TxMerkleNode {
    TxMerkleNode::from_byte_array(hash_bytes(s))
}

const fn cp(height: u32, s: &str) -> Checkpoint {
    Checkpoint {
        height,
        hash: hash(s),
    }
}

const fn limit(s: &str) -> Target {
    Target::from_u256(U256::from_be_bytes(be_bytes(s)))
}

const BTC_GENESIS_MERKLE: TxMerkleNode =
    merkle("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b");
const LTC_GENESIS_MERKLE: TxMerkleNode =
    merkle("97ddfbbae6be97fd6cdf3e7ca13232a3afff2353e29badfab7f73011edd4ced9");

const POW_LIMIT_2_224: Target =
    limit("00000000ffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
const POW_LIMIT_2_255: Target =
    limit("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
const POW_LIMIT_LTC: Target =
    limit("00000fffff000000000000000000000000000000000000000000000000000000");

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const MAX_BTC_SATOSHI: i64 = 21_000_000 * 100_000_000;
const MAX_LTC_SATOSHI: i64 = 84_000_000 * 100_000_000;
/// Sentinel for deployments that never activate on a network.
const NEVER: u32 = 100_000_000;

pub static BTC_MAINNET: ChainParams = ChainParams {
    chain: ChainKind::Bitcoin,
    network: Network::Mainnet,
    name: "mainnet",
    magic: 0xD9B4_BEF9,
    default_port: 8333,
    dns_seeds: &[
        "seed.bitcoin.sipa.be",
        "dnsseed.bluematt.me",
        "dnsseed.bitcoin.dashjr.org",
        "seed.bitnodes.io",
        "seed.bitcoin.jonasschnelli.ch",
        "seed.btc.petertodd.net",
        "seed.bitcoin.sprovoost.nl",
        "seed.bitcoin.wiz.biz",
    ],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: BTC_GENESIS_MERKLE,
        time: 0x495f_ab29, // 2009-01-03 18:15:05 UTC
        bits: 0x1d00_ffff,
        nonce: 0x7c2b_ac1d,
    },
    genesis_hash: hash("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"),
    pow_limit: POW_LIMIT_2_224,
    pow_limit_bits: 0x1d00_ffff,
    target_timespan_secs: 14 * SECS_PER_DAY,
    target_time_per_block_secs: 10 * 60,
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: false,
    min_diff_reduction_time_secs: 0,
    pow_no_retargeting: false,
    checkpoints: &[
        cp(11111, "0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"),
        cp(33333, "000000002dd5588a74784eaa7ab0507a18ad16a236e7b1ce69f00d7ddfb5d0a6"),
        cp(74000, "0000000000573993a3c9e41ce34471c079dcf5f52a0e824a81e7f953b8661a20"),
        cp(105000, "00000000000291ce28027faea320c8d2b054b2e0fe44a773f3eefb151d6bdc97"),
        cp(134444, "00000000000005b12ffd4cd315cd34ffd4a594f430ac814c91184a0d42d2b0fe"),
        cp(168000, "000000000000099e61ea72015e79632f216fe6cb33d7899acb35b75c8303b763"),
        cp(193000, "000000000000059f452a5f7340de6682a977387c17010ff6e6c3bd83ca8b1317"),
        cp(210000, "000000000000048b95347e83192f69cf0366076336c639f9b7228e9ba171342e"),
        cp(216116, "00000000000001b4f4b433e81ee46494af945cf96014816a4e2370f11b23df4e"),
        cp(225430, "00000000000001c108384350f74090433e7fcf79a606b8e797f065b130575932"),
        cp(250000, "000000000000003887df1f29024b06fc2200b55f8af8f35453d7be294df2d214"),
        cp(267300, "000000000000000a83fbd660e918f218bf37edd92b748ad940483c7c116179ac"),
        cp(279000, "0000000000000001ae8c72a0b0c301f67e3afca10e819efa9041e458e9bd7e40"),
        cp(300255, "0000000000000000162804527c6e9b9f0563a280525f9d08c12041def0a0f3b2"),
        cp(319400, "000000000000000021c6052e9becade189495d1c539aa37c58917305fd15f13b"),
        cp(343185, "0000000000000000072b8bf361d01a6ba7d445dd024203fafc78768ed4368554"),
        cp(352940, "000000000000000010755df42dba556bb72be6a32f3ce0b6941ce4430152c9ff"),
        cp(382320, "00000000000000000a8dc6ed5b133d0eb2fd6af56203e4159789b092defd8ab2"),
        cp(400000, "000000000000000004ec466ce4732fe6f1ed1cddc2ed4b328fff5224276e3f6f"),
        cp(430000, "000000000000000001868b2bb3a285f3cc6b33ea234eb70facf4dcdf22186b87"),
        cp(460000, "000000000000000000ef751bbce8e744ad303c47ece06c8d863e4d417efc258c"),
        cp(490000, "000000000000000000de069137b17b8d5a3dfbd5b145b2dcfb203f15d0c4de90"),
        cp(520000, "0000000000000000000d26984c0229c9f6962dc74db0a6d525f2f1640396f69c"),
        cp(550000, "000000000000000000223b7a2298fb1c6c75fb0efc28a4c56853ff4112ec6bc9"),
        cp(560000, "0000000000000000002c7b276daf6efb2b6aa68e2ce3be67ef925b3264ae7122"),
        cp(563378, "0000000000000000000f1c54590ee18d15ec70e68c8cd4cfbadb1b4f11697eee"),
        cp(597379, "00000000000000000005f8920febd3925f8272a6a71237563d78c2edfdd09ddf"),
        cp(623950, "0000000000000000000f2adce67e49b0b6bdeb9de8b7c3d7e93b21e7fc1e819d"),
        cp(654683, "0000000000000000000b9d2ec5a352ecba0592946514a92f14319dc2b367fc72"),
        cp(691719, "00000000000000000008a89e854d57e5667df88f1cdef6fde2fbca1de5b639ad"),
        cp(724466, "000000000000000000052d314a259755ca65944e68df6b12a067ea8f1f5a7091"),
        cp(751565, "00000000000000000009c97098b5295f7e5f183ac811fb5d1534040adb93cabd"),
        cp(781565, "00000000000000000002b8c04999434c33b8e033f11a977b288f8411766ee61c"),
        cp(800000, "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054"),
        cp(810000, "000000000000000000028028ca82b6aa81ce789e4eb9e0321b74c3cbaf405dd1"),
    ],
    bip34_height: 227931,
    bip65_height: 388381,
    bip66_height: 363725,
    bech32_hrp: "bc",
    pubkey_hash_addr_id: 0x00,
    script_hash_addr_id: 0x05,
    witness_pubkey_hash_addr_id: 0x06,
    witness_script_hash_addr_id: 0x0A,
    private_key_id: 0x80,
    hd_private_key_id: [0x04, 0x88, 0xad, 0xe4],
    hd_public_key_id: [0x04, 0x88, 0xb2, 0x1e],
    hd_coin_type: 0,
    coinbase_maturity: 100,
    max_money: MAX_BTC_SATOSHI,
    check_pow: None,
};

pub static BTC_TESTNET3: ChainParams = ChainParams {
    chain: ChainKind::Bitcoin,
    network: Network::Testnet,
    name: "testnet3",
    magic: 0x0709_110B,
    default_port: 18333,
    dns_seeds: &[
        "testnet-seed.bitcoin.jonasschnelli.ch",
        "seed.tbtc.petertodd.net",
        "seed.testnet.bitcoin.sprovoost.nl",
        "testnet-seed.bluematt.me",
    ],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: BTC_GENESIS_MERKLE,
        time: 1296688602,
        bits: 0x1d00_ffff,
        nonce: 0x18ae_a41a,
    },
    genesis_hash: hash("000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943"),
    pow_limit: POW_LIMIT_2_224,
    pow_limit_bits: 0x1d00_ffff,
    target_timespan_secs: 14 * SECS_PER_DAY,
    target_time_per_block_secs: 10 * 60,
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: true,
    min_diff_reduction_time_secs: 20 * 60,
    pow_no_retargeting: false,
    checkpoints: &[
        cp(546, "000000002a936ca763904c3c35fce2f3556c559c0214345d31b1bcebf76acb70"),
        cp(100000, "00000000009e2958c15ff9290d571bf9459e93b19765c6801ddeccadbb160a1e"),
        cp(200000, "0000000000287bffd321963ef05feab753ebe274e1d78b2fd4e2bfe9ad3aa6f2"),
        cp(300001, "0000000000004829474748f3d1bc8fcf893c88be255e6d7f571c548aff57abf4"),
        cp(400002, "0000000005e2c73b8ecb82ae2dbc2e8274614ebad7172b53528aba7501f5a089"),
        cp(500011, "00000000000929f63977fbac92ff570a9bd9e7715401ee96f2848f7b07750b02"),
        cp(600002, "000000000001f471389afd6ee94dcace5ccc44adc18e8bff402443f034b07240"),
        cp(700000, "000000000000406178b12a4dea3b27e13b3c4fe4510994fd667d7c1e6a3f4dc1"),
        cp(800010, "000000000017ed35296433190b6829db01e657d80631d43f5983fa403bfdb4c1"),
        cp(900000, "0000000000356f8d8924556e765b7a94aaebc6b5c8685dcfa2b1ee8b41acd89b"),
        cp(1000007, "00000000001ccb893d8a1f25b70ad173ce955e5f50124261bbbc50379a612ddf"),
        cp(1100007, "00000000000abc7b2cd18768ab3dee20857326a818d1946ed6796f42d66dd1e8"),
        cp(1200007, "00000000000004f2dc41845771909db57e04191714ed8c963f7e56713a7b6cea"),
        cp(1300007, "0000000072eab69d54df75107c052b26b0395b44f77578184293bf1bb1dbd9fa"),
        cp(1354312, "0000000000000037a8cd3e06cd5edbfe9dd1dbcc5dacab279376ef7cfc2b4c75"),
        cp(1580000, "00000000000000b7ab6ce61eb6d571003fbe5fe892da4c9b740c49a07542462d"),
        cp(1692000, "000000000000056c49030c174179b52a928c870e6e8a822c75973b7970cfbd01"),
        cp(1864000, "000000000000006433d1efec504c53ca332b64963c425395515b01977bd7b3b0"),
        cp(2010000, "0000000000004ae2f3896ca8ecd41c460a35bf6184e145d91558cece1c688a76"),
        cp(2143398, "00000000000163cfb1f97c4e4098a3692c8053ad9cab5ad9c86b338b5c00b8b7"),
        cp(2344474, "0000000000000004877fa2d36316398528de4f347df2f8a96f76613a298ce060"),
    ],
    bip34_height: 21111,
    bip65_height: 581885,
    bip66_height: 330776,
    bech32_hrp: "tb",
    pubkey_hash_addr_id: 0x6f,
    script_hash_addr_id: 0xc4,
    witness_pubkey_hash_addr_id: 0x03,
    witness_script_hash_addr_id: 0x28,
    private_key_id: 0xef,
    hd_private_key_id: [0x04, 0x35, 0x83, 0x94],
    hd_public_key_id: [0x04, 0x35, 0x87, 0xcf],
    hd_coin_type: 1,
    coinbase_maturity: 100,
    max_money: MAX_BTC_SATOSHI,
    check_pow: None,
};

pub static BTC_REGTEST: ChainParams = ChainParams {
    chain: ChainKind::Bitcoin,
    network: Network::Regtest,
    name: "regtest",
    magic: 0xDAB5_BFFA,
    // Nonstandard, matched to the dex simnet harness.
    default_port: 20575,
    dns_seeds: &[],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: BTC_GENESIS_MERKLE,
        time: 1296688602,
        bits: 0x207f_ffff,
        nonce: 2,
    },
    genesis_hash: hash("0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206"),
    pow_limit: POW_LIMIT_2_255,
    pow_limit_bits: 0x207f_ffff,
    target_timespan_secs: 14 * SECS_PER_DAY,
    target_time_per_block_secs: 10 * 60,
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: true,
    min_diff_reduction_time_secs: 20 * 60,
    pow_no_retargeting: true,
    checkpoints: &[],
    bip34_height: NEVER,
    bip65_height: 1351,
    bip66_height: 1251,
    bech32_hrp: "bcrt",
    pubkey_hash_addr_id: 0x6f,
    script_hash_addr_id: 0xc4,
    witness_pubkey_hash_addr_id: 0x03,
    witness_script_hash_addr_id: 0x28,
    private_key_id: 0xef,
    hd_private_key_id: [0x04, 0x35, 0x83, 0x94],
    hd_public_key_id: [0x04, 0x35, 0x87, 0xcf],
    hd_coin_type: 1,
    coinbase_maturity: 100,
    max_money: MAX_BTC_SATOSHI,
    check_pow: None,
};

pub static LTC_MAINNET: ChainParams = ChainParams {
    chain: ChainKind::Litecoin,
    network: Network::Mainnet,
    name: "mainnet",
    magic: 0xDBB6_C0FB,
    default_port: 9333,
    dns_seeds: &[
        "seed-a.litecoin.loshan.co.uk",
        "dnsseed.thrasher.io",
        "dnsseed.litecointools.com",
        "dnsseed.litecoinpool.org",
    ],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: LTC_GENESIS_MERKLE,
        time: 1317972665,
        bits: 0x1e0f_fff0,
        nonce: 2084524493,
    },
    genesis_hash: hash("12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2"),
    pow_limit: POW_LIMIT_LTC,
    pow_limit_bits: 0x1e0f_fff0,
    target_timespan_secs: 3 * SECS_PER_DAY + SECS_PER_DAY / 2, // 3.5 days
    target_time_per_block_secs: 150,                           // 2.5 minutes
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: false,
    min_diff_reduction_time_secs: 0,
    pow_no_retargeting: false,
    checkpoints: &[
        cp(1500, "841a2965955dd288cfa707a755d05a54e45f8bd476835ec9af4402a2b59a2967"),
        cp(4032, "9ce90e427198fc0ef05e5905ce3503725b80e26afd35a987965fd7e3d9cf0846"),
        cp(8064, "eb984353fc5190f210651f150c40b8a4bab9eeeff0b729fcb3987da694430d70"),
        cp(16128, "602edf1859b7f9a6af809f1d9b0e6cb66fdc1d4d9dcd7a4bec03e12a1ccd153d"),
        cp(23420, "d80fdf9ca81afd0bd2b2a90ac3a9fe547da58f2530ec874e978fce0b5101b507"),
        cp(50000, "69dc37eb029b68f075a5012dcc0419c127672adb4f3a32882b2b3e71d07a20a6"),
        cp(80000, "4fcb7c02f676a300503f49c764a89955a8f920b46a8cbecb4867182ecdb2e90a"),
        cp(120000, "bd9d26924f05f6daa7f0155f32828ec89e8e29cee9e7121b026a7a3552ac6131"),
        cp(161500, "dbe89880474f4bb4f75c227c77ba1cdc024991123b28b8418dbbf7798471ff43"),
        cp(179620, "2ad9c65c990ac00426d18e446e0fd7be2ffa69e9a7dcb28358a50b2b78b9f709"),
        cp(240000, "7140d1c4b4c2157ca217ee7636f24c9c73db39c4590c4e6eab2e3ea1555088aa"),
        cp(383640, "2b6809f094a9215bafc65eb3f110a35127a34be94b7d0590a096c3f126c6f364"),
        cp(409004, "487518d663d9f1fa08611d9395ad74d982b667fbdc0e77e9cf39b4f1355908a3"),
        cp(456000, "bf34f71cc6366cd487930d06be22f897e34ca6a40501ac7d401be32456372004"),
        cp(638902, "15238656e8ec63d28de29a8c75fcf3a5819afc953dcd9cc45cecc53baec74f38"),
        cp(721000, "198a7b4de1df9478e2463bd99d75b714eab235a2e63e741641dc8a759a9840e5"),
    ],
    bip34_height: 710000,
    bip65_height: 918684,
    bip66_height: 811879,
    bech32_hrp: "ltc",
    pubkey_hash_addr_id: 0x30,
    script_hash_addr_id: 0x32,
    witness_pubkey_hash_addr_id: 0x06,
    witness_script_hash_addr_id: 0x0A,
    private_key_id: 0xB0,
    hd_private_key_id: [0x04, 0x88, 0xad, 0xe4],
    hd_public_key_id: [0x04, 0x88, 0xb2, 0x1e],
    hd_coin_type: 2,
    coinbase_maturity: 100,
    max_money: MAX_LTC_SATOSHI,
    check_pow: Some(scrypt_pow),
};

pub static LTC_TESTNET4: ChainParams = ChainParams {
    chain: ChainKind::Litecoin,
    network: Network::Testnet,
    name: "testnet4",
    magic: 0xF1C8_D2FD,
    default_port: 19335,
    dns_seeds: &[
        "testnet-seed.litecointools.com",
        "seed-b.litecoin.loshan.co.uk",
        "dnsseed-testnet.thrasher.io",
    ],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: LTC_GENESIS_MERKLE,
        time: 1486949366,
        bits: 0x1e0f_fff0,
        nonce: 293345,
    },
    genesis_hash: hash("4966625a4b2851d9fdee139e56211a0d88575f59ed816ff5e6a63deb4e3e29a0"),
    pow_limit: POW_LIMIT_LTC,
    pow_limit_bits: 0x1e0f_fff0,
    target_timespan_secs: 3 * SECS_PER_DAY + SECS_PER_DAY / 2,
    target_time_per_block_secs: 150,
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: false,
    min_diff_reduction_time_secs: 0,
    pow_no_retargeting: false,
    checkpoints: &[
        cp(26115, "817d5b509e91ab5e439652eee2f59271bbc7ba85021d720cdb6da6565b43c14f"),
        cp(43928, "7d86614c153f5ef6ad878483118ae523e248cd0dd0345330cb148e812493cbb4"),
        cp(69296, "66c2f58da3cfd282093b55eb09c1f5287d7a18801a8ff441830e67e8771010df"),
        cp(99949, "8dd471cb5aecf5ead91e7e4b1e932c79a0763060f8d93671b6801d115bfc6cde"),
        cp(159256, "ab5b0b9968842f5414804591119d6db829af606864b1959a25d6f5c114afb2b7"),
        cp(2394367, "bc5829f4973d0797755efee11313687b3c63ee2f70b60b62eebcd10283534327"),
    ],
    bip34_height: 76,
    bip65_height: 76,
    bip66_height: 76,
    bech32_hrp: "tltc",
    pubkey_hash_addr_id: 0x6f,
    script_hash_addr_id: 0x3a,
    witness_pubkey_hash_addr_id: 0x52,
    witness_script_hash_addr_id: 0x31,
    private_key_id: 0xef,
    hd_private_key_id: [0x04, 0x35, 0x83, 0x94],
    hd_public_key_id: [0x04, 0x35, 0x87, 0xcf],
    hd_coin_type: 1,
    coinbase_maturity: 100,
    max_money: MAX_LTC_SATOSHI,
    check_pow: Some(scrypt_pow),
};

pub static LTC_REGTEST: ChainParams = ChainParams {
    chain: ChainKind::Litecoin,
    network: Network::Regtest,
    name: "regtest",
    magic: 0xDAB5_BFFA,
    default_port: 18444,
    dns_seeds: &[],
    genesis: BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: LTC_GENESIS_MERKLE,
        time: 1296688602,
        bits: 0x207f_ffff,
        nonce: 0,
    },
    genesis_hash: hash("530827f38f93b43ed12af0b3ad25a288dc02ed74d6d7857862df51fc56c416f9"),
    pow_limit: POW_LIMIT_2_255,
    pow_limit_bits: 0x207f_ffff,
    target_timespan_secs: 3 * SECS_PER_DAY + SECS_PER_DAY / 2,
    target_time_per_block_secs: 150,
    retarget_adjustment_factor: 4,
    reduce_min_difficulty: false,
    min_diff_reduction_time_secs: 0,
    pow_no_retargeting: true,
    checkpoints: &[],
    bip34_height: NEVER,
    bip65_height: 1351,
    bip66_height: 1251,
    bech32_hrp: "rltc",
    pubkey_hash_addr_id: 0x6f,
    script_hash_addr_id: 0x3a,
    witness_pubkey_hash_addr_id: 0x52,
    witness_script_hash_addr_id: 0x31,
    private_key_id: 0xef,
    hd_private_key_id: [0x04, 0x35, 0x83, 0x94],
    hd_public_key_id: [0x04, 0x35, 0x87, 0xcf],
    hd_coin_type: 1,
    coinbase_maturity: 100,
    max_money: MAX_LTC_SATOSHI,
    check_pow: Some(scrypt_pow),
};

#[cfg(test)]
mod tests {
    use super::*;

    static ALL_PARAMS: [&ChainParams; 6] = [
        &BTC_MAINNET,
        &BTC_TESTNET3,
        &BTC_REGTEST,
        &LTC_MAINNET,
        &LTC_TESTNET4,
        &LTC_REGTEST,
    ];

    #[test]
    fn genesis_hashes_match() {
        for params in ALL_PARAMS {
            assert_eq!(
                params.genesis.block_hash(),
                params.genesis_hash,
                "{} {} genesis hash",
                params.chain,
                params.network
            );
        }
    }

    #[test]
    fn genesis_bits_match_pow_limit_bits() {
        for params in ALL_PARAMS {
            assert_eq!(
                params.genesis.bits, params.pow_limit_bits,
                "{} {} genesis bits",
                params.chain,
                params.network
            );
        }
    }

    #[test]
    fn genesis_target_within_pow_limit() {
        for params in ALL_PARAMS {
            assert!(
                params.genesis.target().0 <= params.pow_limit.0,
                "{} {} genesis target above limit",
                params.chain,
                params.network
            );
        }
    }

    #[test]
    fn checkpoints_strictly_ascending() {
        for params in ALL_PARAMS {
            for pair in params.checkpoints.windows(2) {
                assert!(
                    pair[0].height < pair[1].height,
                    "{} {} checkpoints out of order",
                    params.chain,
                    params.network
                );
            }
        }
    }

    #[test]
    fn checkpoint_lookup() {
        let params = chain_params(ChainKind::Bitcoin, Network::Mainnet);
        let cp = params.checkpoint_at(11111).expect("checkpoint at 11111");
        assert_eq!(
            cp.to_string(),
            "0000000069e244f73d78e8fd29ba2fd2ed618bd6fa2ee92559f542fdb26e7c1d"
        );
        assert!(params.checkpoint_at(11112).is_none());
        assert_eq!(params.last_checkpoint_height(), 810000);
    }

    #[test]
    fn retarget_intervals() {
        assert_eq!(chain_params(ChainKind::Bitcoin, Network::Mainnet).retarget_interval(), 2016);
        assert_eq!(chain_params(ChainKind::Litecoin, Network::Mainnet).retarget_interval(), 2016);
    }

    #[test]
    fn ltc_genesis_passes_scrypt_pow() {
        let params = chain_params(ChainKind::Litecoin, Network::Mainnet);
        assert!(params.header_pow_valid(&params.genesis));
    }

    #[test]
    fn ltc_pow_is_scrypt_not_sha256d() {
        // The LTC genesis identity hash does NOT satisfy its own target;
        // only the scrypt hash does.
        let params = chain_params(ChainKind::Litecoin, Network::Mainnet);
        let header = params.genesis;
        assert!(!header.target().is_met_by(header.block_hash().to_byte_array()));
        assert!(scrypt_pow(&header));
    }

    #[test]
    fn btc_genesis_passes_sha256d_pow() {
        let params = chain_params(ChainKind::Bitcoin, Network::Mainnet);
        assert!(params.header_pow_valid(&params.genesis));
        // And the scrypt interpretation must fail it, the PoW variant works
        // both ways.
        assert!(!scrypt_pow(&params.genesis));
    }
}
