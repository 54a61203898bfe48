// Regtest chain parameters shared by the harness and the simulated nodes.

/// Satoshis per coin
pub const COIN: u64 = 100_000_000;

/// Block subsidy on regtest (no halving is reached at harness scale)
pub const BLOCK_SUBSIDY: u64 = 50 * COIN;

/// Confirmations a coinbase output needs before it can be spent
pub const COINBASE_MATURITY: u64 = 100;

/// Compact proof-of-work target used by regtest blocks
pub const REGTEST_BITS: u32 = 0x207f_ffff;

/// Block header version written by the harness
pub const BLOCK_VERSION: i32 = 0x2000_0000;

/// Transaction version written by the harness
pub const TX_VERSION: i32 = 1;

/// Timestamp of the deterministic genesis block
pub const GENESIS_TIME: u32 = 1_296_688_602;

/// Base58 version byte for regtest P2PKH addresses
pub const REGTEST_P2PKH_PREFIX: u8 = 0x6f;

/// BIP32 version bytes for regtest extended private keys (`tprv`)
pub const REGTEST_XPRV_VERSION: [u8; 4] = [0x04, 0x35, 0x83, 0x94];

/// Protocol prefix of a miner-info (identity attestation) output
pub const MINER_INFO_PROTOCOL_ID: [u8; 4] = [0x60, 0x1d, 0xfa, 0xce];

/// Protocol prefix of the coinbase output referencing a miner-info transaction
pub const MINER_ID_PROTOCOL_ID: [u8; 4] = [0xac, 0x1e, 0xed, 0x88];

/// Version of the miner-info protocol payload
pub const MINER_INFO_PROTOCOL_VERSION: u8 = 0x00;

/// Version string written into miner-info documents
pub const MINER_INFO_DOCUMENT_VERSION: &str = "0.3";

/// Fee paid by a node-built miner-info transaction
pub const MINER_INFO_TX_FEE: u64 = 500;

/// Sighash flag appended to every signature (ALL | FORKID)
pub const SIGHASH_ALL_FORKID: u8 = 0x41;
