//! Protocol and wallet constants. All monetary values are in satoshis.

pub const COIN: u64 = 100_000_000;

/// Hard cap on the value a single transaction may move (21M coins).
pub const MAX_SUPPLY: u64 = 21_000_000 * COIN;

/// Smallest output value the wallet will create.
pub const DUST: u64 = 546;

/// Minimum fee accepted by the push-tx collaborator.
pub const PUSHTX_MIN: u64 = 1000;

/// Default fee rate in satoshis per kilobyte.
pub const DEFAULT_FEE_PER_KB: u64 = 10_000;

/// Default PBKDF2 iteration count for payload and second-password encryption.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 5000;

/// Default logout timeout stored in wallet options, in milliseconds.
pub const DEFAULT_LOGOUT_TIME_MS: u64 = 600_000;

/// Consecutive inactive accounts that end discovery on recovery.
pub const ACCOUNT_GAP_LIMIT: u32 = 10;

/// First batch size used during account discovery.
pub const DISCOVERY_INITIAL_BATCH: u32 = 5;

/// Receive addresses past the next index sent to the storage service for sync.
pub const SYNC_ADDRESS_LOOKAHEAD: u32 = 20;

/// Height at which Bitcoin Cash split from Bitcoin.
pub const BCH_FORK_HEIGHT: u64 = 478_558;

/// Supported coins.
///
/// # Examples
///
/// ```
/// use satchel_core::constants::CryptoCurrency;
/// assert_eq!(CryptoCurrency::Btc.ticker(), "BTC");
/// assert_eq!(CryptoCurrency::Bch.network(), satchel_core::constants::Network::ForkId);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CryptoCurrency {
    /// Bitcoin.
    #[default]
    Btc,
    /// Bitcoin Cash.
    Bch,
}

impl CryptoCurrency {
    /// Ticker symbol used as the currency key in explorer calls.
    pub fn ticker(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Bch => "BCH",
        }
    }

    /// Signing network for this coin.
    pub fn network(&self) -> Network {
        match self {
            Self::Btc => Network::Standard,
            Self::Bch => Network::ForkId,
        }
    }

    /// Lowest block height whose transactions belong to this coin's history.
    pub fn starting_block_height(&self) -> u64 {
        match self {
            Self::Btc => 0,
            Self::Bch => BCH_FORK_HEIGHT,
        }
    }
}

/// Signature-hash flavour used when signing inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// Base chain: legacy signature hash.
    #[default]
    Standard,
    /// Forked chain: value-committing signature hash with replay protection.
    ForkId,
}
