//! The wallet payload: data model, encryption envelope, upgrades and
//! account discovery.

pub mod account;
pub mod body;
pub mod discovery;
pub mod imported;
pub mod options;
pub mod wallet;
pub mod wrapper;

pub use account::{Account, AccountV3, AccountV4, AddressCache, AddressLabel, Derivation};
pub use body::WalletBody;
pub use imported::{ARCHIVED_ADDRESS, ImportedAddress, NORMAL_ADDRESS};
pub use options::Options;
pub use wallet::Wallet;
pub use wrapper::{WalletWrapper, checksum};
