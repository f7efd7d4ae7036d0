//! Account discovery when restoring a wallet from its mnemonic.

use tracing::{debug, info};

use satchel_core::config::WalletConfig;
use satchel_core::constants::{ACCOUNT_GAP_LIMIT, CryptoCurrency, DISCOVERY_INITIAL_BATCH};
use satchel_core::traits::BlockExplorer;
use satchel_core::types::{BalanceFilter, DerivationKind};

use crate::error::WalletError;
use crate::keys::{HdWallet, MasterKey};
use crate::mnemonic::Seed;

use super::body::{WalletBody, kinds_for};
use super::wallet::Wallet;

/// Number of accounts of `kind` worth restoring.
///
/// Account 0 is always kept. Later accounts are probed in batches that
/// double in size (5, 10, 20, ...); each account with transactions grows the
/// count and resets the gap, and probing stops after
/// [`ACCOUNT_GAP_LIMIT`] consecutive empty accounts.
pub fn discover_account_count<E>(explorer: &E, master: &MasterKey, kind: DerivationKind) -> Result<u32, WalletError>
where
    E: BlockExplorer + ?Sized,
{
    let mut size = 1u32;
    let mut gap = 0u32;
    let mut next = 1u32;
    let mut batch = DISCOVERY_INITIAL_BATCH;

    loop {
        let xpubs = (next..next + batch)
            .map(|i| master.account(kind, i).map(|k| k.xpub_string()))
            .collect::<Result<Vec<_>, WalletError>>()?;
        next += batch;

        let none: &[String] = &[];
        let (legacy, segwit) = match kind {
            DerivationKind::Legacy => (xpubs.as_slice(), none),
            DerivationKind::Segwit => (none, xpubs.as_slice()),
        };
        let balances = explorer.get_balance(CryptoCurrency::Btc, legacy, segwit, BalanceFilter::RemoveUnspendable)?;

        for xpub in &xpubs {
            if balances.get(xpub).is_some_and(|b| b.tx_count > 0) {
                size += 1;
                gap = 0;
            } else {
                gap += 1;
            }
            if gap >= ACCOUNT_GAP_LIMIT {
                debug!(?kind, size, "account discovery finished");
                return Ok(size);
            }
        }
        batch *= 2;
    }
}

/// HD body for `mnemonic` holding every account that has seen activity.
pub fn recover_wallet_body<E>(
    explorer: &E,
    mnemonic: &str,
    passphrase: &str,
    default_label: &str,
    v4: bool,
) -> Result<WalletBody, WalletError>
where
    E: BlockExplorer + ?Sized,
{
    let seed = Seed::from_mnemonic(mnemonic)?;
    let master = MasterKey::from_seed(&seed, passphrase)?;

    let legacy = discover_account_count(explorer, &master, DerivationKind::Legacy)?;
    let segwit = if v4 {
        discover_account_count(explorer, &master, DerivationKind::Segwit)?
    } else {
        0
    };
    let size = legacy.max(segwit).max(1);
    info!(size, legacy, segwit, "restoring accounts");

    let hd = HdWallet::from_seed(seed, passphrase, size, &kinds_for(v4))?;
    WalletBody::from_hd_wallet(&hd, default_label, v4)
}

impl Wallet {
    /// Restore a wallet from its mnemonic, discovering how many accounts it used.
    pub fn recover_from_mnemonic<E>(
        explorer: &E,
        mnemonic: &str,
        passphrase: &str,
        default_label: &str,
        v4: bool,
        config: &WalletConfig,
    ) -> Result<Self, WalletError>
    where
        E: BlockExplorer + ?Sized,
    {
        let body = recover_wallet_body(explorer, mnemonic, passphrase, default_label, v4)?;
        Ok(Self::with_body(body, v4, config))
    }
}
