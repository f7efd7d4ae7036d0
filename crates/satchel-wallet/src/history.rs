//! Transaction history from multi-address queries.
//!
//! [`MultiAddressFactory`] turns explorer transactions into
//! [`TransactionSummary`] values classified from the wallet's point of view,
//! and remembers the next unused receive and change index of every xpub
//! seen in a response.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use satchel_core::constants::CryptoCurrency;
use satchel_core::traits::BlockExplorer;
use satchel_core::types::{BalanceFilter, MultiAddressResponse, RawOutput, RawTransaction, XPubs, split_xpubs};

use crate::error::WalletError;
use crate::payload::AddressLabel;

/// Map key for inputs or outputs whose address could not be decoded.
pub const ADDRESS_DECODE_ERROR: &str = "[--address_decode_error--]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Sent,
    Received,
    Transferred,
    /// Mixed ownership with no net movement either way.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub hash: String,
    pub total: u64,
    pub fee: u64,
    pub transaction_type: TransactionType,
    pub time: i64,
    pub confirmations: u64,
    pub double_spend: bool,
    pub pending: bool,
    pub inputs_map: BTreeMap<String, u64>,
    pub outputs_map: BTreeMap<String, u64>,
    pub inputs_xpub_map: BTreeMap<String, String>,
    pub outputs_xpub_map: BTreeMap<String, String>,
}

/// Most recent first.
pub fn sort_most_recent(txs: &mut [TransactionSummary]) {
    txs.sort_by(|a, b| b.time.cmp(&a.time));
}

fn value_of(out: &RawOutput) -> u64 {
    u64::try_from(out.value).unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct MultiAddressFactory {
    currency: CryptoCurrency,
    next_receive: HashMap<String, u32>,
    next_change: HashMap<String, u32>,
    address_to_xpub: HashMap<String, String>,
}

impl MultiAddressFactory {
    pub fn new(currency: CryptoCurrency) -> Self {
        Self {
            currency,
            ..Self::default()
        }
    }

    /// One page of classified history.
    ///
    /// `all` holds every account's keys plus imported addresses (as legacy
    /// entries) and defines ownership. `only_show` narrows the query.
    /// `imported_filter`, when set, keeps only transactions touching one of
    /// those addresses. Transactions mined below `start_height` are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn account_transactions<E>(
        &mut self,
        explorer: &E,
        all: &[XPubs],
        imported_filter: Option<&[String]>,
        only_show: Option<&[String]>,
        limit: u32,
        offset: u32,
        start_height: u64,
    ) -> Result<Vec<TransactionSummary>, WalletError>
    where
        E: BlockExplorer + ?Sized,
    {
        let (legacy, segwit) = split_xpubs(all);
        let response = explorer.get_multi_address(
            self.currency,
            &legacy,
            &segwit,
            only_show,
            BalanceFilter::RemoveUnspendable,
            limit,
            offset,
        )?;
        Ok(self.summarize(all, &response, imported_filter, start_height))
    }

    /// Every page of history, fetched `page_size` at a time.
    pub fn all_transactions<E>(
        &mut self,
        explorer: &E,
        all: &[XPubs],
        only_show: Option<&[String]>,
        page_size: u32,
        start_height: u64,
    ) -> Result<Vec<TransactionSummary>, WalletError>
    where
        E: BlockExplorer + ?Sized,
    {
        let page_size = page_size.max(1);
        let mut offset = 0;
        let mut out = Vec::new();
        loop {
            let (legacy, segwit) = split_xpubs(all);
            let response = explorer.get_multi_address(
                self.currency,
                &legacy,
                &segwit,
                only_show,
                BalanceFilter::RemoveUnspendable,
                page_size,
                offset,
            )?;
            let fetched = response.txs.len();
            out.extend(self.summarize(all, &response, None, start_height));
            if fetched < page_size as usize {
                break;
            }
            offset += page_size;
        }
        debug!(count = out.len(), "history fetched");
        Ok(out)
    }

    /// Classify one explorer response. Also records next indices and the
    /// address-to-xpub map.
    pub fn summarize(
        &mut self,
        all: &[XPubs],
        response: &MultiAddressResponse,
        imported_filter: Option<&[String]>,
        start_height: u64,
    ) -> Vec<TransactionSummary> {
        for summary in &response.addresses {
            self.next_receive.insert(summary.address.clone(), summary.account_index);
            self.next_change.insert(summary.address.clone(), summary.change_index);
        }

        let own: HashSet<&str> = all
            .iter()
            .flat_map(|x| x.xpubs.iter())
            .map(|x| x.address.as_str())
            .collect();
        let latest = response.info.latest_block.height;

        let mut summaries = Vec::with_capacity(response.txs.len());
        for tx in &response.txs {
            if let Some(height) = tx.block_height {
                if height > 0 && height < start_height {
                    continue;
                }
            }
            if let Some(filter) = imported_filter {
                if !touches_any(tx, filter) {
                    continue;
                }
            }
            let summary = classify(tx, &own, latest);
            self.address_to_xpub
                .extend(summary.inputs_xpub_map.iter().map(|(a, x)| (a.clone(), x.clone())));
            self.address_to_xpub
                .extend(summary.outputs_xpub_map.iter().map(|(a, x)| (a.clone(), x.clone())));
            summaries.push(summary);
        }
        summaries
    }

    /// Next receive index of `xpub`, skipping indices reserved by a label.
    pub fn next_receive_index(&self, xpub: &str, reserved: &[AddressLabel]) -> u32 {
        let reserved: HashSet<u32> = reserved.iter().map(|l| l.index).collect();
        let mut index = self.next_receive.get(xpub).copied().unwrap_or(0);
        while reserved.contains(&index) {
            index += 1;
        }
        index
    }

    pub fn next_change_index(&self, xpub: &str) -> u32 {
        self.next_change.get(xpub).copied().unwrap_or(0)
    }

    pub fn increment_next_receive(&mut self, xpub: &str, reserved: &[AddressLabel]) {
        let next = self.next_receive_index(xpub, reserved) + 1;
        self.next_receive.insert(xpub.to_string(), next);
    }

    pub fn increment_next_change(&mut self, xpub: &str) {
        let next = self.next_change_index(xpub) + 1;
        self.next_change.insert(xpub.to_string(), next);
    }

    pub fn xpub_from_address(&self, address: &str) -> Option<&str> {
        self.address_to_xpub.get(address).map(String::as_str)
    }

    pub fn is_own_hd_address(&self, address: &str) -> bool {
        self.address_to_xpub.contains_key(address)
    }
}

fn touches_any(tx: &RawTransaction, addresses: &[String]) -> bool {
    let addrs = tx
        .inputs
        .iter()
        .filter_map(|i| i.prev_out.as_ref())
        .chain(&tx.out)
        .filter_map(|o| o.addr.as_deref());
    addrs.into_iter().any(|a| addresses.iter().any(|x| x == a))
}

fn classify(tx: &RawTransaction, own: &HashSet<&str>, latest: u64) -> TransactionSummary {
    let mut inputs_map: BTreeMap<String, u64> = BTreeMap::new();
    let mut outputs_map: BTreeMap<String, u64> = BTreeMap::new();
    let mut inputs_xpub_map = BTreeMap::new();
    let mut outputs_xpub_map = BTreeMap::new();
    let mut owned_inputs: HashSet<String> = HashSet::new();
    let mut owned_outputs: HashSet<String> = HashSet::new();

    let mut owned_in = 0u64;
    let mut input_count = 0usize;
    let mut owned_input_count = 0usize;
    for prev in tx.inputs.iter().filter_map(|i| i.prev_out.as_ref()) {
        input_count += 1;
        let value = value_of(prev);
        let Some(addr) = prev.addr.as_deref() else {
            *inputs_map.entry(ADDRESS_DECODE_ERROR.to_string()).or_default() += value;
            continue;
        };
        *inputs_map.entry(addr.to_string()).or_default() += value;
        if let Some(xpub) = &prev.xpub {
            inputs_xpub_map.insert(addr.to_string(), xpub.address.clone());
        }
        if prev.xpub.is_some() || own.contains(addr) {
            owned_inputs.insert(addr.to_string());
            owned_in += value;
            owned_input_count += 1;
        }
    }

    let mut owned_out = 0u64;
    let mut change = 0u64;
    let mut change_outputs: Vec<&RawOutput> = Vec::new();
    let mut unowned_output = false;
    for out in &tx.out {
        let value = value_of(out);
        let Some(addr) = out.addr.as_deref() else {
            *outputs_map.entry(ADDRESS_DECODE_ERROR.to_string()).or_default() += value;
            unowned_output = true;
            continue;
        };
        let owned = out.xpub.is_some() || own.contains(addr) || owned_inputs.contains(addr);
        if !owned {
            *outputs_map.entry(addr.to_string()).or_default() += value;
            unowned_output = true;
            continue;
        }
        owned_out += value;
        let is_change = out.xpub.as_ref().is_some_and(|x| x.is_change()) || inputs_map.contains_key(addr);
        if is_change {
            change += value;
            change_outputs.push(out);
        } else {
            *outputs_map.entry(addr.to_string()).or_default() += value;
            owned_outputs.insert(addr.to_string());
            if let Some(xpub) = &out.xpub {
                outputs_xpub_map.insert(addr.to_string(), xpub.address.clone());
            }
        }
    }

    let fee = u64::try_from(tx.fee).unwrap_or(0);
    let all_inputs_owned = input_count > 0 && owned_input_count == input_count;
    let (transaction_type, total) = if all_inputs_owned && !unowned_output {
        (TransactionType::Transferred, owned_in.saturating_sub(change).saturating_sub(fee))
    } else if all_inputs_owned {
        (TransactionType::Sent, owned_in.saturating_sub(change))
    } else if owned_input_count == 0 && owned_out > 0 {
        (TransactionType::Received, owned_out)
    } else if owned_input_count == 0 {
        (TransactionType::Unknown, 0)
    } else {
        match owned_out.cmp(&owned_in) {
            std::cmp::Ordering::Greater => (TransactionType::Received, owned_out - owned_in),
            std::cmp::Ordering::Less => (TransactionType::Sent, owned_in - owned_out),
            std::cmp::Ordering::Equal => (TransactionType::Unknown, 0),
        }
    };

    match transaction_type {
        TransactionType::Sent => inputs_map.retain(|a, _| owned_inputs.contains(a)),
        TransactionType::Received => {
            // Change-chain outputs count towards a receive, so list them too.
            for out in change_outputs {
                if let Some(addr) = out.addr.as_deref() {
                    *outputs_map.entry(addr.to_string()).or_default() += value_of(out);
                    owned_outputs.insert(addr.to_string());
                    if let Some(xpub) = &out.xpub {
                        outputs_xpub_map.insert(addr.to_string(), xpub.address.clone());
                    }
                }
            }
            outputs_map.retain(|a, _| owned_outputs.contains(a));
        }
        _ => {}
    }

    let confirmations = match tx.block_height {
        Some(height) if height > 0 && latest > 0 => (latest + 1).saturating_sub(height),
        _ => 0,
    };

    TransactionSummary {
        hash: tx.hash.clone(),
        total,
        fee,
        transaction_type,
        time: tx.time,
        confirmations,
        double_spend: tx.double_spend,
        pending: confirmations == 0,
        inputs_map,
        outputs_map,
        inputs_xpub_map,
        outputs_xpub_map,
    }
}
