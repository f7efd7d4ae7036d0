//! Input signing for the base chain and the fork-id chain.
//!
//! [`Network::Standard`] signs P2PKH inputs with the legacy signature hash
//! and P2WPKH inputs with the BIP143 one. [`Network::ForkId`] signs P2PKH
//! inputs over the BIP143-layout digest, which commits to the spent value.

use std::collections::HashMap;

use bitcoin::ecdsa::Signature;
use bitcoin::hashes::Hash;
use bitcoin::script::Instruction;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{OutPoint, PrivateKey, PublicKey, ScriptBuf, Transaction, TxIn, TxOut, Witness};
use tracing::{debug, warn};

use satchel_core::constants::Network;

use crate::error::WalletError;
use crate::keys::SECP;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpendKind {
    P2pkh,
    P2wpkh,
}

fn spend_kind(script: &ScriptBuf) -> Option<SpendKind> {
    if script.is_p2pkh() {
        Some(SpendKind::P2pkh)
    } else if script.is_p2wpkh() {
        Some(SpendKind::P2wpkh)
    } else {
        None
    }
}

struct SigningKey {
    key: PrivateKey,
    public: PublicKey,
    p2pkh: ScriptBuf,
    p2wpkh: Option<ScriptBuf>,
}

impl SigningKey {
    fn new(key: PrivateKey) -> Self {
        let public = key.public_key(&SECP);
        let p2wpkh = public.wpubkey_hash().ok().map(|h| ScriptBuf::new_p2wpkh(&h));
        Self {
            key,
            p2pkh: ScriptBuf::new_p2pkh(&public.pubkey_hash()),
            p2wpkh,
            public,
        }
    }

    fn spends(&self, script: &ScriptBuf) -> bool {
        &self.p2pkh == script || self.p2wpkh.as_ref() == Some(script)
    }
}

fn sighash(
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    prevout: &TxOut,
    kind: SpendKind,
    network: Network,
) -> Result<Option<Message>, WalletError> {
    let protocol = |e: &dyn std::fmt::Display| WalletError::Protocol(e.to_string());
    let digest = match (network, kind) {
        (Network::Standard, SpendKind::P2pkh) => cache
            .legacy_signature_hash(index, &prevout.script_pubkey, EcdsaSighashType::All.to_u32())
            .map_err(|e| protocol(&e))?
            .to_byte_array(),
        (Network::Standard, SpendKind::P2wpkh) => cache
            .p2wpkh_signature_hash(index, &prevout.script_pubkey, prevout.value, EcdsaSighashType::All)
            .map_err(|e| protocol(&e))?
            .to_byte_array(),
        // BIP143 layout with the P2PKH script itself as scriptCode.
        (Network::ForkId, SpendKind::P2pkh) => cache
            .p2wsh_signature_hash(index, &prevout.script_pubkey, prevout.value, EcdsaSighashType::All)
            .map_err(|e| protocol(&e))?
            .to_byte_array(),
        (Network::ForkId, SpendKind::P2wpkh) => return Ok(None),
    };
    Ok(Some(Message::from_digest(digest)))
}

/// `(signature, pubkey)` pushed by an input, from its script or witness.
fn existing_signature(input: &TxIn, kind: SpendKind) -> Option<(Vec<u8>, Vec<u8>)> {
    match kind {
        SpendKind::P2pkh => {
            let pushes: Vec<Vec<u8>> = input
                .script_sig
                .instructions()
                .map(|ins| match ins {
                    Ok(Instruction::PushBytes(bytes)) => Some(bytes.as_bytes().to_vec()),
                    _ => None,
                })
                .collect::<Option<_>>()?;
            match <[Vec<u8>; 2]>::try_from(pushes) {
                Ok([sig, key]) => Some((sig, key)),
                Err(_) => None,
            }
        }
        SpendKind::P2wpkh if input.witness.len() == 2 => {
            Some((input.witness.nth(0)?.to_vec(), input.witness.nth(1)?.to_vec()))
        }
        SpendKind::P2wpkh => None,
    }
}

/// True when the input already carries a valid signature over `msg` for `prevout`.
fn already_signed(input: &TxIn, kind: SpendKind, prevout: &TxOut, msg: &Message) -> bool {
    let Some((sig, key)) = existing_signature(input, kind) else {
        return false;
    };
    let (Ok(sig), Ok(key)) = (Signature::from_slice(&sig), PublicKey::from_slice(&key)) else {
        return false;
    };
    let owner = match kind {
        SpendKind::P2pkh => Some(ScriptBuf::new_p2pkh(&key.pubkey_hash())),
        SpendKind::P2wpkh => key.wpubkey_hash().ok().map(|h| ScriptBuf::new_p2wpkh(&h)),
    };
    owner.as_ref() == Some(&prevout.script_pubkey) && SECP.verify_ecdsa(msg, &sig.signature, &key.inner).is_ok()
}

enum Unlock {
    Script(ScriptBuf),
    Witness(Witness),
}

/// Sign every input of `tx` that one of `keys` can spend.
///
/// Inputs whose previous output is not in `prevouts`, that already carry a
/// valid signature, or that no key matches are left as they are. Returns the
/// number of inputs signed.
pub fn sign_transaction(
    tx: &mut Transaction,
    prevouts: &HashMap<OutPoint, TxOut>,
    keys: &[PrivateKey],
    network: Network,
) -> Result<usize, WalletError> {
    let keys: Vec<SigningKey> = keys.iter().copied().map(SigningKey::new).collect();
    let mut unlocks = Vec::new();
    {
        let mut cache = SighashCache::new(&*tx);
        for (index, input) in tx.input.iter().enumerate() {
            let Some(prevout) = prevouts.get(&input.previous_output) else {
                debug!(index, "previous output unknown, skipping input");
                continue;
            };
            let Some(kind) = spend_kind(&prevout.script_pubkey) else {
                warn!(index, "unsupported previous output script, skipping input");
                continue;
            };
            let Some(msg) = sighash(&mut cache, index, prevout, kind, network)? else {
                warn!(index, ?network, "input type not signable on this network");
                continue;
            };
            if already_signed(input, kind, prevout, &msg) {
                warn!(index, "input already signed, skipping");
                continue;
            }
            let Some(signer) = keys.iter().find(|k| k.spends(&prevout.script_pubkey)) else {
                warn!(index, "no key for input");
                continue;
            };

            let signature = Signature {
                signature: SECP.sign_ecdsa(&msg, &signer.key.inner),
                sighash_type: EcdsaSighashType::All,
            };
            let unlock = match kind {
                SpendKind::P2pkh => Unlock::Script(
                    ScriptBuf::builder()
                        .push_slice(signature.serialize())
                        .push_key(&signer.public)
                        .into_script(),
                ),
                SpendKind::P2wpkh => Unlock::Witness(Witness::p2wpkh(&signature, &signer.public.inner)),
            };
            unlocks.push((index, unlock));
        }
    }

    let signed = unlocks.len();
    for (index, unlock) in unlocks {
        match unlock {
            Unlock::Script(script) => tx.input[index].script_sig = script,
            Unlock::Witness(witness) => tx.input[index].witness = witness,
        }
    }
    debug!(signed, inputs = tx.input.len(), "signed transaction");
    Ok(signed)
}

/// True when every input carries a script signature or a witness.
pub fn is_fully_signed(tx: &Transaction) -> bool {
    tx.input.iter().all(|i| !i.script_sig.is_empty() || !i.witness.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::serialize_hex;
    use satchel_core::types::Utxo;

    use crate::payment::builder::{Recipient, make_transaction};

    fn p2pkh_script(pkh: &str) -> String {
        format!("76a914{pkh}88ac")
    }

    fn utxo(tx_hash: &str, output_index: u32, pkh: &str, value: u64) -> Utxo {
        Utxo {
            tx_hash: tx_hash.into(),
            output_index,
            script: p2pkh_script(pkh),
            value,
            ..Utxo::default()
        }
    }

    fn wif(s: &str) -> PrivateKey {
        PrivateKey::from_wif(s).unwrap()
    }

    const BCH_UNSIGNED: &str = "0100000003cf759867fb887f188d4207f2f79582ed25ee00b9244f37a3e7555c13e1577a550000000000ffffffff5f2061d611a866145b99d75ac4d0885d399c7904b2851e443d0a19fddab86b8e0000000000ffffffff15261589a6a5d95842306db374b3a3edf77c3acfc46f77c023187b1830d5f7920100000000ffffffff0188f50400000000001976a914bd10ab8b35f4343aa9c083d2b6217f2f33f1321288ac00000000";
    const BCH_SIGNED: &str = "0100000003cf759867fb887f188d4207f2f79582ed25ee00b9244f37a3e7555c13e1577a55000000006a473044022004b6a56b92e9889a3802f9221b8d918b6a5666df541bdf94cbaddc091c73110d0220352f9ff024cf629e97d0d9144700d25ac66daaa55cb5eaac581737c6e818b0210121034eeeae0afd407733476ec3b6d729ffaae408ffd678eeba8c4b8fd2fb4b716f87ffffffff5f2061d611a866145b99d75ac4d0885d399c7904b2851e443d0a19fddab86b8e000000006b483045022100ae7082c2ad557507cbe216e3454e8db9815c2ddd6bae0bbafc6924456e6470120220396921b7bf1dc98c39e6e7ffb88f05225bd8058034d7de8b3b969d73845eaa3401210248eb68f88e4a90df7159887c0acdb888c643d13fd2df45c3b4c45414f11d7635ffffffff15261589a6a5d95842306db374b3a3edf77c3acfc46f77c023187b1830d5f792010000006a473044022049a5d9b2eb50811caf38185c5b7854840cb2dc8b0aea694dbb636aa1bb5bb0310220433c4afa7a5a530693f896d07eade034fd16c8f3e0b62827519393d16d630848012103183db6bf9edfa63716905fa267546ffd59647cc00448a7a6aa6c0c44bf4d0a87ffffffff0188f50400000000001976a914bd10ab8b35f4343aa9c083d2b6217f2f33f1321288ac00000000";

    fn bch_coins() -> Vec<Utxo> {
        vec![
            utxo(
                "cf759867fb887f188d4207f2f79582ed25ee00b9244f37a3e7555c13e1577a55",
                0,
                "b1118e480d82bdb8b8ecb3aad1e90b598a483521",
                10_000,
            ),
            utxo(
                "5f2061d611a866145b99d75ac4d0885d399c7904b2851e443d0a19fddab86b8e",
                0,
                "e58b78144109f80d50b45fb9983713393fd0d511",
                1_861,
            ),
            utxo(
                "15261589a6a5d95842306db374b3a3edf77c3acfc46f77c023187b1830d5f792",
                1,
                "8fae53260a0eedbaab3ba0dc52dd84fcebc45e49",
                315_202,
            ),
        ]
    }

    fn bch_keys() -> Vec<PrivateKey> {
        vec![
            wif("Kyf1r2iNDikTTGEemDtsGP4jgcSqyYupsc4Rs2jQqHgwUZJNoyHK"),
            wif("L57gn4CnJMdJAiaKXwRL9zFGNqcrvJT4mSJLXPdkFwPBYdvfYLAG"),
            wif("KyGNbFSewezfpHfghxFfyoj3uscpFjLKih75PyU1ZoRkMwPuSWjb"),
        ]
    }

    #[test]
    fn fork_id_reference_vector() {
        let mut unsigned = make_transaction(
            &bch_coins(),
            &[Recipient::new("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq", 325_000)],
            2_063,
            None,
        )
        .unwrap();
        assert_eq!(serialize_hex(&unsigned.tx), BCH_UNSIGNED);
        assert!(!is_fully_signed(&unsigned.tx));

        let signed = sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &bch_keys(), Network::ForkId).unwrap();
        assert_eq!(signed, 3);
        assert!(is_fully_signed(&unsigned.tx));
        assert_eq!(serialize_hex(&unsigned.tx), BCH_SIGNED);
        assert_eq!(
            unsigned.tx.compute_txid().to_string(),
            "4518b1364f7f1b9d24109445f2c266016bf420d0ac4d52507e7b2eb980386c18"
        );
    }

    #[test]
    fn standard_reference_vector() {
        let coin = utxo(
            "e4fb18c8c8279b3433001b5eed2e1a83588196095512fd1d01f236cda223b9e3",
            0,
            "c27982b0008a2fdb1edd3f663ec554019204ad2e",
            48_916,
        );
        let mut unsigned = make_transaction(
            &[coin],
            &[Recipient::new("1NNDb5uQU32CtQnBxnrfvJSjkWcREoFWe7", 1_000)],
            0,
            Some("1JjHeuviHUxCRGcVXYjt3XTbX8H1qifUt2"),
        )
        .unwrap();
        let key = wif("L3wP9Q3gTZ9YwuTuB8nuczhWG9uEXQEE94PTWDZgpVttFzJbKSHL");
        sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &[key], Network::Standard).unwrap();
        assert_eq!(
            serialize_hex(&unsigned.tx),
            "0100000001e4fb18c8c8279b3433001b5eed2e1a83588196095512fd1d01f236cda223b9e3000000006a47304402200b95124b7375c7d101a59708f617fb1923925ec6f802132734720ad78c26e3b3022022b1c6956a69c1cbd7e682fdabf3adb0807fc7be6d49f88a2b9dc616b21d985f0121035858322132dbe271a5684c8c7453f9136f3eff4fdccc7b524871d4d6f9d0093bffffffff02e8030000000000001976a914ea5de26225a2de0e1eba49d3694bd92e195bacfc88ac2cbb0000000000001976a914c27982b0008a2fdb1edd3f663ec554019204ad2e88ac00000000"
        );
        assert_eq!(
            unsigned.tx.compute_txid().to_string(),
            "efe67d55f73c187447f7fbae66e6daf126efce20ca9b13897b5e81f8cabee639"
        );
    }

    #[test]
    fn signed_inputs_are_not_resigned() {
        let mut unsigned = make_transaction(
            &bch_coins(),
            &[Recipient::new("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq", 325_000)],
            2_063,
            None,
        )
        .unwrap();
        let keys = bch_keys();
        assert_eq!(sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &keys[..1], Network::ForkId).unwrap(), 1);
        assert!(!is_fully_signed(&unsigned.tx));
        assert_eq!(sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &keys, Network::ForkId).unwrap(), 2);
        assert_eq!(serialize_hex(&unsigned.tx), BCH_SIGNED);
    }

    #[test]
    fn unknown_prevout_and_missing_key_leave_input_unsigned() {
        let mut unsigned = make_transaction(
            &bch_coins(),
            &[Recipient::new("1JEggWq9VVaVnDmdTbYuHmJXN4icdF89Kq", 325_000)],
            2_063,
            None,
        )
        .unwrap();
        assert_eq!(sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &[], Network::ForkId).unwrap(), 0);

        let first = unsigned.tx.input[0].previous_output;
        unsigned.prevouts.remove(&first);
        let signed = sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &bch_keys(), Network::ForkId).unwrap();
        assert_eq!(signed, 2);
        assert!(unsigned.tx.input[0].script_sig.is_empty());
        assert!(!unsigned.tx.input[1].script_sig.is_empty());
        assert!(!unsigned.tx.input[2].script_sig.is_empty());
        assert!(!is_fully_signed(&unsigned.tx));
    }

    #[test]
    fn segwit_input_gets_a_witness() {
        let key = wif("L3wP9Q3gTZ9YwuTuB8nuczhWG9uEXQEE94PTWDZgpVttFzJbKSHL");
        let wpkh = key.public_key(&SECP).wpubkey_hash().unwrap();
        let coin = Utxo {
            tx_hash: "11".repeat(32),
            output_index: 0,
            script: hex::encode(ScriptBuf::new_p2wpkh(&wpkh).as_bytes()),
            value: 50_000,
            is_segwit: true,
            ..Utxo::default()
        };
        let mut unsigned =
            make_transaction(&[coin], &[Recipient::new("1NNDb5uQU32CtQnBxnrfvJSjkWcREoFWe7", 40_000)], 1_000, None)
                .unwrap();
        assert_eq!(sign_transaction(&mut unsigned.tx, &unsigned.prevouts, &[key], Network::Standard).unwrap(), 1);
        assert!(unsigned.tx.input[0].script_sig.is_empty());
        assert_eq!(unsigned.tx.input[0].witness.len(), 2);
        assert!(is_fully_signed(&unsigned.tx));

        // Fork-id chain has no segwit.
        let mut again = unsigned.clone();
        again.tx.input[0].witness = Witness::new();
        assert_eq!(sign_transaction(&mut again.tx, &again.prevouts, &[key], Network::ForkId).unwrap(), 0);
    }
}
