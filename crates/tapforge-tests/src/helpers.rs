//! Shared test helpers: an in-memory node and a software signing device.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use tapforge_core::address::Address;
use tapforge_core::fee::FeeRate;
use tapforge_core::script::Script;
use tapforge_core::taproot::tap_tweak_hash;
use tapforge_core::types::{Hash256, OutPoint, Transaction, Utxo};
use tapforge_wallet::external::{ExternalSigner, SignRequest, SignResponse, SignatureKind};
use tapforge_wallet::hd::ExtendedKey;
use tapforge_wallet::node::{NodeClient, NodeError, TxInfo};

pub const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// Outpoint with a recognisable txid.
pub fn outpoint(tag: u8, vout: u32) -> OutPoint {
    OutPoint::new(Hash256([tag; 32]), vout)
}

/// An unspent output of `value` paying `script_pubkey`.
pub fn utxo(tag: u8, value: u64, script_pubkey: Script) -> Utxo {
    Utxo::new(outpoint(tag, 0), value, script_pubkey).unwrap()
}

#[derive(Default)]
struct ChainState {
    unspent: Vec<Utxo>,
    /// txid -> (transaction, confirmations)
    transactions: HashMap<Hash256, (Transaction, u32)>,
    fee: Option<FeeRate>,
    reject: Option<String>,
}

/// In-memory node. Broadcast transactions update the UTXO set at once
/// (unconfirmed outputs are listed) and confirm on [`MockNode::mine`].
#[derive(Default)]
pub struct MockNode {
    state: Mutex<ChainState>,
}

impl MockNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, utxo: Utxo) {
        self.state.lock().unspent.push(utxo);
    }

    pub fn set_fee_rate(&self, rate: Option<FeeRate>) {
        self.state.lock().fee = rate;
    }

    /// Refuse every broadcast with `reason`.
    pub fn reject_with(&self, reason: &str) {
        self.state.lock().reject = Some(reason.to_string());
    }

    pub fn mine(&self) {
        for (_, confirmations) in self.state.lock().transactions.values_mut() {
            *confirmations += 1;
        }
    }

    pub fn transaction(&self, txid: &Hash256) -> Option<Transaction> {
        self.state.lock().transactions.get(txid).map(|(tx, _)| tx.clone())
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().transactions.len()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn list_unspent(&self, addresses: &[Address]) -> Result<Vec<Utxo>, NodeError> {
        let scripts: Vec<Script> = addresses.iter().map(Address::script_pubkey).collect();
        Ok(self
            .state
            .lock()
            .unspent
            .iter()
            .filter(|u| scripts.contains(&u.script_pubkey))
            .cloned()
            .collect())
    }

    async fn estimate_smart_fee(&self, blocks: u16) -> Result<FeeRate, NodeError> {
        self.state
            .lock()
            .fee
            .ok_or_else(|| NodeError::NotFound(format!("no estimate for {blocks} blocks")))
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Hash256, NodeError> {
        let tx = Transaction::from_hex(tx_hex).map_err(|e| NodeError::Rejected(format!("TX decode failed: {e}")))?;
        let mut state = self.state.lock();
        if let Some(reason) = &state.reject {
            return Err(NodeError::Rejected(reason.clone()));
        }
        for input in &tx.inputs {
            if !state.unspent.iter().any(|u| u.outpoint == input.previous_output) {
                return Err(NodeError::Rejected("bad-txns-inputs-missingorspent".into()));
            }
        }
        let spent: Vec<OutPoint> = tx.inputs.iter().map(|i| i.previous_output).collect();
        state.unspent.retain(|u| !spent.contains(&u.outpoint));

        let txid = tx.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.value > 0 {
                state.unspent.push(Utxo {
                    outpoint: OutPoint::new(txid, vout as u32),
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                });
            }
        }
        state.transactions.insert(txid, (tx, 0));
        Ok(txid)
    }

    async fn get_raw_transaction(&self, txid: &Hash256) -> Result<TxInfo, NodeError> {
        let state = self.state.lock();
        let (tx, confirmations) = state
            .transactions
            .get(txid)
            .ok_or_else(|| NodeError::NotFound(txid.to_string()))?;
        Ok(TxInfo { confirmations: *confirmations, outputs: tx.outputs.clone() })
    }
}

/// A signing device holding a master key. It derives the key named by
/// each request's derivation path and never hands secrets out.
pub struct SoftwareDevice {
    master: ExtendedKey,
    requests: Mutex<Vec<SignRequest>>,
}

impl SoftwareDevice {
    pub fn new(master: ExtendedKey) -> Self {
        Self { master, requests: Mutex::new(Vec::new()) }
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<SignRequest> {
        self.requests.lock().clone()
    }
}

impl ExternalSigner for SoftwareDevice {
    fn sign(&self, request: &SignRequest) -> Result<SignResponse, String> {
        self.requests.lock().push(request.clone());
        let path = request.derivation_path.as_ref().ok_or("no derivation path")?;
        let key = self
            .master
            .derive_path(path)
            .and_then(|k| k.to_key_material())
            .map_err(|e| e.to_string())?;
        key.scoped(|key| match request.kind {
            SignatureKind::Ecdsa => {
                let sig = key.sign_ecdsa(&request.sighash).map_err(|e| e.to_string())?;
                Ok(SignResponse {
                    signature: sig.serialize_der().to_vec(),
                    public_key: key.public_key().serialize().to_vec(),
                })
            }
            SignatureKind::Schnorr | SignatureKind::TaprootKeySpend => {
                let internal = key.x_only_public_key().0;
                let tweak = (request.kind == SignatureKind::TaprootKeySpend)
                    .then(|| tap_tweak_hash(&internal, request.tap_merkle_root.as_ref()));
                let sig = key
                    .sign_schnorr(&request.sighash, &[0u8; 32], tweak.as_ref())
                    .map_err(|e| e.to_string())?;
                Ok(SignResponse {
                    signature: sig.serialize().to_vec(),
                    public_key: internal.serialize().to_vec(),
                })
            }
        })
    }
}
