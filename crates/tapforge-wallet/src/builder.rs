//! Transaction builder.
//!
//! Collects inputs, outputs, a change destination and a fee policy through
//! chained setters, then validates everything at once in
//! [`TransactionBuilder::build`]. Setters never fail: the first problem is
//! recorded and reported by `build`. The result is a [`PartialTransaction`],
//! which has no network serialization until it is signed.
//!
//! ```ignore
//! let mut builder = TransactionBuilder::new(Network::Mainnet);
//! builder
//!     .add_input(utxo)
//!     .add_output(&recipient, 50_000)
//!     .set_change(&change)
//!     .estimate_fee(FeeRate::from_sat_per_vb(5));
//! let signed = builder.sign(&Signer::new(), &tree)?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use tapforge_core::address::{Address, Network};
use tapforge_core::constants::{
    DEFAULT_DUST_RELAY_FEE, MAX_STANDARD_TX_WEIGHT, SEQUENCE_FINAL, SEQUENCE_RBF,
};
use tapforge_core::error::TransactionError;
use tapforge_core::fee::{
    FeeRate, P2PKH_INPUT_WEIGHT, P2SH_P2WPKH_INPUT_WEIGHT, P2WPKH_INPUT_WEIGHT, custom_input_weight,
    dust_threshold, output_weight, spends_with_witness, tx_overhead_weight,
};
use tapforge_core::script::{Script, ScriptBuilder, ScriptType};
use tapforge_core::sighash::{EcdsaSighashType, TapSighashType};
use tapforge_core::taproot::{ControlBlock, TaprootLeaf};
use tapforge_core::types::{Hash256, OutPoint, Transaction, TxIn, TxOut, Utxo};

use crate::coin_selection::{CoinSelector, SelectionParams, SelectionStrategy};
use crate::error::WalletError;
use crate::hd::DerivationPath;
use crate::signer::{KeySource, SignedTransaction, Signer};

/// Transaction version used unless overridden.
pub const DEFAULT_TX_VERSION: i32 = 2;

/// Non-final sequence that still enables the lock time without signalling RBF.
const SEQUENCE_ENABLE_LOCKTIME: u32 = 0xffff_fffe;

/// Largest DER ECDSA signature plus the sighash byte.
const MAX_ECDSA_SIG_LEN: usize = 73;

/// What the signer needs beyond the spent output to satisfy an input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpendInfo {
    /// P2SH redeem script (for nested segwit: the P2WPKH/P2WSH program).
    pub redeem_script: Option<Script>,
    /// P2WSH witness script, bare or nested.
    pub witness_script: Option<Script>,
    /// Script tree root of a Taproot output spent by key path.
    pub tap_merkle_root: Option<Hash256>,
    /// Leaf and proof for a Taproot script-path spend.
    pub tap_leaf: Option<(TaprootLeaf, ControlBlock)>,
    /// Stack items placed after the signature, before any script.
    pub extra_witness: Vec<Vec<u8>>,
    pub ecdsa_sighash: EcdsaSighashType,
    pub tap_sighash: TapSighashType,
    /// Passed to external signers as a key hint.
    pub derivation_path: Option<DerivationPath>,
}

impl SpendInfo {
    pub fn p2sh(redeem_script: Script) -> Self {
        Self { redeem_script: Some(redeem_script), ..Self::default() }
    }

    pub fn p2wsh(witness_script: Script) -> Self {
        Self { witness_script: Some(witness_script), ..Self::default() }
    }

    /// P2SH-wrapped P2WSH.
    pub fn p2sh_p2wsh(witness_script: Script) -> Self {
        Self {
            redeem_script: Some(Script::p2wsh_from_script(&witness_script)),
            witness_script: Some(witness_script),
            ..Self::default()
        }
    }

    /// Key-path spend of an output committing to `merkle_root`.
    pub fn taproot_key(merkle_root: Option<Hash256>) -> Self {
        Self { tap_merkle_root: merkle_root, ..Self::default() }
    }

    pub fn taproot_script(leaf: TaprootLeaf, control_block: ControlBlock) -> Self {
        Self { tap_leaf: Some((leaf, control_block)), ..Self::default() }
    }

    pub fn with_extra_witness(mut self, items: Vec<Vec<u8>>) -> Self {
        self.extra_witness = items;
        self
    }

    pub fn with_ecdsa_sighash(mut self, sighash: EcdsaSighashType) -> Self {
        self.ecdsa_sighash = sighash;
        self
    }

    pub fn with_tap_sighash(mut self, sighash: TapSighashType) -> Self {
        self.tap_sighash = sighash;
        self
    }

    pub fn with_derivation_path(mut self, path: DerivationPath) -> Self {
        self.derivation_path = Some(path);
        self
    }

    fn extra_lens(&self) -> impl Iterator<Item = usize> + '_ {
        self.extra_witness.iter().map(Vec::len)
    }
}

/// Estimated weight of spending `prevout` with `info`.
pub fn estimate_input_weight(prevout: &Script, info: &SpendInfo) -> Result<u64, WalletError> {
    let tap_sig = info.tap_sighash.signature_len();
    let weight = match prevout.script_type() {
        ScriptType::P2pkh => P2PKH_INPUT_WEIGHT,
        ScriptType::P2wpkh => P2WPKH_INPUT_WEIGHT,
        ScriptType::P2sh => match (&info.redeem_script, &info.witness_script) {
            (Some(redeem), _) if redeem.is_p2wpkh() => P2SH_P2WPKH_INPUT_WEIGHT,
            (Some(redeem), Some(ws)) if redeem.is_p2wsh() => {
                let mut items = vec![MAX_ECDSA_SIG_LEN];
                items.extend(info.extra_lens());
                items.push(ws.len());
                custom_input_weight(push_len(redeem.len()), &items)
            }
            (Some(redeem), _) => {
                let script_sig = push_len(MAX_ECDSA_SIG_LEN)
                    + info.extra_lens().map(push_len).sum::<usize>()
                    + push_len(redeem.len());
                custom_input_weight(script_sig, &[])
            }
            (None, _) => return Err(WalletError::BuildError("P2SH input without redeem script".into())),
        },
        ScriptType::P2wsh => {
            let ws = info
                .witness_script
                .as_ref()
                .ok_or_else(|| WalletError::BuildError("P2WSH input without witness script".into()))?;
            let mut items = vec![MAX_ECDSA_SIG_LEN];
            items.extend(info.extra_lens());
            items.push(ws.len());
            custom_input_weight(0, &items)
        }
        ScriptType::P2tr => match &info.tap_leaf {
            Some((leaf, cb)) => {
                let mut items = vec![tap_sig];
                items.extend(info.extra_lens());
                items.push(leaf.script().len());
                items.push(cb.size());
                custom_input_weight(0, &items)
            }
            None => custom_input_weight(0, &[tap_sig]),
        },
        ScriptType::OpReturn | ScriptType::NonStandard => {
            return Err(WalletError::BuildError(format!(
                "cannot spend non-standard script {prevout}"
            )));
        }
    };
    Ok(weight)
}

/// Bytes a minimal push of `len` bytes takes in a scriptSig.
fn push_len(len: usize) -> usize {
    match len {
        0..=75 => 1 + len,
        76..=0xff => 2 + len,
        0x100..=0xffff => 3 + len,
        _ => 5 + len,
    }
}

/// How the builder settles the fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeePolicy {
    #[default]
    Unset,
    /// Exactly this many sats.
    Fixed(u64),
    /// Estimated from the transaction weight.
    Rate(FeeRate),
}

#[derive(Debug, Clone)]
struct PendingInput {
    utxo: Utxo,
    info: SpendInfo,
}

/// Fluent transaction builder.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: Network,
    version: i32,
    lock_time: u32,
    rbf: bool,
    inputs: Vec<PendingInput>,
    outputs: Vec<TxOut>,
    change: Option<Script>,
    fee: FeePolicy,
    dust_relay_fee: u64,
    error: Option<WalletError>,
}

impl TransactionBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            version: DEFAULT_TX_VERSION,
            lock_time: 0,
            rbf: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            change: None,
            fee: FeePolicy::Unset,
            dust_relay_fee: DEFAULT_DUST_RELAY_FEE,
            error: None,
        }
    }

    fn record(&mut self, err: WalletError) {
        self.error.get_or_insert(err);
    }

    /// Spend `utxo` with the default satisfaction for its script type.
    pub fn add_input(&mut self, utxo: Utxo) -> &mut Self {
        self.add_input_with(utxo, SpendInfo::default())
    }

    pub fn add_input_with(&mut self, utxo: Utxo, info: SpendInfo) -> &mut Self {
        self.inputs.push(PendingInput { utxo, info });
        self
    }

    pub fn add_output(&mut self, address: &Address, amount: u64) -> &mut Self {
        if !address.is_valid_for_network(self.network) {
            self.record(WalletError::InvalidAddress(format!(
                "{address} is not a {} address",
                self.network
            )));
            return self;
        }
        self.add_output_script(address.script_pubkey(), amount)
    }

    pub fn add_output_script(&mut self, script_pubkey: Script, amount: u64) -> &mut Self {
        self.outputs.push(TxOut { value: amount, script_pubkey });
        self
    }

    /// Zero-value `OP_RETURN` output carrying `data`.
    pub fn add_op_return(&mut self, data: &[u8]) -> &mut Self {
        match Script::op_return(data) {
            Ok(script) => self.add_output_script(script, 0),
            Err(e) => {
                self.record(e.into());
                self
            }
        }
    }

    pub fn set_change(&mut self, address: &Address) -> &mut Self {
        if !address.is_valid_for_network(self.network) {
            self.record(WalletError::InvalidAddress(format!(
                "change {address} is not a {} address",
                self.network
            )));
            return self;
        }
        self.set_change_script(address.script_pubkey())
    }

    pub fn set_change_script(&mut self, script_pubkey: Script) -> &mut Self {
        self.change = Some(script_pubkey);
        self
    }

    /// Pay exactly `amount` sats in fees.
    pub fn fee(&mut self, amount: u64) -> &mut Self {
        self.fee = FeePolicy::Fixed(amount);
        self
    }

    /// Pay `rate` times the estimated virtual size.
    pub fn estimate_fee(&mut self, rate: FeeRate) -> &mut Self {
        self.fee = FeePolicy::Rate(rate);
        self
    }

    pub fn set_version(&mut self, version: i32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    /// Signal BIP125 replaceability on every input.
    pub fn enable_rbf(&mut self) -> &mut Self {
        self.rbf = true;
        self
    }

    /// Dust relay fee in sat/kvB for output and change thresholds.
    pub fn dust_relay_fee(&mut self, sat_per_kvb: u64) -> &mut Self {
        self.dust_relay_fee = sat_per_kvb;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn fee_policy(&self) -> FeePolicy {
        self.fee
    }

    /// Add inputs chosen from `utxos` to pay the outputs and fee.
    ///
    /// Requires a change destination and a fee policy, and no inputs added
    /// by hand. Change and fee are settled again by [`build`](Self::build).
    pub fn fund(&mut self, utxos: &[Utxo], strategy: SelectionStrategy) -> Result<&mut Self, WalletError> {
        let candidates: Vec<(Utxo, SpendInfo)> =
            utxos.iter().map(|u| (u.clone(), SpendInfo::default())).collect();
        self.fund_with(&candidates, strategy)
    }

    /// Like [`fund`](Self::fund), for candidates that need spend information
    /// (nested segwit, scripts). Selection uses each candidate's estimated
    /// input weight.
    pub fn fund_with(
        &mut self,
        candidates: &[(Utxo, SpendInfo)],
        strategy: SelectionStrategy,
    ) -> Result<&mut Self, WalletError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if !self.inputs.is_empty() {
            return Err(WalletError::BuildError("fund() selects all inputs; none may be added first".into()));
        }
        let change = self
            .change
            .clone()
            .ok_or_else(|| WalletError::BuildError("fund() needs a change destination".into()))?;
        let outputs_total = sum_values(self.outputs.iter().map(|o| o.value))?;
        let (rate, target) = match self.fee {
            FeePolicy::Rate(rate) => (rate, outputs_total),
            FeePolicy::Fixed(fee) => (
                FeeRate::ZERO,
                outputs_total.checked_add(fee).ok_or(TransactionError::ValueOverflow)?,
            ),
            FeePolicy::Unset => return Err(WalletError::BuildError("fund() needs a fee policy".into())),
        };
        let mut params = SelectionParams::new(rate, change)
            .with_outputs(&self.outputs)
            .with_dust_relay_fee(self.dust_relay_fee);
        if let FeePolicy::Fixed(_) = self.fee {
            // build() refuses a dust change under a fixed fee.
            params = params.without_dust_folding();
        }
        let mut infos = BTreeMap::new();
        let mut utxos = Vec::with_capacity(candidates.len());
        for (utxo, info) in candidates {
            if let Ok(weight) = estimate_input_weight(&utxo.script_pubkey, info) {
                params = params.with_input_weight(utxo.outpoint, weight);
            }
            infos.insert(utxo.outpoint, info);
            utxos.push(utxo.clone());
        }
        let selection = CoinSelector::select(&utxos, target, &params, strategy)?;
        for utxo in selection.selected {
            let info = infos.get(&utxo.outpoint).map(|i| (*i).clone()).unwrap_or_default();
            self.add_input_with(utxo, info);
        }
        Ok(self)
    }

    /// Validate and assemble the unsigned transaction.
    pub fn build(&self) -> Result<PartialTransaction, WalletError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.inputs.is_empty() {
            return Err(WalletError::BuildError("transaction has no inputs".into()));
        }
        if self.outputs.is_empty() && self.change.is_none() {
            return Err(WalletError::BuildError("transaction has no outputs".into()));
        }

        let mut seen = BTreeSet::new();
        for input in &self.inputs {
            if !seen.insert(input.utxo.outpoint) {
                return Err(WalletError::BuildError(format!(
                    "input {} added twice",
                    input.utxo.outpoint
                )));
            }
        }

        for (index, output) in self.outputs.iter().enumerate() {
            let threshold = dust_threshold(&output.script_pubkey, self.dust_relay_fee);
            if output.value < threshold {
                return Err(WalletError::DustOutput { index, amount: output.value, threshold });
            }
        }

        let in_total = sum_values(self.inputs.iter().map(|i| i.utxo.value))?;
        let out_total = sum_values(self.outputs.iter().map(|o| o.value))?;

        let mut input_weight = 0u64;
        let mut segwit = false;
        for input in &self.inputs {
            input_weight += estimate_input_weight(&input.utxo.script_pubkey, &input.info)?;
            segwit |= spends_with_witness(input.utxo.script_pubkey.script_type());
        }
        let outputs_weight: u64 = self.outputs.iter().map(|o| output_weight(&o.script_pubkey)).sum();
        let weight_without_change = tx_overhead_weight(self.inputs.len(), self.outputs.len(), segwit)
            + input_weight
            + outputs_weight;
        let weight_with_change = |change: &Script| {
            tx_overhead_weight(self.inputs.len(), self.outputs.len() + 1, segwit)
                + input_weight
                + outputs_weight
                + output_weight(change)
        };

        let (fee, change_value) = match self.fee {
            FeePolicy::Unset => {
                return Err(WalletError::BuildError("no fee policy: call fee() or estimate_fee()".into()));
            }
            FeePolicy::Fixed(fee) => {
                let need = out_total.checked_add(fee).ok_or(TransactionError::ValueOverflow)?;
                if in_total < need {
                    return Err(WalletError::InsufficientFunds { have: in_total, need });
                }
                let remainder = in_total - need;
                match (&self.change, remainder) {
                    (_, 0) => (fee, None),
                    (Some(change), rest) => {
                        let threshold = dust_threshold(change, self.dust_relay_fee);
                        if rest < threshold {
                            return Err(WalletError::DustOutput {
                                index: self.outputs.len(),
                                amount: rest,
                                threshold,
                            });
                        }
                        (fee, Some(rest))
                    }
                    (None, rest) => {
                        return Err(WalletError::BuildError(format!(
                            "inputs exceed outputs plus fee by {rest} sats and no change is set"
                        )));
                    }
                }
            }
            FeePolicy::Rate(rate) => {
                let min_fee = rate.fee_for_weight(weight_without_change);
                let need = out_total.checked_add(min_fee).ok_or(TransactionError::ValueOverflow)?;
                if in_total < need {
                    return Err(WalletError::InsufficientFunds { have: in_total, need });
                }
                let surplus = in_total - out_total;
                match &self.change {
                    Some(change) => {
                        let fee_with_change = rate.fee_for_weight(weight_with_change(change));
                        let value = surplus.saturating_sub(fee_with_change);
                        if surplus > fee_with_change && value >= dust_threshold(change, self.dust_relay_fee) {
                            (fee_with_change, Some(value))
                        } else {
                            debug!(surplus, "change below dust threshold, dropped into fee");
                            (surplus, None)
                        }
                    }
                    None => {
                        let excess = surplus - min_fee;
                        if excess >= self.min_change_dust() {
                            return Err(WalletError::BuildError(format!(
                                "inputs exceed outputs plus fee by {excess} sats and no change is set"
                            )));
                        }
                        if excess > 0 {
                            debug!(excess, "remainder below dust threshold, added to fee");
                        }
                        (surplus, None)
                    }
                }
            }
        };

        let mut outputs = self.outputs.clone();
        let change_index = match (change_value, &self.change) {
            (Some(value), Some(script)) => {
                outputs.push(TxOut { value, script_pubkey: script.clone() });
                Some(outputs.len() - 1)
            }
            _ => None,
        };
        if outputs.is_empty() {
            return Err(WalletError::BuildError("transaction has no outputs".into()));
        }

        let estimated_weight = match (change_index, &self.change) {
            (Some(_), Some(change)) => weight_with_change(change),
            _ => weight_without_change,
        };
        if estimated_weight > MAX_STANDARD_TX_WEIGHT {
            return Err(WalletError::BuildError(format!(
                "estimated weight {estimated_weight} exceeds the standard limit {MAX_STANDARD_TX_WEIGHT}"
            )));
        }

        let sequence = if self.rbf {
            SEQUENCE_RBF
        } else if self.lock_time != 0 {
            SEQUENCE_ENABLE_LOCKTIME
        } else {
            SEQUENCE_FINAL
        };
        let tx = Transaction {
            version: self.version,
            inputs: self
                .inputs
                .iter()
                .map(|i| TxIn { sequence, ..TxIn::new(i.utxo.outpoint) })
                .collect(),
            outputs,
            lock_time: self.lock_time,
        };

        info!(
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len(),
            fee,
            estimated_weight,
            "transaction built"
        );

        Ok(PartialTransaction {
            tx,
            prevouts: self.inputs.iter().map(|i| i.utxo.txout()).collect(),
            spend_info: self.inputs.iter().map(|i| i.info.clone()).collect(),
            fee,
            change_index,
            estimated_weight,
        })
    }

    /// Dust threshold of the smallest standard change output (P2WPKH).
    /// A remainder at or above it must go to a change output.
    fn min_change_dust(&self) -> u64 {
        dust_threshold(&Script::p2wpkh(&[0; 20]), self.dust_relay_fee)
    }

    /// Build, then sign with software keys.
    pub fn sign(&self, signer: &Signer, keys: &dyn KeySource) -> Result<SignedTransaction, WalletError> {
        signer.sign(self.build()?, keys)
    }
}

fn sum_values(mut values: impl Iterator<Item = u64>) -> Result<u64, WalletError> {
    values
        .try_fold(0u64, |acc, v| acc.checked_add(v))
        .ok_or_else(|| TransactionError::ValueOverflow.into())
}

/// A validated, unsigned transaction plus what signing needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialTransaction {
    tx: Transaction,
    prevouts: Vec<TxOut>,
    spend_info: Vec<SpendInfo>,
    fee: u64,
    change_index: Option<usize>,
    estimated_weight: u64,
}

impl PartialTransaction {
    /// The transaction with empty scriptSigs and witnesses.
    pub fn unsigned_tx(&self) -> &Transaction {
        &self.tx
    }

    /// Spent outputs, one per input.
    pub fn prevouts(&self) -> &[TxOut] {
        &self.prevouts
    }

    pub fn spend_info(&self) -> &[SpendInfo] {
        &self.spend_info
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn change_index(&self) -> Option<usize> {
        self.change_index
    }

    /// Weight estimated from the spend shapes, before signing.
    pub fn estimated_weight(&self) -> u64 {
        self.estimated_weight
    }

    pub fn outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.tx.inputs.iter().map(|i| i.previous_output)
    }

    pub(crate) fn into_parts(self) -> (Transaction, Vec<TxOut>, Vec<SpendInfo>, u64) {
        (self.tx, self.prevouts, self.spend_info, self.fee)
    }
}

/// `<data>...` pushes as one script.
pub(crate) fn push_script<'a>(items: impl IntoIterator<Item = &'a [u8]>) -> Result<Script, WalletError> {
    let mut b = ScriptBuilder::new();
    for item in items {
        b.push_bytes(item);
    }
    Ok(b.finalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapforge_core::fee::default_dust_threshold;

    fn utxo(n: u8, value: u64, script: Script) -> Utxo {
        Utxo::new(OutPoint::new(Hash256([n; 32]), n as u32), value, script).unwrap()
    }

    fn wpkh(n: u8) -> Script {
        Script::p2wpkh(&[n; 20])
    }

    fn addr(n: u8) -> Address {
        Address::from_script(&wpkh(n), Network::Mainnet).unwrap()
    }

    #[test]
    fn fixed_fee_exact() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, Script::p2pkh(&[1; 20])))
            .add_output(&addr(2), 99_500)
            .fee(500);
        let p = b.build().unwrap();
        assert_eq!(p.fee(), 500);
        assert_eq!(p.change_index(), None);
        assert_eq!(p.unsigned_tx().outputs.len(), 1);
        assert_eq!(p.unsigned_tx().version, 2);
        assert_eq!(p.unsigned_tx().inputs[0].sequence, SEQUENCE_FINAL);
    }

    #[test]
    fn fixed_fee_remainder_goes_to_change() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1)))
            .add_output(&addr(2), 60_000)
            .set_change(&addr(3))
            .fee(1_000);
        let p = b.build().unwrap();
        let idx = p.change_index().unwrap();
        assert_eq!(p.unsigned_tx().outputs[idx].value, 39_000);
        let out: u64 = p.unsigned_tx().outputs.iter().map(|o| o.value).sum();
        assert_eq!(out + p.fee(), 100_000);
    }

    #[test]
    fn fixed_fee_remainder_without_change_fails() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1))).add_output(&addr(2), 60_000).fee(1_000);
        assert!(matches!(b.build(), Err(WalletError::BuildError(_))));
    }

    #[test]
    fn fixed_fee_insufficient() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 10_000, wpkh(1))).add_output(&addr(2), 9_800).fee(500);
        assert_eq!(b.build().unwrap_err(), WalletError::InsufficientFunds { have: 10_000, need: 10_300 });
    }

    #[test]
    fn rate_fee_with_change() {
        let rate = FeeRate::from_sat_per_vb(10);
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1)))
            .add_output(&addr(2), 50_000)
            .set_change(&addr(3))
            .estimate_fee(rate);
        let p = b.build().unwrap();
        assert_eq!(p.fee(), rate.fee_for_weight(p.estimated_weight()));
        // 10 + 0.5 + 68 + 2 * 31 vB, rounded up.
        assert_eq!(p.fee(), 1_410);
        let idx = p.change_index().unwrap();
        assert_eq!(p.unsigned_tx().outputs[idx].value, 100_000 - 50_000 - 1_410);
    }

    #[test]
    fn rate_fee_dust_change_dropped() {
        let rate = FeeRate::from_sat_per_vb(1);
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 50_300, wpkh(1)))
            .add_output(&addr(2), 50_000)
            .set_change(&addr(3))
            .estimate_fee(rate);
        let p = b.build().unwrap();
        assert_eq!(p.change_index(), None);
        assert_eq!(p.fee(), 300);
    }

    #[test]
    fn rate_fee_without_change_refuses_large_surplus() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 1_000_000, wpkh(1)))
            .add_output(&addr(2), 10_000)
            .estimate_fee(FeeRate::from_sat_per_vb(1));
        let err = b.build().unwrap_err();
        assert!(matches!(err, WalletError::BuildError(ref m) if m.contains("no change")), "{err:?}");
    }

    #[test]
    fn rate_fee_without_change_absorbs_dust_remainder() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 50_300, wpkh(1)))
            .add_output(&addr(2), 50_000)
            .estimate_fee(FeeRate::from_sat_per_vb(1));
        let p = b.build().unwrap();
        assert_eq!(p.change_index(), None);
        assert_eq!(p.fee(), 300);
        assert!(p.fee() - FeeRate::from_sat_per_vb(1).fee_for_weight(p.estimated_weight()) < 294);
    }

    #[test]
    fn dust_output_rejected() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1)))
            .add_output(&addr(2), 99_000)
            .add_output(&addr(3), 100)
            .fee(900);
        assert_eq!(
            b.build().unwrap_err(),
            WalletError::DustOutput { index: 1, amount: 100, threshold: default_dust_threshold(&wpkh(3)) }
        );
    }

    #[test]
    fn op_return_exempt_from_dust() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1)))
            .add_output(&addr(2), 99_000)
            .add_op_return(b"tapforge")
            .fee(1_000);
        let p = b.build().unwrap();
        assert!(p.unsigned_tx().outputs[1].script_pubkey.is_op_return());
    }

    #[test]
    fn needs_inputs_outputs_and_fee() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_output(&addr(2), 10_000).fee(100);
        assert!(matches!(b.build(), Err(WalletError::BuildError(_))));

        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1))).fee(100);
        assert!(matches!(b.build(), Err(WalletError::BuildError(_))));

        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1))).add_output(&addr(2), 10_000);
        assert!(matches!(b.build(), Err(WalletError::BuildError(_))));
    }

    #[test]
    fn duplicate_input_rejected() {
        let u = utxo(1, 100_000, wpkh(1));
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(u.clone()).add_input(u).add_output(&addr(2), 10_000).fee(190_000);
        let err = b.build().unwrap_err();
        assert!(matches!(err, WalletError::BuildError(ref m) if m.contains("twice")), "{err:?}");
    }

    #[test]
    fn wrong_network_address_recorded() {
        let testnet = Address::from_script(&wpkh(2), Network::Testnet).unwrap();
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1))).add_output(&testnet, 10_000).fee(90_000);
        assert!(matches!(b.build(), Err(WalletError::InvalidAddress(_))));
    }

    #[test]
    fn rbf_and_locktime_sequences() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_input(utxo(1, 100_000, wpkh(1)))
            .add_output(&addr(2), 99_000)
            .fee(1_000)
            .set_lock_time(800_000);
        assert_eq!(b.build().unwrap().unsigned_tx().inputs[0].sequence, 0xffff_fffe);
        b.enable_rbf().set_version(1);
        let p = b.build().unwrap();
        assert_eq!(p.unsigned_tx().inputs[0].sequence, SEQUENCE_RBF);
        assert_eq!(p.unsigned_tx().version, 1);
        assert_eq!(p.unsigned_tx().lock_time, 800_000);
    }

    #[test]
    fn fund_selects_inputs() {
        let pool = vec![utxo(1, 30_000, wpkh(1)), utxo(2, 80_000, wpkh(2)), utxo(3, 5_000, wpkh(3))];
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_output(&addr(9), 50_000)
            .set_change(&addr(8))
            .estimate_fee(FeeRate::from_sat_per_vb(2));
        b.fund(&pool, SelectionStrategy::LargestFirst).unwrap();
        let p = b.build().unwrap();
        assert_eq!(p.prevouts().len(), 1);
        assert_eq!(p.prevouts()[0].value, 80_000);
        let out: u64 = p.unsigned_tx().outputs.iter().map(|o| o.value).sum();
        assert_eq!(out + p.fee(), 80_000);
    }

    #[test]
    fn fixed_fee_fund_skips_dust_change() {
        // 10,600 alone would leave 100 sats of change, below the dust threshold.
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_output(&addr(9), 10_000).set_change(&addr(8)).fee(500);
        assert_eq!(
            b.fund(&[utxo(1, 10_600, wpkh(1))], SelectionStrategy::LargestFirst).unwrap_err(),
            WalletError::InsufficientFunds { have: 10_600, need: 10_500 + default_dust_threshold(&wpkh(8)) }
        );

        let pool = vec![utxo(1, 10_600, wpkh(1)), utxo(2, 5_000, wpkh(2))];
        for strategy in [SelectionStrategy::LargestFirst, SelectionStrategy::BranchAndBound] {
            let mut b = TransactionBuilder::new(Network::Mainnet);
            b.add_output(&addr(9), 10_000).set_change(&addr(8)).fee(500);
            b.fund(&pool, strategy).unwrap();
            let p = b.build().unwrap();
            assert_eq!(p.prevouts().len(), 2);
            assert_eq!(p.fee(), 500);
            assert_eq!(p.unsigned_tx().outputs[p.change_index().unwrap()].value, 5_100);
        }
    }

    #[test]
    fn fixed_fee_fund_exact_match_is_changeless() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_output(&addr(9), 10_000).set_change(&addr(8)).fee(500);
        b.fund(&[utxo(1, 10_500, wpkh(1)), utxo(2, 40_000, wpkh(2))], SelectionStrategy::BranchAndBound)
            .unwrap();
        let p = b.build().unwrap();
        assert_eq!(p.prevouts()[0].value, 10_500);
        assert_eq!(p.change_index(), None);
    }

    #[test]
    fn fund_requires_change() {
        let mut b = TransactionBuilder::new(Network::Mainnet);
        b.add_output(&addr(9), 50_000).estimate_fee(FeeRate::MIN_RELAY);
        assert!(matches!(
            b.fund(&[utxo(1, 90_000, wpkh(1))], SelectionStrategy::LargestFirst),
            Err(WalletError::BuildError(_))
        ));
    }

    #[test]
    fn input_weight_estimates() {
        let info = SpendInfo::default();
        assert_eq!(estimate_input_weight(&wpkh(1), &info).unwrap(), P2WPKH_INPUT_WEIGHT);
        assert_eq!(estimate_input_weight(&Script::p2tr(&[1; 32]), &info).unwrap(), 230);
        let sighash_all = info.clone().with_tap_sighash(TapSighashType::All);
        assert_eq!(estimate_input_weight(&Script::p2tr(&[1; 32]), &sighash_all).unwrap(), 231);
        assert!(estimate_input_weight(&Script::p2sh(&[1; 20]), &info).is_err());
        let nested = SpendInfo::p2sh(wpkh(1));
        assert_eq!(
            estimate_input_weight(&Script::p2sh(&[1; 20]), &nested).unwrap(),
            P2SH_P2WPKH_INPUT_WEIGHT
        );
    }
}
