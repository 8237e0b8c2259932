//! Fee rates, weight estimates and dust thresholds.
//!
//! Weights are in weight units (WU); one virtual byte is four WU. Input
//! estimates assume a 72-byte DER signature plus sighash byte and a
//! compressed public key, which is the worst case for low-S ECDSA.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{DEFAULT_DUST_RELAY_FEE, WITNESS_SCALE_FACTOR, btc_to_sat};
use crate::encode::compact_size_len;
use crate::script::{Script, ScriptType};

/// Outpoint (36) + sequence (4).
const INPUT_FIXED_BYTES: u64 = 40;

/// P2PKH input: scriptSig `<sig> <pubkey>`, no witness.
pub const P2PKH_INPUT_WEIGHT: u64 = 148 * WITNESS_SCALE_FACTOR;
/// P2SH-P2WPKH input: 23-byte redeem push in scriptSig plus P2WPKH witness.
pub const P2SH_P2WPKH_INPUT_WEIGHT: u64 = 91 * WITNESS_SCALE_FACTOR;
/// Native P2WPKH input.
pub const P2WPKH_INPUT_WEIGHT: u64 = 68 * WITNESS_SCALE_FACTOR;
/// P2TR key-path input with a 64-byte Schnorr signature (57.5 vB).
pub const P2TR_KEYPATH_INPUT_WEIGHT: u64 = 230;
/// P2WSH input spending a `<pubkey> OP_CHECKSIG` witness script.
pub const P2WSH_SINGLE_SIG_INPUT_WEIGHT: u64 = 274;

/// Fee rate in satoshis per 1000 virtual bytes.
///
/// # Examples
///
/// ```
/// use tapforge_core::fee::FeeRate;
/// let rate = FeeRate::from_sat_per_vb(5);
/// assert_eq!(rate.fee_for_vsize(141), 705);
/// assert_eq!(rate.fee_for_weight(561), 705);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FeeRate {
    sat_per_kvb: u64,
}

impl FeeRate {
    pub const ZERO: Self = Self { sat_per_kvb: 0 };
    /// Default minimum relay fee (1 sat/vB).
    pub const MIN_RELAY: Self = Self { sat_per_kvb: 1_000 };

    pub const fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        Self { sat_per_kvb }
    }

    pub const fn from_sat_per_vb(sat_per_vb: u64) -> Self {
        Self { sat_per_kvb: sat_per_vb.saturating_mul(1_000) }
    }

    /// Convert a node's `estimatesmartfee` answer (BTC/kvB).
    pub fn from_btc_per_kvb(btc: f64) -> Option<Self> {
        btc_to_sat(btc).map(Self::from_sat_per_kvb)
    }

    pub const fn sat_per_kvb(&self) -> u64 {
        self.sat_per_kvb
    }

    /// Fee for `vsize` virtual bytes, rounded up.
    pub fn fee_for_vsize(&self, vsize: u64) -> u64 {
        let product = (self.sat_per_kvb as u128) * (vsize as u128);
        let fee = product.div_ceil(1_000);
        u64::try_from(fee).unwrap_or(u64::MAX)
    }

    /// Fee for `weight` WU, charging whole virtual bytes.
    pub fn fee_for_weight(&self, weight: u64) -> u64 {
        self.fee_for_vsize(weight.div_ceil(WITNESS_SCALE_FACTOR))
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} sat/vB", self.sat_per_kvb / 1_000, self.sat_per_kvb % 1_000)
    }
}

/// Estimated weight of an input spending `script_type`.
///
/// P2SH is assumed to wrap P2WPKH and P2WSH a single-key script; callers
/// spending other shapes use [`custom_input_weight`]. Returns `None` for
/// outputs that cannot be spent (OP_RETURN) or have no fixed shape.
pub fn input_weight(script_type: ScriptType) -> Option<u64> {
    match script_type {
        ScriptType::P2pkh => Some(P2PKH_INPUT_WEIGHT),
        ScriptType::P2sh => Some(P2SH_P2WPKH_INPUT_WEIGHT),
        ScriptType::P2wpkh => Some(P2WPKH_INPUT_WEIGHT),
        ScriptType::P2wsh => Some(P2WSH_SINGLE_SIG_INPUT_WEIGHT),
        ScriptType::P2tr => Some(P2TR_KEYPATH_INPUT_WEIGHT),
        ScriptType::OpReturn | ScriptType::NonStandard => None,
    }
}

/// Weight of an input with the given scriptSig length and witness item sizes.
///
/// ```
/// use tapforge_core::fee::{custom_input_weight, P2WPKH_INPUT_WEIGHT};
/// assert_eq!(custom_input_weight(0, &[72, 33]), P2WPKH_INPUT_WEIGHT);
/// ```
pub fn custom_input_weight(script_sig_len: usize, witness_items: &[usize]) -> u64 {
    let base = INPUT_FIXED_BYTES
        + compact_size_len(script_sig_len as u64) as u64
        + script_sig_len as u64;
    let witness: u64 = if witness_items.is_empty() {
        0
    } else {
        compact_size_len(witness_items.len() as u64) as u64
            + witness_items
                .iter()
                .map(|&len| compact_size_len(len as u64) as u64 + len as u64)
                .sum::<u64>()
    };
    base * WITNESS_SCALE_FACTOR + witness
}

/// Weight of an output paying to `script`.
pub fn output_weight(script: &Script) -> u64 {
    let len = script.len() as u64;
    (8 + compact_size_len(len) as u64 + len) * WITNESS_SCALE_FACTOR
}

/// Weight of version, locktime and the input/output counts, plus the
/// two segwit marker bytes when `segwit` is set.
pub fn tx_overhead_weight(inputs: usize, outputs: usize, segwit: bool) -> u64 {
    let base = 8 + compact_size_len(inputs as u64) as u64 + compact_size_len(outputs as u64) as u64;
    base * WITNESS_SCALE_FACTOR + if segwit { 2 } else { 0 }
}

/// Whether spending an output of this type needs witness data.
pub fn spends_with_witness(script_type: ScriptType) -> bool {
    matches!(
        script_type,
        ScriptType::P2sh | ScriptType::P2wpkh | ScriptType::P2wsh | ScriptType::P2tr
    )
}

/// Smallest output value relayed for `script` at `dust_relay_fee` sat/kvB.
///
/// Matches the reference relay policy: the output size plus the size of
/// the input that would later spend it (148 bytes, or 67 vbytes for witness
/// programs), priced at the dust relay fee. Unspendable outputs have no
/// threshold.
///
/// ```
/// use tapforge_core::fee::dust_threshold;
/// use tapforge_core::script::Script;
/// assert_eq!(dust_threshold(&Script::p2pkh(&[0; 20]), 3_000), 546);
/// assert_eq!(dust_threshold(&Script::p2wpkh(&[0; 20]), 3_000), 294);
/// assert_eq!(dust_threshold(&Script::p2tr(&[0; 32]), 3_000), 330);
/// ```
pub fn dust_threshold(script: &Script, dust_relay_fee: u64) -> u64 {
    if script.is_op_return() {
        return 0;
    }
    let out_len = script.len() as u64 + compact_size_len(script.len() as u64) as u64 + 8;
    let spend_len = if script.witness_program().is_some() { 67 } else { 148 };
    FeeRate::from_sat_per_kvb(dust_relay_fee).fee_for_vsize(out_len + spend_len)
}

/// [`dust_threshold`] at the default dust relay fee.
pub fn default_dust_threshold(script: &Script) -> u64 {
    dust_threshold(script, DEFAULT_DUST_RELAY_FEE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rounds_up() {
        let rate = FeeRate::from_sat_per_kvb(1_500);
        assert_eq!(rate.fee_for_vsize(1), 2);
        assert_eq!(rate.fee_for_vsize(2), 3);
        assert_eq!(FeeRate::ZERO.fee_for_vsize(1_000), 0);
        // 230 WU is 57.5 vB, charged as 58
        assert_eq!(FeeRate::from_sat_per_vb(2).fee_for_weight(230), 116);
    }

    #[test]
    fn fee_does_not_overflow() {
        let rate = FeeRate::from_sat_per_kvb(u64::MAX);
        assert_eq!(rate.fee_for_vsize(u64::MAX), u64::MAX);
    }

    #[test]
    fn btc_per_kvb_boundary() {
        assert_eq!(FeeRate::from_btc_per_kvb(0.00012).unwrap().sat_per_kvb(), 12_000);
        assert!(FeeRate::from_btc_per_kvb(-1.0).is_none());
    }

    #[test]
    fn display() {
        assert_eq!(FeeRate::from_sat_per_kvb(1_250).to_string(), "1.250 sat/vB");
    }

    #[test]
    fn fixed_input_weights_match_shapes() {
        // P2WPKH: empty scriptSig, witness [sig, pubkey]
        assert_eq!(custom_input_weight(0, &[72, 33]), P2WPKH_INPUT_WEIGHT);
        // P2TR key path: witness [schnorr sig]
        assert_eq!(custom_input_weight(0, &[64]), P2TR_KEYPATH_INPUT_WEIGHT);
        // P2WSH `<pk> OP_CHECKSIG`: witness [sig, script]
        assert_eq!(custom_input_weight(0, &[72, 35]), P2WSH_SINGLE_SIG_INPUT_WEIGHT);
        // P2PKH: scriptSig push(72) + push(33), no witness
        assert_eq!(custom_input_weight(107, &[]), P2PKH_INPUT_WEIGHT);
    }

    #[test]
    fn output_and_overhead_weights() {
        assert_eq!(output_weight(&Script::p2wpkh(&[0; 20])), 31 * 4);
        assert_eq!(output_weight(&Script::p2tr(&[0; 32])), 43 * 4);
        assert_eq!(tx_overhead_weight(1, 2, false), 40);
        assert_eq!(tx_overhead_weight(1, 2, true), 42);
        assert_eq!(tx_overhead_weight(300, 1, false), 48);
    }

    #[test]
    fn dust_thresholds() {
        assert_eq!(default_dust_threshold(&Script::p2sh(&[0; 20])), 540);
        assert_eq!(default_dust_threshold(&Script::p2wsh(&[0; 32])), 330);
        assert_eq!(default_dust_threshold(&Script::op_return(b"hi").unwrap()), 0);
        assert_eq!(dust_threshold(&Script::p2wpkh(&[0; 20]), 0), 0);
    }

    #[test]
    fn input_weight_by_type() {
        assert_eq!(input_weight(ScriptType::P2pkh), Some(592));
        assert_eq!(input_weight(ScriptType::P2sh), Some(364));
        assert_eq!(input_weight(ScriptType::OpReturn), None);
        assert!(spends_with_witness(ScriptType::P2tr));
        assert!(!spends_with_witness(ScriptType::P2pkh));
    }
}
