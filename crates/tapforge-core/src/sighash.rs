//! Signature hash computation.
//!
//! Three algorithms are supported:
//! - legacy (pre-segwit) with the original SIGHASH_SINGLE quirk,
//! - BIP143 for segwit v0 inputs,
//! - BIP341 for Taproot key-path and script-path inputs (epoch 0, no annex).
//!
//! [`SighashCache`] computes the per-transaction midstate hashes once and
//! reuses them across inputs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::encode::{Encodable, write_var_bytes};
use crate::error::SighashError;
use crate::hashes::{sha256d, tagged_hash};
use crate::script::{Script, opcodes};
use crate::types::{Hash256, Transaction, TxOut};

const ANYONECANPAY: u32 = 0x80;

/// Hash returned by legacy SIGHASH_SINGLE when the input has no matching output.
const SIGHASH_SINGLE_BUG: Hash256 = {
    let mut one = [0u8; 32];
    one[0] = 1;
    Hash256(one)
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseType {
    All,
    None,
    Single,
}

/// Sighash flags for ECDSA signatures (legacy and segwit v0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EcdsaSighashType {
    #[default]
    All,
    None,
    Single,
    AllPlusAnyoneCanPay,
    NonePlusAnyoneCanPay,
    SinglePlusAnyoneCanPay,
}

impl EcdsaSighashType {
    pub fn to_u32(self) -> u32 {
        match self {
            Self::All => 0x01,
            Self::None => 0x02,
            Self::Single => 0x03,
            Self::AllPlusAnyoneCanPay => 0x81,
            Self::NonePlusAnyoneCanPay => 0x82,
            Self::SinglePlusAnyoneCanPay => 0x83,
        }
    }

    /// Parse one of the six standard flag values.
    pub fn from_standard(n: u32) -> Result<Self, SighashError> {
        Ok(match n {
            0x01 => Self::All,
            0x02 => Self::None,
            0x03 => Self::Single,
            0x81 => Self::AllPlusAnyoneCanPay,
            0x82 => Self::NonePlusAnyoneCanPay,
            0x83 => Self::SinglePlusAnyoneCanPay,
            other => return Err(SighashError::InvalidSighashType(other)),
        })
    }

    pub fn anyone_can_pay(self) -> bool {
        self.to_u32() & ANYONECANPAY != 0
    }

    fn base(self) -> BaseType {
        match self.to_u32() & 0x1f {
            0x02 => BaseType::None,
            0x03 => BaseType::Single,
            _ => BaseType::All,
        }
    }
}

impl fmt::Display for EcdsaSighashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "ALL",
            Self::None => "NONE",
            Self::Single => "SINGLE",
            Self::AllPlusAnyoneCanPay => "ALL|ANYONECANPAY",
            Self::NonePlusAnyoneCanPay => "NONE|ANYONECANPAY",
            Self::SinglePlusAnyoneCanPay => "SINGLE|ANYONECANPAY",
        })
    }
}

/// Sighash flags for Schnorr signatures (BIP341).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TapSighashType {
    /// Commits like `All` but omits the trailing sighash byte from the signature.
    #[default]
    Default,
    All,
    None,
    Single,
    AllPlusAnyoneCanPay,
    NonePlusAnyoneCanPay,
    SinglePlusAnyoneCanPay,
}

impl TapSighashType {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Default => 0x00,
            Self::All => 0x01,
            Self::None => 0x02,
            Self::Single => 0x03,
            Self::AllPlusAnyoneCanPay => 0x81,
            Self::NonePlusAnyoneCanPay => 0x82,
            Self::SinglePlusAnyoneCanPay => 0x83,
        }
    }

    pub fn from_u8(n: u8) -> Result<Self, SighashError> {
        Ok(match n {
            0x00 => Self::Default,
            0x01 => Self::All,
            0x02 => Self::None,
            0x03 => Self::Single,
            0x81 => Self::AllPlusAnyoneCanPay,
            0x82 => Self::NonePlusAnyoneCanPay,
            0x83 => Self::SinglePlusAnyoneCanPay,
            other => return Err(SighashError::InvalidSighashType(other as u32)),
        })
    }

    pub fn anyone_can_pay(self) -> bool {
        self.to_u8() & 0x80 != 0
    }

    /// Length of a Schnorr signature carrying this flag: 64 for `Default`, 65 otherwise.
    pub fn signature_len(self) -> usize {
        if self == Self::Default { 64 } else { 65 }
    }

    fn base(self) -> BaseType {
        match self.to_u8() & 0x03 {
            0x02 => BaseType::None,
            0x03 => BaseType::Single,
            _ => BaseType::All,
        }
    }
}

/// Per-transaction hashes shared by every input's sighash.
#[derive(Debug, Clone)]
struct SegwitV0Midstate {
    prevouts: [u8; 32],
    sequences: [u8; 32],
    outputs: [u8; 32],
}

#[derive(Debug, Clone)]
struct TaprootMidstate {
    prevouts: [u8; 32],
    amounts: [u8; 32],
    script_pubkeys: [u8; 32],
    sequences: [u8; 32],
    outputs: [u8; 32],
}

/// Computes signature hashes for the inputs of one transaction.
///
/// # Examples
///
/// ```
/// use tapforge_core::sighash::{EcdsaSighashType, SighashCache};
/// use tapforge_core::script::Script;
/// use tapforge_core::types::{Hash256, OutPoint, Transaction, TxIn, TxOut};
///
/// let tx = Transaction {
///     version: 2,
///     inputs: vec![TxIn::new(OutPoint::new(Hash256([7; 32]), 0))],
///     outputs: vec![TxOut { value: 1_000, script_pubkey: Script::p2wpkh(&[1; 20]) }],
///     lock_time: 0,
/// };
/// let mut cache = SighashCache::new(&tx);
/// let code = Script::p2pkh(&[2; 20]);
/// let a = cache.segwit_v0_signature_hash(0, &code, 5_000, EcdsaSighashType::All).unwrap();
/// let b = cache.segwit_v0_signature_hash(0, &code, 5_001, EcdsaSighashType::All).unwrap();
/// assert_ne!(a, b);
/// ```
#[derive(Debug)]
pub struct SighashCache<'a> {
    tx: &'a Transaction,
    segwit: Option<SegwitV0Midstate>,
    taproot: Option<TaprootMidstate>,
}

impl<'a> SighashCache<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        Self { tx, segwit: None, taproot: None }
    }

    pub fn transaction(&self) -> &'a Transaction {
        self.tx
    }

    fn check_index(&self, index: usize) -> Result<(), SighashError> {
        if index >= self.tx.inputs.len() {
            return Err(SighashError::InputIndexOutOfBounds { index, len: self.tx.inputs.len() });
        }
        Ok(())
    }

    /// Pre-segwit signature hash.
    ///
    /// `script_code` is the script being satisfied (the scriptPubKey, or the
    /// redeem script for P2SH); `OP_CODESEPARATOR`s are removed from it.
    /// SIGHASH_SINGLE without a matching output yields the value 1.
    pub fn legacy_signature_hash(
        &self,
        index: usize,
        script_code: &Script,
        sighash_type: EcdsaSighashType,
    ) -> Result<Hash256, SighashError> {
        self.check_index(index)?;
        let tx = self.tx;
        let base = sighash_type.base();
        if base == BaseType::Single && index >= tx.outputs.len() {
            return Ok(SIGHASH_SINGLE_BUG);
        }

        let mut copy = Transaction {
            version: tx.version,
            inputs: Vec::with_capacity(tx.inputs.len()),
            outputs: Vec::new(),
            lock_time: tx.lock_time,
        };
        let code = strip_code_separators(script_code);
        for (i, input) in tx.inputs.iter().enumerate() {
            if sighash_type.anyone_can_pay() && i != index {
                continue;
            }
            let mut input = input.clone();
            input.witness.clear();
            if i == index {
                input.script_sig = code.clone();
            } else {
                input.script_sig = Script::new();
                if base != BaseType::All {
                    input.sequence = 0;
                }
            }
            copy.inputs.push(input);
        }
        copy.outputs = match base {
            BaseType::All => tx.outputs.clone(),
            BaseType::None => Vec::new(),
            BaseType::Single => {
                let mut outs: Vec<TxOut> = (0..index)
                    .map(|_| TxOut { value: u64::MAX, script_pubkey: Script::new() })
                    .collect();
                outs.push(tx.outputs[index].clone());
                outs
            }
        };

        let mut buf = Vec::with_capacity(copy.base_size() + 4);
        copy.encode_legacy(&mut buf);
        buf.extend_from_slice(&sighash_type.to_u32().to_le_bytes());
        Ok(Hash256(sha256d(&buf)))
    }

    fn segwit_midstate(&mut self) -> &SegwitV0Midstate {
        let tx = self.tx;
        self.segwit.get_or_insert_with(|| {
            let mut prevouts = Vec::with_capacity(36 * tx.inputs.len());
            let mut sequences = Vec::with_capacity(4 * tx.inputs.len());
            for input in &tx.inputs {
                input.previous_output.consensus_encode(&mut prevouts);
                sequences.extend_from_slice(&input.sequence.to_le_bytes());
            }
            let mut outputs = Vec::new();
            for output in &tx.outputs {
                output.consensus_encode(&mut outputs);
            }
            SegwitV0Midstate {
                prevouts: sha256d(&prevouts),
                sequences: sha256d(&sequences),
                outputs: sha256d(&outputs),
            }
        })
    }

    /// BIP143 preimage, before double hashing.
    pub fn segwit_v0_preimage(
        &mut self,
        index: usize,
        script_code: &Script,
        value: u64,
        sighash_type: EcdsaSighashType,
    ) -> Result<Vec<u8>, SighashError> {
        self.check_index(index)?;
        let tx = self.tx;
        let acp = sighash_type.anyone_can_pay();
        let base = sighash_type.base();
        let mid = self.segwit_midstate().clone();

        let zero = [0u8; 32];
        let hash_prevouts = if acp { zero } else { mid.prevouts };
        let hash_sequence = if acp || base != BaseType::All { zero } else { mid.sequences };
        let hash_outputs = match base {
            BaseType::All => mid.outputs,
            BaseType::Single if index < tx.outputs.len() => {
                let mut out = Vec::new();
                tx.outputs[index].consensus_encode(&mut out);
                sha256d(&out)
            }
            _ => zero,
        };

        let input = &tx.inputs[index];
        let mut buf = Vec::with_capacity(160 + script_code.len());
        buf.extend_from_slice(&tx.version.to_le_bytes());
        buf.extend_from_slice(&hash_prevouts);
        buf.extend_from_slice(&hash_sequence);
        input.previous_output.consensus_encode(&mut buf);
        write_var_bytes(&mut buf, script_code.as_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
        buf.extend_from_slice(&input.sequence.to_le_bytes());
        buf.extend_from_slice(&hash_outputs);
        buf.extend_from_slice(&tx.lock_time.to_le_bytes());
        buf.extend_from_slice(&sighash_type.to_u32().to_le_bytes());
        Ok(buf)
    }

    /// BIP143 signature hash for a segwit v0 input spending `value` sats.
    ///
    /// For P2WPKH the script code is the P2PKH script of the key hash; for
    /// P2WSH it is the witness script.
    pub fn segwit_v0_signature_hash(
        &mut self,
        index: usize,
        script_code: &Script,
        value: u64,
        sighash_type: EcdsaSighashType,
    ) -> Result<Hash256, SighashError> {
        let preimage = self.segwit_v0_preimage(index, script_code, value, sighash_type)?;
        Ok(Hash256(sha256d(&preimage)))
    }

    fn taproot_midstate(&mut self, prevouts: &[TxOut]) -> &TaprootMidstate {
        let tx = self.tx;
        self.taproot.get_or_insert_with(|| {
            let mut outpoints = Sha256::new();
            let mut sequences = Sha256::new();
            for input in &tx.inputs {
                let mut buf = Vec::with_capacity(36);
                input.previous_output.consensus_encode(&mut buf);
                outpoints.update(&buf);
                sequences.update(input.sequence.to_le_bytes());
            }
            let mut amounts = Sha256::new();
            let mut spks = Sha256::new();
            for prevout in prevouts {
                amounts.update(prevout.value.to_le_bytes());
                let mut buf = Vec::with_capacity(prevout.script_pubkey.len() + 1);
                write_var_bytes(&mut buf, prevout.script_pubkey.as_bytes());
                spks.update(&buf);
            }
            let mut outputs = Sha256::new();
            for output in &tx.outputs {
                let mut buf = Vec::with_capacity(output.size());
                output.consensus_encode(&mut buf);
                outputs.update(&buf);
            }
            TaprootMidstate {
                prevouts: outpoints.finalize().into(),
                amounts: amounts.finalize().into(),
                script_pubkeys: spks.finalize().into(),
                sequences: sequences.finalize().into(),
                outputs: outputs.finalize().into(),
            }
        })
    }

    /// BIP341 signature message (the data under the `TapSighash` tag).
    ///
    /// `prevouts` must list the spent output of every input in order, and
    /// must be the same list on every call against one cache. `leaf_hash` selects the script-path message extension.
    pub fn taproot_signature_message(
        &mut self,
        index: usize,
        prevouts: &[TxOut],
        sighash_type: TapSighashType,
        leaf_hash: Option<&Hash256>,
    ) -> Result<Vec<u8>, SighashError> {
        self.check_index(index)?;
        let tx = self.tx;
        if prevouts.len() != tx.inputs.len() {
            return Err(SighashError::PrevoutCountMismatch {
                inputs: tx.inputs.len(),
                prevouts: prevouts.len(),
            });
        }
        let base = sighash_type.base();
        if base == BaseType::Single && index >= tx.outputs.len() {
            return Err(SighashError::SingleWithoutOutput(index));
        }
        let acp = sighash_type.anyone_can_pay();
        let mid = self.taproot_midstate(prevouts).clone();

        let mut msg = Vec::with_capacity(256);
        msg.push(0x00); // epoch
        msg.push(sighash_type.to_u8());
        msg.extend_from_slice(&tx.version.to_le_bytes());
        msg.extend_from_slice(&tx.lock_time.to_le_bytes());
        if !acp {
            msg.extend_from_slice(&mid.prevouts);
            msg.extend_from_slice(&mid.amounts);
            msg.extend_from_slice(&mid.script_pubkeys);
            msg.extend_from_slice(&mid.sequences);
        }
        if base == BaseType::All {
            msg.extend_from_slice(&mid.outputs);
        }
        let spend_type: u8 = if leaf_hash.is_some() { 2 } else { 0 };
        msg.push(spend_type);
        if acp {
            let input = &tx.inputs[index];
            input.previous_output.consensus_encode(&mut msg);
            prevouts[index].consensus_encode(&mut msg);
            msg.extend_from_slice(&input.sequence.to_le_bytes());
        } else {
            msg.extend_from_slice(&(index as u32).to_le_bytes());
        }
        if base == BaseType::Single {
            let mut out = Vec::new();
            tx.outputs[index].consensus_encode(&mut out);
            msg.extend_from_slice(&Sha256::digest(&out));
        }
        if let Some(leaf) = leaf_hash {
            msg.extend_from_slice(leaf.as_bytes());
            msg.push(0x00); // key version
            msg.extend_from_slice(&u32::MAX.to_le_bytes()); // no OP_CODESEPARATOR executed
        }
        Ok(msg)
    }

    /// BIP341 signature hash for a key-path spend.
    pub fn taproot_key_spend_signature_hash(
        &mut self,
        index: usize,
        prevouts: &[TxOut],
        sighash_type: TapSighashType,
    ) -> Result<Hash256, SighashError> {
        let msg = self.taproot_signature_message(index, prevouts, sighash_type, None)?;
        Ok(Hash256(tagged_hash("TapSighash", &[&msg])))
    }

    /// BIP341/342 signature hash for a script-path spend of `leaf_hash`.
    pub fn taproot_script_spend_signature_hash(
        &mut self,
        index: usize,
        prevouts: &[TxOut],
        leaf_hash: &Hash256,
        sighash_type: TapSighashType,
    ) -> Result<Hash256, SighashError> {
        let msg = self.taproot_signature_message(index, prevouts, sighash_type, Some(leaf_hash))?;
        Ok(Hash256(tagged_hash("TapSighash", &[&msg])))
    }
}

/// Copy `script` without `OP_CODESEPARATOR` opcodes, leaving push data intact.
fn strip_code_separators(script: &Script) -> Script {
    let bytes = script.as_bytes();
    if !bytes.contains(&opcodes::OP_CODESEPARATOR.to_u8()) {
        return script.clone();
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let op = bytes[pos];
        let (header, data_len) = match op {
            0x01..=0x4b => (1, op as usize),
            0x4c => (2, bytes.get(pos + 1).map_or(0, |&n| n as usize)),
            0x4d => (
                3,
                bytes
                    .get(pos + 1..pos + 3)
                    .map_or(0, |b| u16::from_le_bytes([b[0], b[1]]) as usize),
            ),
            0x4e => (
                5,
                bytes
                    .get(pos + 1..pos + 5)
                    .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize),
            ),
            _ => (1, 0),
        };
        let end = (pos + header + data_len).min(bytes.len());
        if op != opcodes::OP_CODESEPARATOR.to_u8() {
            out.extend_from_slice(&bytes[pos..end]);
        }
        pos = end;
    }
    Script::from_bytes(out)
}

/// Legacy signature hash of input `index`.
pub fn legacy_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    sighash_type: EcdsaSighashType,
) -> Result<Hash256, SighashError> {
    SighashCache::new(tx).legacy_signature_hash(index, script_code, sighash_type)
}

/// BIP143 signature hash of input `index` spending `value` sats.
pub fn segwit_v0_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: EcdsaSighashType,
) -> Result<Hash256, SighashError> {
    SighashCache::new(tx).segwit_v0_signature_hash(index, script_code, value, sighash_type)
}

/// BIP341 signature hash of input `index`; `leaf_hash` selects the script path.
pub fn taproot_sighash(
    tx: &Transaction,
    index: usize,
    prevouts: &[TxOut],
    leaf_hash: Option<&Hash256>,
    sighash_type: TapSighashType,
) -> Result<Hash256, SighashError> {
    let msg = SighashCache::new(tx).taproot_signature_message(index, prevouts, sighash_type, leaf_hash)?;
    Ok(Hash256(tagged_hash("TapSighash", &[&msg])))
}
