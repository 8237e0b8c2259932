//! Transaction types and their consensus serialization.
//!
//! All monetary values are in satoshis. Transactions serialize in the
//! legacy layout unless some input carries witness data, in which case the
//! BIP144 layout (marker `0x00`, flag `0x01`, per-input witness stacks) is
//! used for the whole transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{SEQUENCE_FINAL, WITNESS_SCALE_FACTOR};
use crate::encode::{
    self, Decodable, Encodable, Reader, compact_size_len, write_compact_size, write_var_bytes,
};
use crate::error::{EncodingError, TransactionError};
use crate::hashes::sha256d;
use crate::script::Script;

/// A 32-byte hash value in internal byte order.
///
/// `Display` shows the bytes in order; txids are conventionally shown
/// reversed, see [`Hash256::to_reversed_hex`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hex in RPC/explorer order (byte-reversed).
    pub fn to_reversed_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }

    /// Parse hex given in RPC/explorer order.
    pub fn from_reversed_hex(s: &str) -> Result<Self, EncodingError> {
        let mut hash = Self::from_str(s)?;
        hash.0.reverse();
        Ok(hash)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| EncodingError::InvalidLength { expected: 32, got: bytes.len() })?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid.to_reversed_hex(), self.vout)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.txid.as_bytes());
        out.extend_from_slice(&self.vout.to_le_bytes());
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            txid: Hash256(r.read_array()?),
            vout: r.read_u32_le()?,
        })
    }
}

/// A transaction input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Witness stack; empty for legacy inputs and unsigned inputs.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// An unsigned input spending `previous_output` with a final sequence.
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// A transaction output.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    /// Serialized size: 8-byte value plus length-prefixed script.
    pub fn size(&self) -> usize {
        8 + compact_size_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(out, self.script_pubkey.as_bytes());
    }
}

impl Decodable for TxOut {
    fn consensus_decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        Ok(Self {
            value: r.read_u64_le()?,
            script_pubkey: Script::from_bytes(r.read_var_bytes()?),
        })
    }
}

/// A Bitcoin transaction in any signing state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// True once any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Serialization without witness data (txid preimage, legacy sighash base).
    pub fn encode_legacy(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.consensus_encode(out);
            write_var_bytes(out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(out);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    fn encode_segwit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&[0x00, 0x01]);
        write_compact_size(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.consensus_encode(out);
            write_var_bytes(out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(out);
        }
        for input in &self.inputs {
            write_compact_size(out, input.witness.len() as u64);
            for item in &input.witness {
                write_var_bytes(out, item);
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Transaction id: double SHA-256 of the witness-stripped serialization.
    pub fn txid(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(self.base_size());
        self.encode_legacy(&mut buf);
        Hash256(sha256d(&buf))
    }

    /// Witness transaction id; equals the txid for legacy transactions.
    pub fn wtxid(&self) -> Hash256 {
        Hash256(sha256d(&encode::serialize(self)))
    }

    /// Size without witness data.
    pub fn base_size(&self) -> usize {
        let mut size = 4 + 4;
        size += compact_size_len(self.inputs.len() as u64);
        for input in &self.inputs {
            let script_len = input.script_sig.len();
            size += 36 + compact_size_len(script_len as u64) + script_len + 4;
        }
        size += compact_size_len(self.outputs.len() as u64);
        size += self.outputs.iter().map(TxOut::size).sum::<usize>();
        size
    }

    /// Full serialized size including any witness data.
    pub fn total_size(&self) -> usize {
        if !self.has_witness() {
            return self.base_size();
        }
        let witness: usize = self
            .inputs
            .iter()
            .map(|i| {
                compact_size_len(i.witness.len() as u64)
                    + i.witness
                        .iter()
                        .map(|item| compact_size_len(item.len() as u64) + item.len())
                        .sum::<usize>()
            })
            .sum();
        self.base_size() + 2 + witness
    }

    /// BIP141 weight: base size × 3 + total size.
    pub fn weight(&self) -> u64 {
        (self.base_size() as u64) * (WITNESS_SCALE_FACTOR - 1) + self.total_size() as u64
    }

    /// Virtual size in vbytes, rounded up.
    pub fn vsize(&self) -> u64 {
        self.weight().div_ceil(WITNESS_SCALE_FACTOR)
    }

    /// Sum of all output values, failing on overflow.
    pub fn total_output_value(&self) -> Result<u64, TransactionError> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
            .ok_or(TransactionError::ValueOverflow)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(encode::serialize(self))
    }

    pub fn from_hex(s: &str) -> Result<Self, EncodingError> {
        let bytes = hex::decode(s).map_err(|e| EncodingError::InvalidHex(e.to_string()))?;
        encode::deserialize(&bytes)
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, out: &mut Vec<u8>) {
        if self.has_witness() {
            self.encode_segwit(out)
        } else {
            self.encode_legacy(out)
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(r: &mut Reader<'_>) -> Result<Self, EncodingError> {
        let version = r.read_i32_le()?;
        let segwit = r.peek_u8()? == 0x00;
        if segwit {
            r.read_u8()?;
            let flag = r.read_u8()?;
            if flag != 0x01 {
                return Err(EncodingError::InvalidSegwitFlag(flag));
            }
        }

        let input_count = r.read_length()?;
        let mut inputs = Vec::with_capacity(input_count.min(r.remaining() / 41));
        for _ in 0..input_count {
            let previous_output = OutPoint::consensus_decode(r)?;
            let script_sig = Script::from_bytes(r.read_var_bytes()?);
            let sequence = r.read_u32_le()?;
            inputs.push(TxIn { previous_output, script_sig, sequence, witness: Vec::new() });
        }

        let output_count = r.read_length()?;
        let mut outputs = Vec::with_capacity(output_count.min(r.remaining() / 9));
        for _ in 0..output_count {
            outputs.push(TxOut::consensus_decode(r)?);
        }

        if segwit {
            for input in &mut inputs {
                let items = r.read_length()?;
                let mut witness = Vec::with_capacity(items.min(r.remaining()));
                for _ in 0..items {
                    witness.push(r.read_var_bytes()?);
                }
                input.witness = witness;
            }
            if inputs.iter().all(|i| i.witness.is_empty()) {
                return Err(EncodingError::EmptyWitness);
            }
        }

        let lock_time = r.read_u32_le()?;
        Ok(Self { version, inputs, outputs, lock_time })
    }
}

/// An unspent output available for spending.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Script,
}

impl Utxo {
    /// Create a UTXO record, rejecting zero values.
    pub fn new(outpoint: OutPoint, value: u64, script_pubkey: Script) -> Result<Self, TransactionError> {
        if value == 0 {
            return Err(TransactionError::ZeroValueUtxo(outpoint.to_string()));
        }
        Ok(Self { outpoint, value, script_pubkey })
    }

    /// The output being spent, as needed for sighash computation.
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}
