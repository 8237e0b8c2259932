//! Script construction.
//!
//! [`ScriptBuilder`] accumulates opcodes and data pushes using minimal push
//! encoding. Nothing here executes or validates scripts; it only produces
//! the byte sequences for standard templates and Taproot leaves.

use secp256k1::{PublicKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::MAX_SCRIPT_SIZE;
use crate::error::ScriptError;
use crate::hashes::{hash160, sha256};

/// A single script opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Opcode(u8);

impl Opcode {
    pub const fn from_u8(b: u8) -> Self {
        Self(b)
    }

    pub const fn to_u8(self) -> u8 {
        self.0
    }

    /// Mnemonic used in ASM output, for the opcodes this crate emits.
    pub fn name(self) -> Option<&'static str> {
        use opcodes::*;
        Some(match self {
            OP_0 => "OP_0",
            OP_PUSHDATA1 => "OP_PUSHDATA1",
            OP_PUSHDATA2 => "OP_PUSHDATA2",
            OP_PUSHDATA4 => "OP_PUSHDATA4",
            OP_1NEGATE => "OP_1NEGATE",
            OP_IF => "OP_IF",
            OP_NOTIF => "OP_NOTIF",
            OP_ELSE => "OP_ELSE",
            OP_ENDIF => "OP_ENDIF",
            OP_VERIFY => "OP_VERIFY",
            OP_RETURN => "OP_RETURN",
            OP_DROP => "OP_DROP",
            OP_DUP => "OP_DUP",
            OP_EQUAL => "OP_EQUAL",
            OP_EQUALVERIFY => "OP_EQUALVERIFY",
            OP_SHA256 => "OP_SHA256",
            OP_HASH160 => "OP_HASH160",
            OP_CODESEPARATOR => "OP_CODESEPARATOR",
            OP_CHECKSIG => "OP_CHECKSIG",
            OP_CHECKSIGVERIFY => "OP_CHECKSIGVERIFY",
            OP_CHECKMULTISIG => "OP_CHECKMULTISIG",
            OP_CHECKLOCKTIMEVERIFY => "OP_CHECKLOCKTIMEVERIFY",
            OP_CHECKSEQUENCEVERIFY => "OP_CHECKSEQUENCEVERIFY",
            OP_CHECKSIGADD => "OP_CHECKSIGADD",
            Opcode(b @ 0x51..=0x60) => return Some(SMALL_INT_NAMES[(b - 0x51) as usize]),
            _ => return None,
        })
    }
}

const SMALL_INT_NAMES: [&str; 16] = [
    "OP_1", "OP_2", "OP_3", "OP_4", "OP_5", "OP_6", "OP_7", "OP_8", "OP_9", "OP_10", "OP_11",
    "OP_12", "OP_13", "OP_14", "OP_15", "OP_16",
];

/// Opcode constants.
pub mod opcodes {
    use super::Opcode;

    pub const OP_0: Opcode = Opcode(0x00);
    pub const OP_PUSHDATA1: Opcode = Opcode(0x4c);
    pub const OP_PUSHDATA2: Opcode = Opcode(0x4d);
    pub const OP_PUSHDATA4: Opcode = Opcode(0x4e);
    pub const OP_1NEGATE: Opcode = Opcode(0x4f);
    pub const OP_1: Opcode = Opcode(0x51);
    pub const OP_16: Opcode = Opcode(0x60);
    pub const OP_IF: Opcode = Opcode(0x63);
    pub const OP_NOTIF: Opcode = Opcode(0x64);
    pub const OP_ELSE: Opcode = Opcode(0x67);
    pub const OP_ENDIF: Opcode = Opcode(0x68);
    pub const OP_VERIFY: Opcode = Opcode(0x69);
    pub const OP_RETURN: Opcode = Opcode(0x6a);
    pub const OP_DROP: Opcode = Opcode(0x75);
    pub const OP_DUP: Opcode = Opcode(0x76);
    pub const OP_EQUAL: Opcode = Opcode(0x87);
    pub const OP_EQUALVERIFY: Opcode = Opcode(0x88);
    pub const OP_SHA256: Opcode = Opcode(0xa8);
    pub const OP_HASH160: Opcode = Opcode(0xa9);
    pub const OP_CODESEPARATOR: Opcode = Opcode(0xab);
    pub const OP_CHECKSIG: Opcode = Opcode(0xac);
    pub const OP_CHECKSIGVERIFY: Opcode = Opcode(0xad);
    pub const OP_CHECKMULTISIG: Opcode = Opcode(0xae);
    pub const OP_CHECKLOCKTIMEVERIFY: Opcode = Opcode(0xb1);
    pub const OP_CHECKSEQUENCEVERIFY: Opcode = Opcode(0xb2);
    pub const OP_CHECKSIGADD: Opcode = Opcode(0xba);
}

use opcodes::*;

/// Standard output script shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScriptType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
    OpReturn,
    NonStandard,
}

/// A serialized script.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Script(#[serde(with = "hex_bytes")] Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw bytes, e.g. a scriptPubKey read from the network.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }

    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::new()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    // --- Templates ---

    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh(pubkey_hash: &[u8; 20]) -> Self {
        let mut b = ScriptBuilder::new();
        b.push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_bytes(pubkey_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG);
        b.into_script_unchecked()
    }

    /// `OP_HASH160 <20> OP_EQUAL`
    pub fn p2sh(script_hash: &[u8; 20]) -> Self {
        let mut b = ScriptBuilder::new();
        b.push_opcode(OP_HASH160).push_bytes(script_hash).push_opcode(OP_EQUAL);
        b.into_script_unchecked()
    }

    /// `OP_0 <20>`
    pub fn p2wpkh(pubkey_hash: &[u8; 20]) -> Self {
        Self::from_witness_program(0, pubkey_hash)
    }

    /// `OP_0 <32>`
    pub fn p2wsh(script_hash: &[u8; 32]) -> Self {
        Self::from_witness_program(0, script_hash)
    }

    /// `OP_1 <32>` with an already-tweaked output key.
    pub fn p2tr(output_key: &[u8; 32]) -> Self {
        Self::from_witness_program(1, output_key)
    }

    fn from_witness_program(version: u8, program: &[u8]) -> Self {
        let mut b = ScriptBuilder::new();
        b.push_int(version as i64).push_bytes(program);
        b.into_script_unchecked()
    }

    pub fn p2pkh_from_key(key: &PublicKey) -> Self {
        Self::p2pkh(&hash160(&key.serialize()))
    }

    pub fn p2wpkh_from_key(key: &PublicKey) -> Self {
        Self::p2wpkh(&hash160(&key.serialize()))
    }

    pub fn p2sh_from_script(redeem_script: &Script) -> Self {
        Self::p2sh(&hash160(redeem_script.as_bytes()))
    }

    pub fn p2wsh_from_script(witness_script: &Script) -> Self {
        Self::p2wsh(&sha256(witness_script.as_bytes()))
    }

    /// `OP_RETURN <data>`
    pub fn op_return(data: &[u8]) -> Result<Self, ScriptError> {
        let mut b = ScriptBuilder::new();
        b.push_opcode(OP_RETURN).push_bytes(data);
        b.finalize()
    }

    /// `<pubkey> OP_CHECKSIG`, the usual single-key script for P2WSH.
    pub fn single_key(key: &PublicKey) -> Self {
        let mut b = ScriptBuilder::new();
        b.push_key(key).push_opcode(OP_CHECKSIG);
        b.into_script_unchecked()
    }

    /// `<x-only key> OP_CHECKSIG`, the usual Tapscript leaf.
    pub fn tap_checksig(key: &XOnlyPublicKey) -> Self {
        let mut b = ScriptBuilder::new();
        b.push_x_only_key(key).push_opcode(OP_CHECKSIG);
        b.into_script_unchecked()
    }

    // --- Classification ---

    pub fn is_p2pkh(&self) -> bool {
        let b = &self.0;
        b.len() == 25
            && b[0] == OP_DUP.0
            && b[1] == OP_HASH160.0
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY.0
            && b[24] == OP_CHECKSIG.0
    }

    pub fn is_p2sh(&self) -> bool {
        let b = &self.0;
        b.len() == 23 && b[0] == OP_HASH160.0 && b[1] == 20 && b[22] == OP_EQUAL.0
    }

    pub fn is_p2wpkh(&self) -> bool {
        matches!(self.witness_program(), Some((0, p)) if p.len() == 20)
    }

    pub fn is_p2wsh(&self) -> bool {
        matches!(self.witness_program(), Some((0, p)) if p.len() == 32)
    }

    pub fn is_p2tr(&self) -> bool {
        matches!(self.witness_program(), Some((1, p)) if p.len() == 32)
    }

    pub fn is_op_return(&self) -> bool {
        self.0.first() == Some(&OP_RETURN.0)
    }

    /// Witness version and program if this is a segwit output script.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        let b = &self.0;
        if b.len() < 4 || b.len() > 42 {
            return None;
        }
        let version = match b[0] {
            0x00 => 0,
            v @ 0x51..=0x60 => v - 0x50,
            _ => return None,
        };
        let push = b[1] as usize;
        if !(2..=40).contains(&push) || push + 2 != b.len() {
            return None;
        }
        Some((version, &b[2..]))
    }

    pub fn script_type(&self) -> ScriptType {
        if self.is_p2pkh() {
            ScriptType::P2pkh
        } else if self.is_p2sh() {
            ScriptType::P2sh
        } else if self.is_p2wpkh() {
            ScriptType::P2wpkh
        } else if self.is_p2wsh() {
            ScriptType::P2wsh
        } else if self.is_p2tr() {
            ScriptType::P2tr
        } else if self.is_op_return() {
            ScriptType::OpReturn
        } else {
            ScriptType::NonStandard
        }
    }

    /// 20-byte hash committed by a P2PKH, P2SH or P2WPKH script.
    pub fn hash20(&self) -> Option<[u8; 20]> {
        let slice = match self.script_type() {
            ScriptType::P2pkh => &self.0[3..23],
            ScriptType::P2sh => &self.0[2..22],
            ScriptType::P2wpkh => &self.0[2..22],
            _ => return None,
        };
        let mut out = [0u8; 20];
        out.copy_from_slice(slice);
        Some(out)
    }

    /// 32-byte program of a P2WSH or P2TR script.
    pub fn hash32(&self) -> Option<[u8; 32]> {
        match self.script_type() {
            ScriptType::P2wsh | ScriptType::P2tr => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&self.0[2..34]);
                Some(out)
            }
            _ => None,
        }
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { bytes: &self.0, pos: 0 }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({self})")
    }
}

/// ASM rendering. Malformed trailing pushes are shown as `[error]`.
impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ins in self.instructions() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match ins {
                Ok(Instruction::Push(data)) if data.is_empty() => f.write_str("OP_0")?,
                Ok(Instruction::Push(data)) => f.write_str(&hex::encode(data))?,
                Ok(Instruction::Op(op)) => match op.name() {
                    Some(name) => f.write_str(name)?,
                    None => write!(f, "OP_UNKNOWN_{:#04x}", op.0)?,
                },
                Err(_) => {
                    f.write_str("[error]")?;
                    break;
                }
            }
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Script {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One parsed script element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(Opcode),
}

/// Iterator over the instructions of a [`Script`].
pub struct Instructions<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Instructions<'a> {
    fn take(&mut self, n: usize, at: usize) -> Result<&'a [u8], ScriptError> {
        if self.bytes.len() - self.pos < n {
            self.pos = self.bytes.len();
            return Err(ScriptError::TruncatedPush(at));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_len(&mut self, width: usize, at: usize) -> Result<usize, ScriptError> {
        let raw = self.take(width, at)?;
        let mut buf = [0u8; 4];
        buf[..width].copy_from_slice(raw);
        Ok(u32::from_le_bytes(buf) as usize)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.pos;
        let op = *self.bytes.get(self.pos)?;
        self.pos += 1;
        let len = match op {
            0x00 => return Some(Ok(Instruction::Push(&[]))),
            0x01..=0x4b => Ok(op as usize),
            0x4c => self.take_len(1, at),
            0x4d => self.take_len(2, at),
            0x4e => self.take_len(4, at),
            _ => return Some(Ok(Instruction::Op(Opcode(op)))),
        };
        Some(len.and_then(|n| self.take(n, at)).map(Instruction::Push))
    }
}

/// Fluent script builder.
///
/// Errors (oversized pushes or scripts) are recorded and reported by
/// [`ScriptBuilder::finalize`] so calls can be chained.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
    error: Option<ScriptError>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_opcode(&mut self, op: Opcode) -> &mut Self {
        self.bytes.push(op.0);
        self
    }

    /// Push data with the shortest length prefix for its size.
    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        match len {
            0 => self.bytes.push(OP_0.0),
            1..=75 => self.bytes.push(len as u8),
            76..=0xff => {
                self.bytes.push(OP_PUSHDATA1.0);
                self.bytes.push(len as u8);
            }
            0x100..=0xffff => {
                self.bytes.push(OP_PUSHDATA2.0);
                self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
            }
            _ => match u32::try_from(len) {
                Ok(n) => {
                    self.bytes.push(OP_PUSHDATA4.0);
                    self.bytes.extend_from_slice(&n.to_le_bytes());
                }
                Err(_) => {
                    self.error.get_or_insert(ScriptError::PushTooLarge(len));
                    return self;
                }
            },
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Push a number: small values use `OP_1NEGATE`/`OP_0`..`OP_16`,
    /// everything else a minimal script-number push.
    pub fn push_int(&mut self, n: i64) -> &mut Self {
        match n {
            -1 => self.push_opcode(OP_1NEGATE),
            0 => self.push_opcode(OP_0),
            1..=16 => self.push_opcode(Opcode(OP_1.0 + (n as u8) - 1)),
            _ => {
                let encoded = scriptnum_encode(n);
                self.push_bytes(&encoded)
            }
        }
    }

    /// Push a 33-byte compressed public key.
    pub fn push_key(&mut self, key: &PublicKey) -> &mut Self {
        self.push_bytes(&key.serialize())
    }

    /// Push a 32-byte x-only public key.
    pub fn push_x_only_key(&mut self, key: &XOnlyPublicKey) -> &mut Self {
        self.push_bytes(&key.serialize())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Produce the script, failing on any recorded error or if the result
    /// exceeds [`MAX_SCRIPT_SIZE`].
    pub fn finalize(&self) -> Result<Script, ScriptError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.bytes.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge {
                size: self.bytes.len(),
                max: MAX_SCRIPT_SIZE,
            });
        }
        Ok(Script(self.bytes.clone()))
    }

    /// For fixed-size templates that cannot exceed any limit.
    fn into_script_unchecked(self) -> Script {
        Script(self.bytes)
    }
}

/// Minimal little-endian sign-magnitude encoding used by script numbers.
pub fn scriptnum_encode(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if let Some(last) = out.last_mut() {
        if *last & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *last |= 0x80;
        }
    }
    out
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(f: impl FnOnce(&mut ScriptBuilder)) -> Vec<u8> {
        let mut b = ScriptBuilder::new();
        f(&mut b);
        b.finalize().unwrap().into_bytes()
    }

    // --- Push encoding ---

    #[test]
    fn push_empty_is_op_0() {
        assert_eq!(built(|b| { b.push_bytes(&[]); }), vec![0x00]);
    }

    #[test]
    fn push_direct_up_to_75() {
        let out = built(|b| { b.push_bytes(&[7u8; 75]); });
        assert_eq!(out[0], 75);
        assert_eq!(out.len(), 76);
    }

    #[test]
    fn push_76_uses_pushdata1() {
        let out = built(|b| { b.push_bytes(&[7u8; 76]); });
        assert_eq!(&out[..2], &[0x4c, 76]);
        assert_eq!(out.len(), 78);
    }

    #[test]
    fn push_256_uses_pushdata2() {
        let out = built(|b| { b.push_bytes(&[7u8; 256]); });
        assert_eq!(&out[..3], &[0x4d, 0x00, 0x01]);
    }

    #[test]
    fn push_65536_uses_pushdata4() {
        let mut b = ScriptBuilder::new();
        b.push_bytes(&vec![0u8; 65_536]);
        assert_eq!(&b.bytes[..5], &[0x4e, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn oversized_script_rejected_at_finalize() {
        let mut b = ScriptBuilder::new();
        b.push_bytes(&vec![0u8; MAX_SCRIPT_SIZE]);
        assert!(matches!(b.finalize(), Err(ScriptError::ScriptTooLarge { .. })));
    }

    #[test]
    fn script_at_limit_accepted() {
        let mut b = ScriptBuilder::new();
        // 3-byte PUSHDATA2 header + payload
        b.push_bytes(&vec![0u8; MAX_SCRIPT_SIZE - 3]);
        assert_eq!(b.finalize().unwrap().len(), MAX_SCRIPT_SIZE);
    }

    #[test]
    fn push_int_small_numbers() {
        assert_eq!(built(|b| { b.push_int(-1); }), vec![0x4f]);
        assert_eq!(built(|b| { b.push_int(0); }), vec![0x00]);
        assert_eq!(built(|b| { b.push_int(1); }), vec![0x51]);
        assert_eq!(built(|b| { b.push_int(16); }), vec![0x60]);
        assert_eq!(built(|b| { b.push_int(17); }), vec![0x01, 0x11]);
    }

    #[test]
    fn scriptnum_sign_handling() {
        assert_eq!(scriptnum_encode(127), vec![0x7f]);
        assert_eq!(scriptnum_encode(128), vec![0x80, 0x00]);
        assert_eq!(scriptnum_encode(-128), vec![0x80, 0x80]);
        assert_eq!(scriptnum_encode(-255), vec![0xff, 0x80]);
        assert_eq!(scriptnum_encode(500_000), vec![0x20, 0xa1, 0x07]);
    }

    // --- Templates ---

    #[test]
    fn p2pkh_layout() {
        let s = Script::p2pkh(&[0x11; 20]);
        assert_eq!(s.len(), 25);
        assert!(s.is_p2pkh());
        assert_eq!(s.script_type(), ScriptType::P2pkh);
        assert_eq!(s.hash20(), Some([0x11; 20]));
    }

    #[test]
    fn p2sh_layout() {
        let s = Script::p2sh(&[0x22; 20]);
        assert_eq!(s.to_hex(), format!("a914{}87", "22".repeat(20)));
        assert_eq!(s.script_type(), ScriptType::P2sh);
    }

    #[test]
    fn p2wpkh_layout() {
        let s = Script::p2wpkh(&[0x33; 20]);
        assert_eq!(s.to_hex(), format!("0014{}", "33".repeat(20)));
        assert_eq!(s.witness_program(), Some((0, &[0x33u8; 20][..])));
    }

    #[test]
    fn p2wsh_and_p2tr_layout() {
        let wsh = Script::p2wsh(&[0x44; 32]);
        assert_eq!(wsh.script_type(), ScriptType::P2wsh);
        let tr = Script::p2tr(&[0x55; 32]);
        assert_eq!(tr.as_bytes()[0], 0x51);
        assert_eq!(tr.script_type(), ScriptType::P2tr);
        assert_eq!(tr.hash32(), Some([0x55; 32]));
    }

    #[test]
    fn op_return_classified() {
        let s = Script::op_return(b"hello").unwrap();
        assert!(s.is_op_return());
        assert_eq!(s.script_type(), ScriptType::OpReturn);
    }

    #[test]
    fn nonstandard_script() {
        let s = Script::from_bytes(vec![0x51, 0x52, 0x93]);
        assert_eq!(s.script_type(), ScriptType::NonStandard);
        assert_eq!(s.witness_program(), None);
    }

    #[test]
    fn p2wpkh_from_key_matches_bip143_example() {
        let key = PublicKey::from_slice(
            &hex::decode("025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee6357")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            Script::p2wpkh_from_key(&key).to_hex(),
            "00141d0f172a0ecb48aee1be1f2687d2963ae33f71a1"
        );
    }

    // --- Instructions / ASM ---

    #[test]
    fn instructions_parse_pushes_and_ops() {
        let s = Script::p2pkh(&[0xab; 20]);
        let ins: Vec<_> = s.instructions().collect::<Result<_, _>>().unwrap();
        assert_eq!(ins.len(), 5);
        assert_eq!(ins[0], Instruction::Op(OP_DUP));
        assert_eq!(ins[2], Instruction::Push(&[0xab; 20]));
    }

    #[test]
    fn truncated_push_reported() {
        let s = Script::from_bytes(vec![0x05, 0x01, 0x02]);
        let first = s.instructions().next().unwrap();
        assert_eq!(first, Err(ScriptError::TruncatedPush(0)));
    }

    #[test]
    fn display_asm() {
        let s = Script::p2wpkh(&[0x00; 20]);
        assert_eq!(s.to_string(), format!("OP_0 {}", "00".repeat(20)));
        let s = Script::p2pkh(&[0x01; 20]);
        assert!(s.to_string().starts_with("OP_DUP OP_HASH160 "));
        assert!(s.to_string().ends_with("OP_EQUALVERIFY OP_CHECKSIG"));
    }

    #[test]
    fn serde_as_hex() {
        let s = Script::p2wpkh(&[0x33; 20]);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, format!("\"0014{}\"", "33".repeat(20)));
        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
