//! Bitcoin address encoding.
//!
//! Addresses are a closed set of payloads crossed with a [`Network`]:
//! - P2PKH / P2SH: Base58Check with a one-byte version prefix
//! - P2WPKH / P2WSH: witness v0, Bech32 ([BIP-173])
//! - P2TR: witness v1, Bech32m ([BIP-350])
//!
//! Decoding rejects a witness program encoded with the wrong checksum
//! variant, so a v0 program is never accepted under Bech32m or vice versa.
//!
//! Base58 prefixes are shared by testnet and regtest; such strings decode as
//! [`Network::Testnet`]. The string form still round-trips exactly.
//!
//! [BIP-173]: https://github.com/bitcoin/bips/blob/master/bip-0173.mediawiki
//! [BIP-350]: https://github.com/bitcoin/bips/blob/master/bip-0350.mediawiki

use secp256k1::{PublicKey, XOnlyPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use crate::constants::Network;
use crate::error::AddressError;
use crate::hashes::{hash160, sha256};
use crate::script::{Script, ScriptType};

/// Bech32 checksum constant (BIP-173).
const BECH32_CONST: u32 = 1;

/// Bech32m checksum constant (BIP-350).
const BECH32M_CONST: u32 = 0x2bc830a3;

/// Bech32 character set for encoding 5-bit values.
const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Longest valid segwit address string.
const MAX_BECH32_LEN: usize = 90;

/// Checksum flavour of a Bech32-family string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bech32Variant {
    Bech32,
    Bech32m,
}

impl Bech32Variant {
    fn constant(self) -> u32 {
        match self {
            Self::Bech32 => BECH32_CONST,
            Self::Bech32m => BECH32M_CONST,
        }
    }

    /// The variant required for a given witness version.
    pub fn for_witness_version(version: u8) -> Self {
        if version == 0 { Self::Bech32 } else { Self::Bech32m }
    }
}

/// What an address pays to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Payload {
    P2pkh([u8; 20]),
    P2sh([u8; 20]),
    P2wpkh([u8; 20]),
    P2wsh([u8; 32]),
    /// Tweaked x-only output key.
    P2tr([u8; 32]),
}

impl Payload {
    pub fn script_pubkey(&self) -> Script {
        match self {
            Self::P2pkh(h) => Script::p2pkh(h),
            Self::P2sh(h) => Script::p2sh(h),
            Self::P2wpkh(h) => Script::p2wpkh(h),
            Self::P2wsh(h) => Script::p2wsh(h),
            Self::P2tr(k) => Script::p2tr(k),
        }
    }

    pub fn script_type(&self) -> ScriptType {
        match self {
            Self::P2pkh(_) => ScriptType::P2pkh,
            Self::P2sh(_) => ScriptType::P2sh,
            Self::P2wpkh(_) => ScriptType::P2wpkh,
            Self::P2wsh(_) => ScriptType::P2wsh,
            Self::P2tr(_) => ScriptType::P2tr,
        }
    }

    fn witness(&self) -> Option<(u8, &[u8])> {
        match self {
            Self::P2wpkh(h) => Some((0, h)),
            Self::P2wsh(h) => Some((0, h)),
            Self::P2tr(k) => Some((1, k)),
            _ => None,
        }
    }
}

/// A spendable Bitcoin destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    payload: Payload,
}

impl Address {
    pub fn new(network: Network, payload: Payload) -> Self {
        Self { network, payload }
    }

    pub fn p2pkh(key: &PublicKey, network: Network) -> Self {
        Self::new(network, Payload::P2pkh(hash160(&key.serialize())))
    }

    pub fn p2wpkh(key: &PublicKey, network: Network) -> Self {
        Self::new(network, Payload::P2wpkh(hash160(&key.serialize())))
    }

    /// BIP49 nested segwit: P2SH wrapping a P2WPKH program.
    pub fn p2sh_p2wpkh(key: &PublicKey, network: Network) -> Self {
        let redeem = Script::p2wpkh_from_key(key);
        Self::p2sh(&redeem, network)
    }

    pub fn p2sh(redeem_script: &Script, network: Network) -> Self {
        Self::new(network, Payload::P2sh(hash160(redeem_script.as_bytes())))
    }

    pub fn p2wsh(witness_script: &Script, network: Network) -> Self {
        Self::new(network, Payload::P2wsh(sha256(witness_script.as_bytes())))
    }

    /// P2TR from an already-tweaked output key.
    pub fn p2tr_tweaked(output_key: &XOnlyPublicKey, network: Network) -> Self {
        Self::new(network, Payload::P2tr(output_key.serialize()))
    }

    /// Recover the address a scriptPubKey pays to.
    pub fn from_script(script: &Script, network: Network) -> Result<Self, AddressError> {
        let payload = match script.script_type() {
            ScriptType::P2pkh => script.hash20().map(Payload::P2pkh),
            ScriptType::P2sh => script.hash20().map(Payload::P2sh),
            ScriptType::P2wpkh => script.hash20().map(Payload::P2wpkh),
            ScriptType::P2wsh => script.hash32().map(Payload::P2wsh),
            ScriptType::P2tr => script.hash32().map(Payload::P2tr),
            ScriptType::OpReturn | ScriptType::NonStandard => None,
        };
        payload
            .map(|p| Self::new(network, p))
            .ok_or(AddressError::UnsupportedScript)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn script_pubkey(&self) -> Script {
        self.payload.script_pubkey()
    }

    pub fn script_type(&self) -> ScriptType {
        self.payload.script_type()
    }

    /// Whether this address can be used on `network`. Base58 testnet
    /// addresses are also valid on regtest.
    pub fn is_valid_for_network(&self, network: Network) -> bool {
        match (self.payload.witness(), self.network, network) {
            (_, a, b) if a == b => true,
            (None, Network::Testnet, Network::Regtest) => true,
            _ => false,
        }
    }

    /// Encode to the canonical string form (lowercase for Bech32 variants).
    pub fn encode(&self) -> String {
        match &self.payload {
            Payload::P2pkh(h) => base58check_encode(self.network.p2pkh_prefix(), h),
            Payload::P2sh(h) => base58check_encode(self.network.p2sh_prefix(), h),
            Payload::P2wpkh(h) => segwit_encode(self.network.hrp(), 0, h),
            Payload::P2wsh(h) => segwit_encode(self.network.hrp(), 0, h),
            Payload::P2tr(k) => segwit_encode(self.network.hrp(), 1, k),
        }
    }

    /// Decode any supported address string.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let lower = s.to_ascii_lowercase();
        let is_bech32 = ["bcrt1", "bc1", "tb1"].iter().any(|p| lower.starts_with(p));
        if is_bech32 {
            Self::decode_segwit(s)
        } else {
            Self::decode_base58(s)
        }
    }

    fn decode_base58(s: &str) -> Result<Self, AddressError> {
        let data = bs58::decode(s).with_check(None).into_vec().map_err(|e| match e {
            bs58::decode::Error::InvalidChecksum { .. } => AddressError::InvalidChecksum,
            other => AddressError::InvalidBase58(other.to_string()),
        })?;
        if data.len() != 21 {
            return Err(AddressError::InvalidLength);
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&data[1..]);
        let (network, payload) = match data[0] {
            0x00 => (Network::Mainnet, Payload::P2pkh(hash)),
            0x05 => (Network::Mainnet, Payload::P2sh(hash)),
            0x6f => (Network::Testnet, Payload::P2pkh(hash)),
            0xc4 => (Network::Testnet, Payload::P2sh(hash)),
            other => return Err(AddressError::UnknownPrefix(other)),
        };
        Ok(Self { network, payload })
    }

    fn decode_segwit(s: &str) -> Result<Self, AddressError> {
        let (hrp, data, variant) = bech32_decode(s)?;
        let network =
            Network::from_hrp(&hrp).ok_or_else(|| AddressError::UnknownNetwork(hrp.clone()))?;

        let (&version, program5) = data.split_first().ok_or(AddressError::InvalidLength)?;
        if version > 16 {
            return Err(AddressError::InvalidVersion(version));
        }
        if variant != Bech32Variant::for_witness_version(version) {
            return Err(AddressError::WrongChecksumVariant(version));
        }
        let program = convert_bits(program5, 5, 8, false).ok_or(AddressError::InvalidPadding)?;
        if !(2..=40).contains(&program.len()) {
            return Err(AddressError::InvalidProgramLength(program.len()));
        }

        let payload = match (version, program.len()) {
            (0, 20) => Payload::P2wpkh(to_array(&program)),
            (0, 32) => Payload::P2wsh(to_array(&program)),
            (0, n) => return Err(AddressError::InvalidProgramLength(n)),
            (1, 32) => Payload::P2tr(to_array(&program)),
            (1, n) => return Err(AddressError::InvalidProgramLength(n)),
            (v, _) => return Err(AddressError::InvalidVersion(v)),
        };
        Ok(Self { network, payload })
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

// --- Base58Check ---

fn base58check_encode(prefix: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

// --- Bech32 / Bech32m internals ---

/// Encode a segwit address: HRP, `1`, version, 5-bit program, checksum.
pub fn segwit_encode(hrp: &str, version: u8, program: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + (program.len() * 8).div_ceil(5));
    data.push(version);
    data.extend(convert_bits(program, 8, 5, true).unwrap_or_default());
    bech32_encode(hrp, &data, Bech32Variant::for_witness_version(version))
}

/// Encode 5-bit `data` under `hrp` with the given checksum variant.
pub fn bech32_encode(hrp: &str, data: &[u8], variant: Bech32Variant) -> String {
    let checksum = bech32_create_checksum(hrp, data, variant);
    let mut result = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    result.push_str(hrp);
    result.push('1');
    for &d in data.iter().chain(checksum.iter()) {
        result.push(CHARSET[d as usize] as char);
    }
    result
}

/// Decode a Bech32 or Bech32m string into (lowercase HRP, 5-bit data
/// without checksum, detected variant).
pub fn bech32_decode(s: &str) -> Result<(String, Vec<u8>, Bech32Variant), AddressError> {
    let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(AddressError::MixedCase);
    }
    if s.len() > MAX_BECH32_LEN {
        return Err(AddressError::InvalidLength);
    }

    let s_lower = s.to_ascii_lowercase();
    let sep_pos = s_lower.rfind('1').ok_or(AddressError::MissingSeparator)?;
    if sep_pos == 0 {
        return Err(AddressError::InvalidHrp);
    }
    if sep_pos + 7 > s_lower.len() {
        return Err(AddressError::InvalidLength);
    }

    let hrp = &s_lower[..sep_pos];
    if hrp.bytes().any(|b| !(33..=126).contains(&b)) {
        return Err(AddressError::InvalidHrp);
    }

    let mut data = Vec::with_capacity(s_lower.len() - sep_pos - 1);
    for c in s_lower[sep_pos + 1..].chars() {
        let pos = CHARSET
            .iter()
            .position(|&ch| ch as char == c)
            .ok_or(AddressError::InvalidCharacter(c))?;
        data.push(pos as u8);
    }

    let variant = bech32_verify_checksum(hrp, &data).ok_or(AddressError::InvalidChecksum)?;
    data.truncate(data.len() - 6);
    Ok((hrp.to_string(), data, variant))
}

/// Compute the BCH polymod shared by Bech32 and Bech32m.
fn bech32_polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    let mut chk: u32 = 1;
    for &v in values {
        let b = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (v as u32);
        for (i, &g) in GEN.iter().enumerate() {
            if (b >> i) & 1 != 0 {
                chk ^= g;
            }
        }
    }
    chk
}

fn bech32_hrp_expand(hrp: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(hrp.len() * 2 + 1);
    ret.extend(hrp.bytes().map(|c| c >> 5));
    ret.push(0);
    ret.extend(hrp.bytes().map(|c| c & 31));
    ret
}

fn bech32_create_checksum(hrp: &str, data: &[u8], variant: Bech32Variant) -> [u8; 6] {
    let mut values = bech32_hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; 6]);
    let polymod = bech32_polymod(&values) ^ variant.constant();
    let mut out = [0u8; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = ((polymod >> (5 * (5 - i))) & 31) as u8;
    }
    out
}

/// Which variant's checksum `data` (including the checksum) satisfies.
fn bech32_verify_checksum(hrp: &str, data: &[u8]) -> Option<Bech32Variant> {
    let mut values = bech32_hrp_expand(hrp);
    values.extend_from_slice(data);
    match bech32_polymod(&values) {
        BECH32_CONST => Some(Bech32Variant::Bech32),
        BECH32M_CONST => Some(Bech32Variant::Bech32m),
        _ => None,
    }
}

/// Convert between bit widths (e.g. 8-bit bytes to 5-bit Bech32 groups).
pub fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::new();
    let maxv = (1u32 << to_bits) - 1;
    for &value in data {
        let v = value as u32;
        if v >> from_bits != 0 {
            return None;
        }
        acc = (acc << from_bits) | v;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }
    if pad {
        if bits > 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return None;
    }
    Some(ret)
}
