//! BIP32 hierarchical deterministic keys with BIP44/49/84/86 path layouts.
//!
//! An [`ExtendedKey`] is one node of the tree: an optional secret (as
//! [`KeyMaterial`]), its public key and a chain code. [`HdKeyTree`] sits on
//! top of a master key, hands out addresses per purpose and remembers which
//! path produced each scriptPubKey so it can act as the signer's key source.

use secp256k1::{PublicKey, SECP256K1, Scalar};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use tapforge_core::address::{Address, Network};
use tapforge_core::constants::HARDENED_OFFSET;
use tapforge_core::error::EncodingError;
use tapforge_core::hashes::{hash160, hmac_sha512};
use tapforge_core::script::{Script, ScriptType};
use tapforge_core::taproot::TaprootSpendInfo;
use tapforge_core::types::TxOut;

use crate::error::WalletError;
use crate::keys::{KeyMaterial, Seed};
use crate::mnemonic;
use crate::signer::KeySource;

/// HMAC key for master key generation.
const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

/// Serialized extended key length before the Base58Check checksum.
const EXTENDED_KEY_LEN: usize = 78;

/// One element of a derivation path. The high bit marks hardened children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildNumber(u32);

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self, WalletError> {
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidDerivationPath(format!(
                "index {index} out of range"
            )));
        }
        Ok(Self(index))
    }

    pub fn hardened(index: u32) -> Result<Self, WalletError> {
        Self::normal(index).map(|c| Self(c.0 | HARDENED_OFFSET))
    }

    pub fn is_hardened(self) -> bool {
        self.0 & HARDENED_OFFSET != 0
    }

    /// Index without the hardened bit.
    pub fn index(self) -> u32 {
        self.0 & !HARDENED_OFFSET
    }

    pub fn to_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for ChildNumber {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())?;
        if self.is_hardened() {
            f.write_str("'")?;
        }
        Ok(())
    }
}

impl FromStr for ChildNumber {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, hardened) = match s.strip_suffix(['\'', 'h', 'H']) {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WalletError::InvalidDerivationPath(format!("bad element '{s}'")));
        }
        let index: u32 = digits
            .parse()
            .map_err(|_| WalletError::InvalidDerivationPath(format!("bad element '{s}'")))?;
        if hardened { Self::hardened(index) } else { Self::normal(index) }
    }
}

/// An ordered list of child numbers, written `m/84'/0'/0'/0/0`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    /// `m/purpose'/coin'/account'/change/index` with the coin type of `network`.
    pub fn for_purpose(
        purpose: Purpose,
        network: Network,
        account: u32,
        change: bool,
        index: u32,
    ) -> Result<Self, WalletError> {
        let mut path = Self::account(purpose, network, account)?;
        path.0.push(ChildNumber::normal(change as u32)?);
        path.0.push(ChildNumber::normal(index)?);
        Ok(path)
    }

    /// `m/purpose'/coin'/account'`.
    pub fn account(purpose: Purpose, network: Network, account: u32) -> Result<Self, WalletError> {
        Ok(Self(vec![
            ChildNumber::hardened(purpose.number())?,
            ChildNumber::hardened(network.coin_type())?,
            ChildNumber::hardened(account)?,
        ]))
    }

    pub fn child(&self, child: ChildNumber) -> Self {
        let mut path = self.0.clone();
        path.push(child);
        Self(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildNumber> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ChildNumber] {
        &self.0
    }
}

impl From<Vec<ChildNumber>> for DerivationPath {
    fn from(v: Vec<ChildNumber>) -> Self {
        Self(v)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for child in &self.0 {
            write!(f, "/{child}")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(WalletError::InvalidDerivationPath(format!(
                "'{s}' must start with 'm'"
            )));
        }
        parts.map(ChildNumber::from_str).collect::<Result<Vec<_>, _>>().map(Self)
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// BIP43 purpose, selecting both the path and the address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// P2PKH.
    Bip44,
    /// P2SH-wrapped P2WPKH.
    Bip49,
    /// Native P2WPKH.
    #[default]
    Bip84,
    /// Key-path-only P2TR.
    Bip86,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [Self::Bip44, Self::Bip49, Self::Bip84, Self::Bip86];

    pub fn number(self) -> u32 {
        match self {
            Self::Bip44 => 44,
            Self::Bip49 => 49,
            Self::Bip84 => 84,
            Self::Bip86 => 86,
        }
    }

    pub fn from_number(n: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.number() == n)
    }

    pub fn script_type(self) -> ScriptType {
        match self {
            Self::Bip44 => ScriptType::P2pkh,
            Self::Bip49 => ScriptType::P2sh,
            Self::Bip84 => ScriptType::P2wpkh,
            Self::Bip86 => ScriptType::P2tr,
        }
    }
}

/// A BIP32 node.
///
/// The chain code is wiped on drop; the secret lives in [`KeyMaterial`],
/// which wipes itself.
#[derive(Clone)]
pub struct ExtendedKey {
    network: Network,
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: ChildNumber,
    chain_code: [u8; 32],
    secret: Option<KeyMaterial>,
    public_key: PublicKey,
}

impl ExtendedKey {
    /// Master key from a 16 to 64 byte seed.
    pub fn master_from_seed(seed: &[u8], network: Network) -> Result<Self, WalletError> {
        let seed = Seed::from_bytes(seed)?;
        let i = Zeroizing::new(hmac_sha512(MASTER_HMAC_KEY, &[seed.as_bytes()]));
        let mut il = [0u8; 32];
        il.copy_from_slice(&i[..32]);
        let secret = KeyMaterial::from_secret_bytes(il)
            .map_err(|_| WalletError::KeyDerivation("seed produces an invalid master key".into()));
        il.zeroize();
        let secret = secret?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&i[32..]);
        debug!(%network, "derived BIP32 master key");
        Ok(Self {
            network,
            depth: 0,
            parent_fingerprint: [0; 4],
            child_number: ChildNumber(0),
            chain_code,
            public_key: secret.public_key(),
            secret: Some(secret),
        })
    }

    /// Master key from a BIP39 mnemonic and optional passphrase.
    pub fn master_from_mnemonic(
        phrase: &str,
        passphrase: &str,
        network: Network,
    ) -> Result<Self, WalletError> {
        let seed = mnemonic::mnemonic_to_seed(phrase, passphrase)?;
        Self::master_from_seed(seed.as_bytes(), network)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.parent_fingerprint
    }

    pub fn child_number(&self) -> ChildNumber {
        self.child_number
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn is_private(&self) -> bool {
        self.secret.is_some()
    }

    pub fn secret(&self) -> Option<&KeyMaterial> {
        self.secret.as_ref()
    }

    /// A copy of the secret, owned by the caller.
    pub fn to_key_material(&self) -> Result<KeyMaterial, WalletError> {
        self.secret
            .clone()
            .ok_or_else(|| WalletError::KeyDerivation("extended key has no secret".into()))
    }

    /// HASH160 of the public key.
    pub fn identifier(&self) -> [u8; 20] {
        hash160(&self.public_key.serialize())
    }

    pub fn fingerprint(&self) -> [u8; 4] {
        let id = self.identifier();
        [id[0], id[1], id[2], id[3]]
    }

    /// Public-only copy of this node.
    pub fn neuter(&self) -> Self {
        Self {
            network: self.network,
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_number: self.child_number,
            chain_code: self.chain_code,
            secret: None,
            public_key: self.public_key,
        }
    }

    /// Derive one child.
    ///
    /// If the requested index yields an invalid key the next index in the
    /// same (normal or hardened) range is used instead.
    pub fn derive_child(&self, child: ChildNumber) -> Result<Self, WalletError> {
        if self.depth == u8::MAX {
            return Err(WalletError::InvalidDerivationPath("maximum depth 255 reached".into()));
        }
        let mut index = child.to_u32();
        loop {
            if let Some(key) = self.try_derive(index)? {
                return Ok(key);
            }
            warn!(index, "BIP32 child key invalid, trying next index");
            let next = index.wrapping_add(1);
            if next & HARDENED_OFFSET != index & HARDENED_OFFSET {
                return Err(WalletError::InvalidDerivationPath(format!(
                    "no valid child at or after {child}"
                )));
            }
            index = next;
        }
    }

    fn try_derive(&self, index: u32) -> Result<Option<Self>, WalletError> {
        let hardened = index & HARDENED_OFFSET != 0;
        let mut data = Zeroizing::new(Vec::with_capacity(37));
        if hardened {
            let secret = self.secret.as_ref().ok_or(WalletError::HardenedFromPublic)?;
            data.push(0);
            data.extend_from_slice(secret.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key.serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let i = Zeroizing::new(hmac_sha512(&self.chain_code, &[&data]));
        let mut il = Zeroizing::new([0u8; 32]);
        il.copy_from_slice(&i[..32]);
        let Ok(tweak) = Scalar::from_be_bytes(*il) else {
            return Ok(None);
        };
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&i[32..]);

        let (secret, public_key) = match &self.secret {
            Some(parent) => {
                let child = parent.with_secret_key(|sk| {
                    sk.add_tweak(&tweak).map(|mut child| {
                        let bytes = Zeroizing::new(child.secret_bytes());
                        child.non_secure_erase();
                        bytes
                    })
                })?;
                let Ok(bytes) = child else {
                    return Ok(None);
                };
                let km = KeyMaterial::from_secret_bytes(*bytes)?;
                let public = km.public_key();
                (Some(km), public)
            }
            None => match self.public_key.add_exp_tweak(SECP256K1, &tweak) {
                Ok(pk) => (None, pk),
                Err(_) => return Ok(None),
            },
        };

        Ok(Some(Self {
            network: self.network,
            depth: self.depth + 1,
            parent_fingerprint: self.fingerprint(),
            child_number: ChildNumber(index),
            chain_code,
            secret,
            public_key,
        }))
    }

    /// Derive along `path`, relative to this node.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, WalletError> {
        let mut key = self.clone();
        for &child in path.iter() {
            key = key.derive_child(child)?;
        }
        Ok(key)
    }

    /// Version, depth, parent fingerprint, child number and chain code:
    /// the 45 bytes shared by both serializations.
    fn serialize_header(&self, version: [u8; 4]) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(EXTENDED_KEY_LEN));
        out.extend_from_slice(&version);
        out.push(self.depth);
        out.extend_from_slice(&self.parent_fingerprint);
        out.extend_from_slice(&self.child_number.to_u32().to_be_bytes());
        out.extend_from_slice(&self.chain_code);
        out
    }

    /// Base58Check `xprv`/`tprv` string.
    pub fn to_xprv(&self) -> Result<Zeroizing<String>, WalletError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| WalletError::KeyDerivation("extended key has no secret".into()))?;
        let mut data = self.serialize_header(self.network.xprv_version());
        data.push(0);
        data.extend_from_slice(secret.secret_bytes());
        Ok(Zeroizing::new(bs58::encode(data.as_slice()).with_check().into_string()))
    }

    /// Base58Check `xpub`/`tpub` string.
    pub fn to_xpub(&self) -> String {
        let mut data = self.serialize_header(self.network.xpub_version());
        data.extend_from_slice(&self.public_key.serialize());
        bs58::encode(data.as_slice()).with_check().into_string()
    }

    /// Address for this node's key in the layout of `purpose`.
    pub fn address(&self, purpose: Purpose) -> Result<Address, WalletError> {
        let pk = &self.public_key;
        Ok(match purpose {
            Purpose::Bip44 => Address::p2pkh(pk, self.network),
            Purpose::Bip49 => Address::p2sh_p2wpkh(pk, self.network),
            Purpose::Bip84 => Address::p2wpkh(pk, self.network),
            Purpose::Bip86 => {
                let (internal, _) = pk.x_only_public_key();
                TaprootSpendInfo::key_spend_only(internal)?.address(self.network)
            }
        })
    }
}

impl Drop for ExtendedKey {
    fn drop(&mut self) {
        self.chain_code.zeroize();
    }
}

impl FromStr for ExtendedKey {
    type Err = WalletError;

    /// Parse an `xprv`/`xpub`/`tprv`/`tpub` string. Testnet versions are
    /// shared with regtest and parse as [`Network::Testnet`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = Zeroizing::new(
            bs58::decode(s)
                .with_check(None)
                .into_vec()
                .map_err(|e| EncodingError::Base58(e.to_string()))?,
        );
        if data.len() != EXTENDED_KEY_LEN {
            return Err(EncodingError::InvalidLength { expected: EXTENDED_KEY_LEN, got: data.len() }.into());
        }
        let version = [data[0], data[1], data[2], data[3]];
        let (network, private) = [Network::Mainnet, Network::Testnet]
            .into_iter()
            .find_map(|net| {
                if version == net.xprv_version() {
                    Some((net, true))
                } else if version == net.xpub_version() {
                    Some((net, false))
                } else {
                    None
                }
            })
            .ok_or_else(|| EncodingError::UnknownVersion(hex::encode(version)))?;

        let depth = data[4];
        let parent_fingerprint = [data[5], data[6], data[7], data[8]];
        let child_number = ChildNumber(u32::from_be_bytes([data[9], data[10], data[11], data[12]]));
        if depth == 0 && (parent_fingerprint != [0; 4] || child_number.0 != 0) {
            return Err(EncodingError::InvalidKey("zero depth with non-zero parent".into()).into());
        }
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);
        let key = &data[45..];

        let (secret, public_key) = if private {
            if key[0] != 0 {
                return Err(EncodingError::InvalidKey("private key must be prefixed by 0x00".into()).into());
            }
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&key[1..]);
            let km = KeyMaterial::from_secret_bytes(bytes)
                .map_err(|_| EncodingError::InvalidKey("secret out of range".into()));
            bytes.zeroize();
            let km = km?;
            let public = km.public_key();
            (Some(km), public)
        } else {
            let pk = PublicKey::from_slice(key)
                .map_err(|_| EncodingError::InvalidKey("invalid public key".into()))?;
            (None, pk)
        };

        Ok(Self {
            network,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            secret,
            public_key,
        })
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("network", &self.network)
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("fingerprint", &hex::encode(self.fingerprint()))
            .field("private", &self.secret.is_some())
            .finish()
    }
}

/// Where a wallet scriptPubKey came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScriptOrigin {
    purpose: Purpose,
    change: bool,
    index: u32,
}

/// A master key plus the bookkeeping to hand out addresses.
///
/// Account-level keys (`m/purpose'/coin'/account'`) are cached so address
/// derivation only runs the two normal steps.
pub struct HdKeyTree {
    master: ExtendedKey,
    account: u32,
    accounts: HashMap<Purpose, ExtendedKey>,
    next_index: HashMap<(Purpose, bool), u32>,
    scripts: HashMap<Script, ScriptOrigin>,
}

impl HdKeyTree {
    pub fn new(master: ExtendedKey, account: u32) -> Self {
        Self {
            master,
            account,
            accounts: HashMap::new(),
            next_index: HashMap::new(),
            scripts: HashMap::new(),
        }
    }

    pub fn from_seed(seed: &Seed, network: Network, account: u32) -> Result<Self, WalletError> {
        Ok(Self::new(ExtendedKey::master_from_seed(seed.as_bytes(), network)?, account))
    }

    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        network: Network,
        account: u32,
    ) -> Result<Self, WalletError> {
        Ok(Self::new(ExtendedKey::master_from_mnemonic(phrase, passphrase, network)?, account))
    }

    pub fn network(&self) -> Network {
        self.master.network()
    }

    pub fn account(&self) -> u32 {
        self.account
    }

    pub fn master(&self) -> &ExtendedKey {
        &self.master
    }

    pub fn master_fingerprint(&self) -> [u8; 4] {
        self.master.fingerprint()
    }

    /// Derive an arbitrary path from the master key.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<ExtendedKey, WalletError> {
        self.master.derive_path(path)
    }

    /// Account-level key for `purpose`, derived once and cached.
    pub fn account_key(&mut self, purpose: Purpose) -> Result<&ExtendedKey, WalletError> {
        if !self.accounts.contains_key(&purpose) {
            let path = DerivationPath::account(purpose, self.network(), self.account)?;
            let key = self.master.derive_path(&path)?;
            debug!(%path, "derived account key");
            self.accounts.insert(purpose, key);
        }
        self.accounts
            .get(&purpose)
            .ok_or_else(|| WalletError::KeyDerivation("account key missing".into()))
    }

    /// Account xpub, for watch-only export.
    pub fn account_xpub(&mut self, purpose: Purpose) -> Result<String, WalletError> {
        Ok(self.account_key(purpose)?.to_xpub())
    }

    fn leaf_key(&self, origin: ScriptOrigin) -> Result<ExtendedKey, WalletError> {
        let change = ChildNumber::normal(origin.change as u32)?;
        let index = ChildNumber::normal(origin.index)?;
        match self.accounts.get(&origin.purpose) {
            Some(account) => account.derive_child(change)?.derive_child(index),
            None => self.master.derive_path(&self.path_of(origin)?),
        }
    }

    fn path_of(&self, origin: ScriptOrigin) -> Result<DerivationPath, WalletError> {
        DerivationPath::for_purpose(origin.purpose, self.network(), self.account, origin.change, origin.index)
    }

    /// Address at an explicit position; the script is remembered as ours.
    pub fn address_at(
        &mut self,
        purpose: Purpose,
        change: bool,
        index: u32,
    ) -> Result<Address, WalletError> {
        self.account_key(purpose)?;
        let origin = ScriptOrigin { purpose, change, index };
        let address = self.leaf_key(origin)?.address(purpose)?;
        self.scripts.insert(address.script_pubkey(), origin);
        Ok(address)
    }

    fn next(&mut self, purpose: Purpose, change: bool) -> Result<Address, WalletError> {
        let index = self.next_index(purpose, change);
        let address = self.address_at(purpose, change, index)?;
        self.next_index.insert((purpose, change), index + 1);
        debug!(purpose = purpose.number(), change, index, %address, "handed out address");
        Ok(address)
    }

    /// Next unused receive address.
    pub fn next_address(&mut self, purpose: Purpose) -> Result<Address, WalletError> {
        self.next(purpose, false)
    }

    /// Next unused change address.
    pub fn next_change_address(&mut self, purpose: Purpose) -> Result<Address, WalletError> {
        self.next(purpose, true)
    }

    pub fn next_index(&self, purpose: Purpose, change: bool) -> u32 {
        self.next_index.get(&(purpose, change)).copied().unwrap_or(0)
    }

    /// Record that `index` has been used, so the next address comes after it.
    pub fn mark_used(&mut self, purpose: Purpose, change: bool, index: u32) {
        let next = self.next_index.entry((purpose, change)).or_insert(0);
        *next = (*next).max(index.saturating_add(1));
    }

    /// Re-derive every address below the given indices, e.g. after restoring.
    pub fn restore_indices(
        &mut self,
        purpose: Purpose,
        receive: u32,
        change: u32,
    ) -> Result<(), WalletError> {
        for i in 0..receive {
            self.address_at(purpose, false, i)?;
        }
        for i in 0..change {
            self.address_at(purpose, true, i)?;
        }
        self.next_index.insert((purpose, false), receive);
        self.next_index.insert((purpose, true), change);
        Ok(())
    }

    /// Full derivation path of a scriptPubKey this tree handed out.
    pub fn path_for_script(&self, script: &Script) -> Option<DerivationPath> {
        let origin = self.scripts.get(script)?;
        self.path_of(*origin).ok()
    }

    pub fn is_mine(&self, script: &Script) -> bool {
        self.scripts.contains_key(script)
    }

    /// Every address handed out so far.
    pub fn addresses(&self) -> Vec<Address> {
        self.scripts
            .keys()
            .filter_map(|s| Address::from_script(s, self.network()).ok())
            .collect()
    }

    /// Key for a scriptPubKey this tree handed out.
    pub fn key_for_script(&self, script: &Script) -> Result<KeyMaterial, WalletError> {
        let origin = self
            .scripts
            .get(script)
            .ok_or_else(|| WalletError::KeyDerivation("script not owned by this wallet".into()))?;
        self.leaf_key(*origin)?.to_key_material()
    }
}

/// Derives a fresh key per signature and erases it afterwards.
impl KeySource for HdKeyTree {
    fn with_key(&self, index: usize, prevout: &TxOut, sign: &mut dyn FnMut(&KeyMaterial)) -> bool {
        match self.key_for_script(&prevout.script_pubkey) {
            Ok(key) => {
                key.scoped(|key| sign(key));
                true
            }
            Err(e) => {
                debug!(input = index, error = %e, "no wallet key for input");
                false
            }
        }
    }
}

impl fmt::Debug for HdKeyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeyTree")
            .field("network", &self.network())
            .field("account", &self.account)
            .field("master_fingerprint", &hex::encode(self.master_fingerprint()))
            .field("scripts", &self.scripts.len())
            .finish()
    }
}
