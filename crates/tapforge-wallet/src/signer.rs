//! Input signing and witness assembly.
//!
//! Every input is planned from its spent output and [`SpendInfo`], hashed
//! with the matching sighash algorithm, signed, checked against the key the
//! output commits to, and verified before anything is written back. The
//! transaction is only assembled once every input has succeeded; any
//! failure discards it as a whole.

use secp256k1::{Message, PublicKey, SECP256K1, XOnlyPublicKey, ecdsa, schnorr};
use tracing::{debug, info, warn};

use tapforge_core::hashes::{hash160, sha256};
use tapforge_core::script::{Instruction, Script, ScriptType};
use tapforge_core::sighash::{EcdsaSighashType, SighashCache, TapSighashType};
use tapforge_core::taproot::{ControlBlock, TaprootLeaf, tap_tweak_hash, tweak_public_key};
use tapforge_core::types::{Hash256, Transaction, TxOut};

use crate::builder::{PartialTransaction, SpendInfo, push_script};
use crate::error::WalletError;
use crate::external::{ExternalSigner, SignRequest, SignatureKind};
use crate::keys::KeyMaterial;

/// Supplies the key for each input being signed.
///
/// The key is only lent to `sign` for the duration of one signature; a
/// source that derives keys on demand erases them when `sign` returns.
/// Returns `false` when the source has no key for the input.
pub trait KeySource {
    fn with_key(&self, index: usize, prevout: &TxOut, sign: &mut dyn FnMut(&KeyMaterial)) -> bool;
}

/// Closures hand out owned keys, erased after the signature.
impl<F> KeySource for F
where
    F: Fn(usize, &TxOut) -> Option<KeyMaterial>,
{
    fn with_key(&self, index: usize, prevout: &TxOut, sign: &mut dyn FnMut(&KeyMaterial)) -> bool {
        match self(index, prevout) {
            Some(key) => {
                key.scoped(|key| sign(key));
                true
            }
            None => false,
        }
    }
}

/// Source of BIP340 auxiliary randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxRand {
    /// Fresh bytes from the OS RNG per signature.
    Os,
    /// The same bytes for every signature; reproducible output.
    Fixed([u8; 32]),
}

/// Signs [`PartialTransaction`]s.
#[derive(Debug, Clone, Copy)]
pub struct Signer {
    aux_rand: AuxRand,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully signed transaction, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
    fee: u64,
}

impl SignedTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Network serialization: segwit layout when any input has a witness.
    pub fn to_bytes(&self) -> Vec<u8> {
        tapforge_core::encode::serialize(&self.tx)
    }

    pub fn to_hex(&self) -> String {
        self.tx.to_hex()
    }

    pub fn txid(&self) -> Hash256 {
        self.tx.txid()
    }

    pub fn vsize(&self) -> u64 {
        self.tx.vsize()
    }

    /// Hand the bytes over, consuming the transaction.
    pub fn finalize(self) -> Vec<u8> {
        self.to_bytes()
    }

    pub fn into_transaction(self) -> Transaction {
        self.tx
    }
}

/// What the key must match for an input to be satisfiable.
#[derive(Debug, Clone)]
enum KeyCheck {
    /// HASH160 of the compressed key.
    PubkeyHash([u8; 20]),
    /// The key (or its HASH160) is pushed somewhere in the script.
    InScript(Script),
    /// Tweaking the key by the tree root yields this output key.
    TaprootOutput { output_key: XOnlyPublicKey, merkle_root: Option<Hash256> },
    /// The x-only key is pushed in the leaf script.
    InLeaf(Script),
}

#[derive(Debug, Clone)]
enum SpendPath {
    Legacy {
        script_code: Script,
        redeem_script: Option<Script>,
        sighash: EcdsaSighashType,
    },
    SegwitV0 {
        script_code: Script,
        /// Push of the redeem script for nested segwit.
        redeem_script: Option<Script>,
        witness_script: Option<Script>,
        sighash: EcdsaSighashType,
    },
    TaprootKey {
        merkle_root: Option<Hash256>,
        sighash: TapSighashType,
    },
    TaprootScript {
        leaf: TaprootLeaf,
        control_block: ControlBlock,
        sighash: TapSighashType,
    },
}

#[derive(Debug, Clone)]
struct InputPlan {
    path: SpendPath,
    check: KeyCheck,
    extra: Vec<Vec<u8>>,
}

impl InputPlan {
    fn kind(&self) -> SignatureKind {
        match self.path {
            SpendPath::Legacy { .. } | SpendPath::SegwitV0 { .. } => SignatureKind::Ecdsa,
            SpendPath::TaprootKey { .. } => SignatureKind::TaprootKeySpend,
            SpendPath::TaprootScript { .. } => SignatureKind::Schnorr,
        }
    }
}

/// A raw signature and the key that made it.
enum RawSignature {
    Ecdsa { der: Vec<u8>, key: PublicKey },
    Schnorr { sig: [u8; 64], key: XOnlyPublicKey },
}

/// scriptSig and witness for one input.
struct Satisfaction {
    script_sig: Script,
    witness: Vec<Vec<u8>>,
}

fn plan_input(prevout: &TxOut, info: &SpendInfo) -> Result<InputPlan, String> {
    let spk = &prevout.script_pubkey;
    let ecdsa_sighash = info.ecdsa_sighash;

    let segwit_key_hash = |hash: [u8; 20], redeem_script: Option<Script>| InputPlan {
        path: SpendPath::SegwitV0 {
            script_code: Script::p2pkh(&hash),
            redeem_script,
            witness_script: None,
            sighash: ecdsa_sighash,
        },
        check: KeyCheck::PubkeyHash(hash),
        extra: Vec::new(),
    };
    let segwit_script = |program: [u8; 32], redeem_script: Option<Script>| -> Result<InputPlan, String> {
        let ws = info.witness_script.clone().ok_or("missing witness script")?;
        if sha256(ws.as_bytes()) != program {
            return Err("witness script does not match the witness program".into());
        }
        Ok(InputPlan {
            path: SpendPath::SegwitV0 {
                script_code: ws.clone(),
                redeem_script,
                witness_script: Some(ws.clone()),
                sighash: ecdsa_sighash,
            },
            check: KeyCheck::InScript(ws),
            extra: info.extra_witness.clone(),
        })
    };

    match spk.script_type() {
        ScriptType::P2pkh => {
            let hash = spk.hash20().ok_or("malformed P2PKH script")?;
            Ok(InputPlan {
                path: SpendPath::Legacy { script_code: spk.clone(), redeem_script: None, sighash: ecdsa_sighash },
                check: KeyCheck::PubkeyHash(hash),
                extra: Vec::new(),
            })
        }
        ScriptType::P2wpkh => {
            let hash = spk.hash20().ok_or("malformed P2WPKH script")?;
            Ok(segwit_key_hash(hash, None))
        }
        ScriptType::P2wsh => {
            let program = spk.hash32().ok_or("malformed P2WSH script")?;
            segwit_script(program, None)
        }
        ScriptType::P2sh => {
            let redeem = info.redeem_script.clone().ok_or("missing redeem script")?;
            if Some(hash160(redeem.as_bytes())) != spk.hash20() {
                return Err("redeem script does not match the script hash".into());
            }
            if redeem.is_p2wpkh() {
                let hash = redeem.hash20().ok_or("malformed nested P2WPKH")?;
                Ok(segwit_key_hash(hash, Some(redeem)))
            } else if redeem.is_p2wsh() {
                let program = redeem.hash32().ok_or("malformed nested P2WSH")?;
                segwit_script(program, Some(redeem))
            } else {
                Ok(InputPlan {
                    path: SpendPath::Legacy {
                        script_code: redeem.clone(),
                        redeem_script: Some(redeem.clone()),
                        sighash: ecdsa_sighash,
                    },
                    check: KeyCheck::InScript(redeem),
                    extra: info.extra_witness.clone(),
                })
            }
        }
        ScriptType::P2tr => {
            let output = spk.hash32().ok_or("malformed P2TR script")?;
            let output_key = XOnlyPublicKey::from_slice(&output).map_err(|_| "P2TR output key is not on the curve")?;
            match &info.tap_leaf {
                Some((leaf, control_block)) => {
                    if !control_block.verify(&output_key, leaf.script()) {
                        return Err("control block does not commit to the output key".into());
                    }
                    if control_block.leaf_version != leaf.version() {
                        return Err("control block leaf version differs from the leaf".into());
                    }
                    Ok(InputPlan {
                        path: SpendPath::TaprootScript {
                            leaf: leaf.clone(),
                            control_block: control_block.clone(),
                            sighash: info.tap_sighash,
                        },
                        check: KeyCheck::InLeaf(leaf.script().clone()),
                        extra: info.extra_witness.clone(),
                    })
                }
                None => Ok(InputPlan {
                    path: SpendPath::TaprootKey { merkle_root: info.tap_merkle_root, sighash: info.tap_sighash },
                    check: KeyCheck::TaprootOutput { output_key, merkle_root: info.tap_merkle_root },
                    extra: Vec::new(),
                }),
            }
        }
        ScriptType::OpReturn | ScriptType::NonStandard => Err(format!("cannot sign for script {spk}")),
    }
}

fn script_pushes(script: &Script, candidates: &[&[u8]]) -> bool {
    script
        .instructions()
        .filter_map(Result::ok)
        .any(|ins| matches!(ins, Instruction::Push(data) if candidates.contains(&data)))
}

fn check_ecdsa_key(check: &KeyCheck, key: &PublicKey) -> Result<(), String> {
    let compressed = key.serialize();
    let hash = hash160(&compressed);
    let ok = match check {
        KeyCheck::PubkeyHash(expected) => hash == *expected,
        KeyCheck::InScript(script) => script_pushes(script, &[compressed.as_slice(), hash.as_slice()]),
        KeyCheck::TaprootOutput { .. } | KeyCheck::InLeaf(_) => false,
    };
    if ok { Ok(()) } else { Err("key does not match the spent script".into()) }
}

/// Check a Schnorr key and return the key the signature must verify under.
fn check_schnorr_key(check: &KeyCheck, key: &XOnlyPublicKey) -> Result<XOnlyPublicKey, String> {
    match check {
        KeyCheck::TaprootOutput { output_key, merkle_root } => {
            let (tweaked, _) = tweak_public_key(key, merkle_root.as_ref()).map_err(|e| e.to_string())?;
            if tweaked == *output_key {
                Ok(*output_key)
            } else {
                Err("tweaked key does not match the output key".into())
            }
        }
        KeyCheck::InLeaf(script) => {
            if script_pushes(script, &[key.serialize().as_slice()]) {
                Ok(*key)
            } else {
                Err("key does not appear in the leaf script".into())
            }
        }
        KeyCheck::PubkeyHash(_) | KeyCheck::InScript(_) => Err("Schnorr key for an ECDSA input".into()),
    }
}

fn compute_sighash(
    cache: &mut SighashCache<'_>,
    index: usize,
    prevouts: &[TxOut],
    path: &SpendPath,
) -> Result<Hash256, String> {
    let result = match path {
        SpendPath::Legacy { script_code, sighash, .. } => {
            cache.legacy_signature_hash(index, script_code, *sighash)
        }
        SpendPath::SegwitV0 { script_code, sighash, .. } => {
            cache.segwit_v0_signature_hash(index, script_code, prevouts[index].value, *sighash)
        }
        SpendPath::TaprootKey { sighash, .. } => {
            cache.taproot_key_spend_signature_hash(index, prevouts, *sighash)
        }
        SpendPath::TaprootScript { leaf, sighash, .. } => {
            cache.taproot_script_spend_signature_hash(index, prevouts, &leaf.leaf_hash(), *sighash)
        }
    };
    result.map_err(|e| e.to_string())
}

/// Check the signature and key, then build the input's scriptSig and witness.
fn satisfy(plan: &InputPlan, digest: &Hash256, raw: RawSignature) -> Result<Satisfaction, String> {
    let msg = Message::from_digest(digest.0);
    match (&plan.path, raw) {
        (SpendPath::Legacy { redeem_script, sighash, .. }, RawSignature::Ecdsa { der, key }) => {
            check_ecdsa_key(&plan.check, &key)?;
            let sig = verify_ecdsa(&msg, &der, &key)?;
            let sig = with_sighash_byte(sig, sighash.to_u32() as u8);
            let key_bytes = key.serialize();
            let mut items: Vec<&[u8]> = vec![&sig];
            match redeem_script {
                None => items.push(&key_bytes),
                Some(redeem) => {
                    items.extend(plan.extra.iter().map(Vec::as_slice));
                    items.push(redeem.as_bytes());
                }
            }
            let script_sig = push_script(items).map_err(|e| e.to_string())?;
            Ok(Satisfaction { script_sig, witness: Vec::new() })
        }
        (SpendPath::SegwitV0 { redeem_script, witness_script, sighash, .. }, RawSignature::Ecdsa { der, key }) => {
            check_ecdsa_key(&plan.check, &key)?;
            let sig = verify_ecdsa(&msg, &der, &key)?;
            let sig = with_sighash_byte(sig, sighash.to_u32() as u8);
            let witness = match witness_script {
                None => vec![sig, key.serialize().to_vec()],
                Some(ws) => {
                    let mut w = vec![sig];
                    w.extend(plan.extra.iter().cloned());
                    w.push(ws.as_bytes().to_vec());
                    w
                }
            };
            let script_sig = match redeem_script {
                Some(redeem) => push_script([redeem.as_bytes()]).map_err(|e| e.to_string())?,
                None => Script::new(),
            };
            Ok(Satisfaction { script_sig, witness })
        }
        (SpendPath::TaprootKey { sighash, .. }, RawSignature::Schnorr { sig, key }) => {
            let output_key = check_schnorr_key(&plan.check, &key)?;
            verify_schnorr(&msg, &sig, &output_key)?;
            Ok(Satisfaction { script_sig: Script::new(), witness: vec![schnorr_with_sighash(&sig, *sighash)] })
        }
        (SpendPath::TaprootScript { leaf, control_block, sighash }, RawSignature::Schnorr { sig, key }) => {
            let leaf_key = check_schnorr_key(&plan.check, &key)?;
            verify_schnorr(&msg, &sig, &leaf_key)?;
            let mut witness = vec![schnorr_with_sighash(&sig, *sighash)];
            witness.extend(plan.extra.iter().cloned());
            witness.push(leaf.script().as_bytes().to_vec());
            witness.push(control_block.serialize());
            Ok(Satisfaction { script_sig: Script::new(), witness })
        }
        _ => Err("signature kind does not match the spend path".into()),
    }
}

fn verify_ecdsa(msg: &Message, der: &[u8], key: &PublicKey) -> Result<Vec<u8>, String> {
    let sig = ecdsa::Signature::from_der(der).map_err(|_| "signature is not valid DER")?;
    let mut normalized = sig;
    normalized.normalize_s();
    if normalized != sig {
        return Err("signature is not low-S".into());
    }
    SECP256K1
        .verify_ecdsa(msg, &sig, key)
        .map_err(|_| "signature does not verify".to_string())?;
    Ok(sig.serialize_der().to_vec())
}

fn verify_schnorr(msg: &Message, sig: &[u8; 64], key: &XOnlyPublicKey) -> Result<(), String> {
    let sig = schnorr::Signature::from_slice(sig).map_err(|_| "malformed Schnorr signature")?;
    SECP256K1
        .verify_schnorr(&sig, msg, key)
        .map_err(|_| "Schnorr signature does not verify".to_string())
}

fn with_sighash_byte(mut sig: Vec<u8>, byte: u8) -> Vec<u8> {
    sig.push(byte);
    sig
}

fn schnorr_with_sighash(sig: &[u8; 64], sighash: TapSighashType) -> Vec<u8> {
    let mut out = sig.to_vec();
    if sighash != TapSighashType::Default {
        out.push(sighash.to_u8());
    }
    out
}

impl Signer {
    /// Signer drawing BIP340 aux randomness from the OS.
    pub fn new() -> Self {
        Self { aux_rand: AuxRand::Os }
    }

    /// All-zero aux randomness, for reproducible signatures in tests.
    pub fn deterministic() -> Self {
        Self { aux_rand: AuxRand::Fixed([0u8; 32]) }
    }

    pub fn with_aux_rand(aux_rand: AuxRand) -> Self {
        Self { aux_rand }
    }

    fn aux(&self) -> [u8; 32] {
        match self.aux_rand {
            AuxRand::Os => {
                use rand::RngCore;
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                bytes
            }
            AuxRand::Fixed(bytes) => bytes,
        }
    }

    /// Sign every input with keys from `keys`.
    pub fn sign(&self, partial: PartialTransaction, keys: &dyn KeySource) -> Result<SignedTransaction, WalletError> {
        self.sign_inputs(partial, |index, plan, prevout, _info, digest| {
            let mut signed = None;
            let found = keys.with_key(index, prevout, &mut |key| {
                signed = Some(self.software_signature(key, plan, digest));
            });
            if !found {
                return Err("no key for input".into());
            }
            signed.unwrap_or_else(|| Err("key source did not run the signature".into()))
        })
    }

    /// Sign every input through an external device.
    pub fn sign_with_device(
        &self,
        partial: PartialTransaction,
        device: &dyn ExternalSigner,
    ) -> Result<SignedTransaction, WalletError> {
        self.sign_inputs(partial, |index, plan, prevout, info, digest| {
            let tap_merkle_root = match plan.path {
                SpendPath::TaprootKey { merkle_root, .. } => merkle_root,
                _ => None,
            };
            let request = SignRequest {
                input_index: index,
                sighash: *digest,
                kind: plan.kind(),
                tap_merkle_root,
                derivation_path: info.derivation_path.clone(),
                script_pubkey: prevout.script_pubkey.clone(),
                amount: prevout.value,
            };
            let response = device.sign(&request)?;
            match plan.kind() {
                SignatureKind::Ecdsa => {
                    let key = PublicKey::from_slice(&response.public_key)
                        .map_err(|_| "device returned an invalid public key")?;
                    Ok(RawSignature::Ecdsa { der: response.signature, key })
                }
                SignatureKind::Schnorr | SignatureKind::TaprootKeySpend => {
                    let key = XOnlyPublicKey::from_slice(&response.public_key)
                        .map_err(|_| "device returned an invalid x-only key")?;
                    let sig: [u8; 64] = response
                        .signature
                        .as_slice()
                        .try_into()
                        .map_err(|_| "device returned a Schnorr signature of the wrong length")?;
                    Ok(RawSignature::Schnorr { sig, key })
                }
            }
        })
    }

    fn software_signature(&self, key: &KeyMaterial, plan: &InputPlan, digest: &Hash256) -> Result<RawSignature, String> {
        match &plan.path {
            SpendPath::Legacy { .. } | SpendPath::SegwitV0 { .. } => {
                let sig = key.sign_ecdsa(digest).map_err(|e| e.to_string())?;
                Ok(RawSignature::Ecdsa { der: sig.serialize_der().to_vec(), key: key.public_key() })
            }
            SpendPath::TaprootKey { merkle_root, .. } => {
                let (internal, _) = key.x_only_public_key();
                let tweak = tap_tweak_hash(&internal, merkle_root.as_ref());
                let sig = key.sign_schnorr(digest, &self.aux(), Some(&tweak)).map_err(|e| e.to_string())?;
                Ok(RawSignature::Schnorr { sig: sig.serialize(), key: internal })
            }
            SpendPath::TaprootScript { .. } => {
                let sig = key.sign_schnorr(digest, &self.aux(), None).map_err(|e| e.to_string())?;
                Ok(RawSignature::Schnorr { sig: sig.serialize(), key: key.x_only_public_key().0 })
            }
        }
    }

    fn sign_inputs<F>(&self, partial: PartialTransaction, mut produce: F) -> Result<SignedTransaction, WalletError>
    where
        F: FnMut(usize, &InputPlan, &TxOut, &SpendInfo, &Hash256) -> Result<RawSignature, String>,
    {
        let (mut tx, prevouts, spend_info, fee) = partial.into_parts();
        let mut satisfactions = Vec::with_capacity(tx.inputs.len());
        {
            let mut cache = SighashCache::new(&tx);
            for (index, (prevout, info)) in prevouts.iter().zip(&spend_info).enumerate() {
                let fail = |reason: String| {
                    warn!(input = index, %reason, "signing failed");
                    WalletError::SignatureFailure { index, reason }
                };
                let plan = plan_input(prevout, info).map_err(fail)?;
                let digest = compute_sighash(&mut cache, index, &prevouts, &plan.path).map_err(fail)?;
                let raw = produce(index, &plan, prevout, info, &digest).map_err(fail)?;
                let satisfaction = satisfy(&plan, &digest, raw).map_err(fail)?;
                debug!(input = index, kind = ?plan.kind(), "input signed");
                satisfactions.push(satisfaction);
            }
        }
        if satisfactions.len() != tx.inputs.len() {
            return Err(WalletError::SignatureFailure {
                index: satisfactions.len(),
                reason: "missing previous output".into(),
            });
        }
        for (input, s) in tx.inputs.iter_mut().zip(satisfactions) {
            input.script_sig = s.script_sig;
            input.witness = s.witness;
        }
        info!(txid = %tx.txid().to_reversed_hex(), fee, vsize = tx.vsize(), "transaction signed");
        Ok(SignedTransaction { tx, fee })
    }
}
