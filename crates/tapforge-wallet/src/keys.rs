//! Secret key material and seeds.
//!
//! [`KeyMaterial`] owns a 32-byte secp256k1 secret and its public key. The
//! secret is zeroized when the value is dropped, including during unwinding,
//! and every temporary `SecretKey` built from it is erased after use.
//! Nothing in this module logs or formats secret bytes.

use parking_lot::Mutex;
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Keypair, Message, Parity, PublicKey, SECP256K1, Scalar, SecretKey, XOnlyPublicKey};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use tapforge_core::types::{Hash256, TxOut};

use crate::error::WalletError;
use crate::signer::KeySource;

/// Smallest BIP32 seed, in bytes.
pub const MIN_SEED_LEN: usize = 16;
/// Largest BIP32 seed, in bytes.
pub const MAX_SEED_LEN: usize = 64;

/// Erases a temporary `SecretKey` on every exit path.
struct SecretGuard(SecretKey);

impl Drop for SecretGuard {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

/// A secp256k1 secret scalar with its compressed public key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: PublicKey,
}

impl KeyMaterial {
    /// Wrap a 32-byte secret; zero or out-of-range scalars are rejected.
    pub fn from_secret_bytes(mut bytes: [u8; 32]) -> Result<Self, WalletError> {
        let result = SecretKey::from_slice(&bytes)
            .map(|sk| {
                let guard = SecretGuard(sk);
                PublicKey::from_secret_key(SECP256K1, &guard.0)
            })
            .map_err(|_| WalletError::KeyDerivation("secret is not a valid scalar".into()));
        let km = result.map(|public| Self { secret: bytes, public });
        bytes.zeroize();
        km
    }

    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        let guard = SecretGuard(SecretKey::new(&mut rand::rngs::OsRng));
        Self {
            secret: guard.0.secret_bytes(),
            public: PublicKey::from_secret_key(SECP256K1, &guard.0),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// 65-byte uncompressed SEC1 encoding.
    pub fn uncompressed_public_key(&self) -> [u8; 65] {
        self.public.serialize_uncompressed()
    }

    pub fn x_only_public_key(&self) -> (XOnlyPublicKey, Parity) {
        self.public.x_only_public_key()
    }

    /// Whether the secret has been wiped.
    pub fn is_erased(&self) -> bool {
        self.secret == [0u8; 32]
    }

    /// Wipe the secret now instead of waiting for drop.
    pub fn erase(&mut self) {
        self.secret.zeroize();
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Run `f` with a temporary `SecretKey`, erased when `f` returns or unwinds.
    pub fn with_secret_key<R>(&self, f: impl FnOnce(&SecretKey) -> R) -> Result<R, WalletError> {
        if self.is_erased() {
            return Err(WalletError::KeyDerivation("key material has been erased".into()));
        }
        let sk = SecretKey::from_slice(&self.secret)
            .map_err(|_| WalletError::KeyDerivation("secret is not a valid scalar".into()))?;
        let guard = SecretGuard(sk);
        Ok(f(&guard.0))
    }

    /// Consume the key, run `f`, and erase the secret afterwards.
    ///
    /// The secret is wiped when `self` drops at the end of this call, so the
    /// erasure happens whether `f` succeeds, fails or panics.
    pub fn scoped<R>(self, f: impl FnOnce(&KeyMaterial) -> R) -> R {
        f(&self)
    }

    /// Low-S ECDSA signature over a 32-byte digest.
    pub fn sign_ecdsa(&self, digest: &Hash256) -> Result<EcdsaSignature, WalletError> {
        let msg = Message::from_digest(digest.0);
        self.with_secret_key(|sk| SECP256K1.sign_ecdsa(&msg, sk))
    }

    /// BIP340 signature. With `tap_tweak` set the key is first tweaked as a
    /// Taproot output key (BIP341 key path).
    pub fn sign_schnorr(
        &self,
        digest: &Hash256,
        aux_rand: &[u8; 32],
        tap_tweak: Option<&Hash256>,
    ) -> Result<SchnorrSignature, WalletError> {
        let msg = Message::from_digest(digest.0);
        self.with_secret_key(|sk| {
            let keypair = Keypair::from_secret_key(SECP256K1, sk);
            let keypair = match tap_tweak {
                Some(tweak) => {
                    let scalar = Scalar::from_be_bytes(tweak.0)
                        .map_err(|_| WalletError::KeyDerivation("tap tweak out of range".into()))?;
                    keypair
                        .add_xonly_tweak(SECP256K1, &scalar)
                        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?
                }
                None => keypair,
            };
            let mut keypair = keypair;
            let sig = SECP256K1.sign_schnorr_with_aux_rand(&msg, &keypair, aux_rand);
            keypair.non_secure_erase();
            Ok(sig)
        })?
    }
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self { secret: self.secret, public: self.public }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A BIP32 master seed of 16 to 64 bytes.
///
/// Secret material is zeroized on drop to prevent leaking key material
/// in freed memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: Vec<u8>,
}

impl Seed {
    /// Generate a random seed of `len` bytes from the OS RNG.
    pub fn generate(len: usize) -> Result<Self, WalletError> {
        use rand::RngCore;
        check_seed_len(len)?;
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Ok(Self { bytes })
    }

    /// Copy a seed from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        check_seed_len(bytes.len())?;
        Ok(Self { bytes: bytes.to_vec() })
    }

    /// Get the raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn check_seed_len(len: usize) -> Result<(), WalletError> {
    if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&len) {
        return Err(WalletError::InvalidSeedLength(len));
    }
    Ok(())
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes.clone() }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Key material shared between threads; each use holds the lock for its
/// critical section only.
#[derive(Clone)]
pub struct SharedKey(Arc<Mutex<KeyMaterial>>);

impl SharedKey {
    pub fn new(key: KeyMaterial) -> Self {
        Self(Arc::new(Mutex::new(key)))
    }

    pub fn public_key(&self) -> PublicKey {
        self.0.lock().public_key()
    }

    /// Run `f` with the key locked.
    pub fn with<R>(&self, f: impl FnOnce(&KeyMaterial) -> R) -> R {
        let guard = self.0.lock();
        f(&guard)
    }

    /// Wipe the shared secret for every holder.
    pub fn erase(&self) {
        self.0.lock().erase();
    }

    pub fn is_erased(&self) -> bool {
        self.0.lock().is_erased()
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedKey").field(&self.public_key()).finish()
    }
}

/// A single shared key offered for every input. The lock is held while
/// the signature is made and no copy of the secret leaves it.
impl KeySource for SharedKey {
    fn with_key(&self, _index: usize, _prevout: &TxOut, sign: &mut dyn FnMut(&KeyMaterial)) -> bool {
        self.with(|key| {
            if key.is_erased() {
                return false;
            }
            sign(key);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> KeyMaterial {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        KeyMaterial::from_secret_bytes(bytes).unwrap()
    }

    fn assert_zeroize_on_drop<T: ZeroizeOnDrop>() {}
    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn secrets_zeroize_on_drop() {
        assert_zeroize_on_drop::<KeyMaterial>();
        assert_zeroize_on_drop::<Seed>();
        assert_send_sync::<KeyMaterial>();
        assert_send_sync::<SharedKey>();
    }

    #[test]
    fn generator_public_key() {
        let k = key(1);
        assert_eq!(
            hex::encode(k.public_key().serialize()),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(k.uncompressed_public_key()[0], 0x04);
    }

    #[test]
    fn invalid_secrets_rejected() {
        assert!(KeyMaterial::from_secret_bytes([0u8; 32]).is_err());
        assert!(KeyMaterial::from_secret_bytes([0xff; 32]).is_err());
    }

    #[test]
    fn erase_wipes_secret_and_blocks_signing() {
        let mut k = key(7);
        k.erase();
        assert!(k.is_erased());
        assert!(k.sign_ecdsa(&Hash256([1; 32])).is_err());
    }

    #[test]
    fn zeroize_trait_wipes_secret() {
        let mut k = KeyMaterial::generate();
        assert!(!k.is_erased());
        k.zeroize();
        assert!(k.is_erased());
    }

    /// Run the destructor in place and read what it left in the secret buffer.
    fn drop_and_read_secret(slot: &mut std::mem::ManuallyDrop<KeyMaterial>) -> [u8; 32] {
        let ptr: *mut KeyMaterial = &mut **slot;
        unsafe {
            std::ptr::drop_in_place(ptr);
            std::ptr::read(std::ptr::addr_of!((*ptr).secret))
        }
    }

    #[test]
    fn secret_buffer_zero_after_drop_on_success() {
        let mut slot = std::mem::ManuallyDrop::new(key(8));
        assert_ne!(slot.secret, [0u8; 32]);
        assert!(slot.sign_ecdsa(&Hash256([1; 32])).is_ok());
        assert!(slot.sign_schnorr(&Hash256([1; 32]), &[0; 32], None).is_ok());
        assert_eq!(drop_and_read_secret(&mut slot), [0u8; 32]);
    }

    #[test]
    fn secret_buffer_zero_after_drop_on_error() {
        let mut slot = std::mem::ManuallyDrop::new(key(8));
        // A tweak above the curve order fails inside the signing scope.
        let err = slot.sign_schnorr(&Hash256([1; 32]), &[0; 32], Some(&Hash256([0xff; 32])));
        assert!(err.is_err());
        assert_eq!(drop_and_read_secret(&mut slot), [0u8; 32]);
    }

    #[test]
    fn scoped_returns_closure_result_on_error_path() {
        let k = key(3);
        let result: Result<(), WalletError> = k.scoped(|km| {
            assert!(!km.is_erased());
            Err(WalletError::BuildError("boom".into()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn ecdsa_signature_verifies() {
        let k = key(9);
        let digest = Hash256([0x42; 32]);
        let sig = k.sign_ecdsa(&digest).unwrap();
        let msg = Message::from_digest(digest.0);
        assert!(SECP256K1.verify_ecdsa(&msg, &sig, &k.public_key()).is_ok());
    }

    #[test]
    fn bip340_vector_zero() {
        let k = key(3);
        let sig = k.sign_schnorr(&Hash256::ZERO, &[0u8; 32], None).unwrap();
        assert_eq!(
            hex::encode(k.x_only_public_key().0.serialize()).to_uppercase(),
            "F9308A019258C31049344F85F89D5229B531C845836F99B08601F113BCE036F9"
        );
        assert_eq!(
            hex::encode(sig.serialize()).to_uppercase(),
            "E907831F80848D1069A5371B402410364BDF1C5F8307B0084C55F1CE2DCA821525F66A4A85EA8B71E482A74F382D2CE5EBEEE8FDB2172F477DF4900D310536C0"
        );
    }

    #[test]
    fn tweaked_schnorr_verifies_against_output_key() {
        let k = key(5);
        let tweak = Hash256([0x11; 32]);
        let sig = k.sign_schnorr(&Hash256([2; 32]), &[0; 32], Some(&tweak)).unwrap();
        let (internal, _) = k.x_only_public_key();
        let (output, _) = internal
            .add_tweak(SECP256K1, &Scalar::from_be_bytes(tweak.0).unwrap())
            .unwrap();
        let msg = Message::from_digest([2; 32]);
        assert!(SECP256K1.verify_schnorr(&sig, &msg, &output).is_ok());
        assert!(SECP256K1.verify_schnorr(&sig, &msg, &internal).is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let k = key(0xab);
        let debug = format!("{k:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("00000000000000ab"));
        let seed = Seed::from_bytes(&[0xcd; 16]).unwrap();
        assert!(!format!("{seed:?}").contains("cd"));
    }

    #[test]
    fn seed_length_bounds() {
        assert_eq!(Seed::from_bytes(&[1; 15]).unwrap_err(), WalletError::InvalidSeedLength(15));
        assert_eq!(Seed::from_bytes(&[1; 65]).unwrap_err(), WalletError::InvalidSeedLength(65));
        assert_eq!(Seed::from_bytes(&[1; 64]).unwrap().len(), 64);
        assert_eq!(Seed::generate(32).unwrap().len(), 32);
    }

    #[test]
    fn shared_key_across_threads() {
        let shared = SharedKey::new(key(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared.with(|k| k.sign_ecdsa(&Hash256([i; 32])).map(|_| ()))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
        shared.erase();
        assert!(shared.is_erased());
        let prevout = TxOut { value: 1, script_pubkey: tapforge_core::Script::new() };
        assert!(!shared.with_key(0, &prevout, &mut |_| panic!("erased key lent out")));
    }

    #[test]
    fn shared_key_signs_under_the_lock() {
        let shared = SharedKey::new(key(6));
        let prevout = TxOut { value: 1, script_pubkey: tapforge_core::Script::new() };
        let mut signed = None;
        let lent = shared.with_key(0, &prevout, &mut |k| {
            assert!(shared.0.is_locked());
            // The lent key is the shared one, not a copy.
            assert!(std::ptr::eq(k, shared.0.data_ptr()));
            signed = Some(k.sign_ecdsa(&Hash256([5; 32])));
        });
        assert!(lent);
        assert!(signed.unwrap().is_ok());
        assert!(!shared.0.is_locked());
    }
}
