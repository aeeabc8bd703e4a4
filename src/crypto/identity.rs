//! Per-database RSA identity.
//!
//! A database owns exactly one keypair. Record payloads are encrypted with
//! the public half (PKCS#1 v1.5, one block per payload) and decrypted with
//! the private half. The peer identity is the base58 SHA-256 multihash of
//! the DER-encoded public key, which is what the naming system publishes
//! under.

use std::fmt;

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::crypto::error::{CryptoError, CryptoResult};

/// multihash prefix: sha2-256, 32 byte digest
const MULTIHASH_SHA256: [u8; 2] = [0x12, 0x20];

/// PKCS#1 v1.5 padding overhead per block
const PKCS1_OVERHEAD: usize = 11;

/// A named keypair. Immutable once created.
#[derive(Clone)]
pub struct Identity {
    name: String,
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl Identity {
    /// Generate a fresh keypair with a modulus of `bits` bits.
    pub fn generate(name: impl Into<String>, bits: usize) -> CryptoResult<Self> {
        let mut rng = rand::thread_rng();
        let private =
            RsaPrivateKey::new(&mut rng, bits).map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_private(name.into(), private))
    }

    /// Parse a PKCS#8 DER private key.
    pub fn from_pkcs8_der(name: impl Into<String>, der: &[u8]) -> CryptoResult<Self> {
        let name = name.into();
        let private = RsaPrivateKey::from_pkcs8_der(der).map_err(|e| CryptoError::KeyLoad {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_private(name, private))
    }

    fn from_private(name: String, private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { name, private, public }
    }

    /// PKCS#8 DER encoding of the private key.
    pub fn to_pkcs8_der(&self) -> CryptoResult<Vec<u8>> {
        let document = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }

    /// the keystore name this identity was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// modulus size in bits
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }

    /// Largest plaintext `encrypt` accepts.
    pub fn max_payload(&self) -> usize {
        self.public.size().saturating_sub(PKCS1_OVERHEAD)
    }

    /// Encrypt `plaintext` with the public key.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let max = self.max_payload();
        if plaintext.len() > max {
            return Err(CryptoError::PayloadTooLarge {
                len: plaintext.len(),
                max,
            });
        }
        let mut rng = rand::thread_rng();
        self.public
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }

    /// Decrypt `ciphertext` with the private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Stable identifier derived from the public key.
    pub fn peer_id(&self) -> CryptoResult<String> {
        let der = self
            .public
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let digest = Sha256::digest(der.as_bytes());

        let mut multihash = Vec::with_capacity(MULTIHASH_SHA256.len() + digest.len());
        multihash.extend_from_slice(&MULTIHASH_SHA256);
        multihash.extend_from_slice(&digest);
        Ok(bs58::encode(multihash).into_string())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("bits", &self.bits())
            .field("private", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// Key generation is the slowest thing in the test suite, share one key.
    pub(crate) fn test_identity() -> Identity {
        static IDENTITY: OnceLock<Identity> = OnceLock::new();
        IDENTITY
            .get_or_init(|| Identity::generate("test", 1024).unwrap())
            .clone()
    }

    #[test]
    fn test_encrypt_and_decrypt() {
        let identity = test_identity();
        let plain = b"Some value";

        let enc = identity.encrypt(plain).unwrap();
        assert_ne!(enc.as_slice(), plain.as_slice());
        assert_eq!(enc.len(), 128);

        let dec = identity.decrypt(&enc).unwrap();
        assert_eq!(dec, plain);
    }

    #[test]
    fn test_encryption_is_randomized() {
        let identity = test_identity();
        let a = identity.encrypt(b"same").unwrap();
        let b = identity.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_payload_limit() {
        let identity = test_identity();
        assert_eq!(identity.bits(), 1024);
        assert_eq!(identity.max_payload(), 117);

        assert!(identity.encrypt(&[b'x'; 117]).is_ok());
        let err = identity.encrypt(&[b'x'; 118]).unwrap_err();
        assert!(matches!(err, CryptoError::PayloadTooLarge { len: 118, max: 117 }));
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let identity = test_identity();
        assert!(matches!(identity.decrypt(b"not ciphertext"), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_decrypt_with_foreign_key_fails() {
        let identity = test_identity();
        let other = Identity::generate("other", 1024).unwrap();
        let enc = identity.encrypt(b"secret").unwrap();
        assert!(other.decrypt(&enc).is_err());
    }

    #[test]
    fn test_peer_id_is_multihash() {
        let identity = test_identity();
        let id = identity.peer_id().unwrap();
        assert!(id.starts_with("Qm"), "unexpected peer id {}", id);
        assert_eq!(id.len(), 46);
        assert_eq!(identity.peer_id().unwrap(), id);
    }

    #[test]
    fn test_pkcs8_roundtrip_keeps_peer_id() {
        let identity = test_identity();
        let der = identity.to_pkcs8_der().unwrap();
        let restored = Identity::from_pkcs8_der("restored", &der).unwrap();

        assert_eq!(restored.name(), "restored");
        assert_eq!(restored.peer_id().unwrap(), identity.peer_id().unwrap());
        let enc = identity.encrypt(b"cross").unwrap();
        assert_eq!(restored.decrypt(&enc).unwrap(), b"cross");
    }

    #[test]
    fn test_from_invalid_der() {
        let err = Identity::from_pkcs8_der("broken", b"garbage").unwrap_err();
        assert!(err.is_identity());
    }
}
