//! Device signing keys and signatures over canonical metadata bytes.

use std::fmt;

use ed25519_dalek::{Signature, SignatureError, SigningKey, VerifyingKey};
use rand_core::CryptoRngCore;

/// A signature together with the verifying key that produced it.
///
/// The verifying key doubles as the identity of the signing device: the
/// journal only accepts entries whose writer signature carries the current
/// device's key.
#[derive(Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    signature: Signature,
    verifying_key: VerifyingKey,
}

impl SignatureInfo {
    pub fn new(signature: Signature, verifying_key: VerifyingKey) -> Self {
        Self {
            signature,
            verifying_key,
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Strictly verify this signature over `msg`.
    pub fn verify(&self, msg: &[u8]) -> Result<(), SignatureError> {
        self.verifying_key.verify_strict(msg, &self.signature)
    }
}

impl fmt::Debug for SignatureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureInfo")
            .field("verifying_key", &hex_prefix(self.verifying_key.as_bytes()))
            .field("signature", &hex_prefix(&self.signature.to_bytes()))
            .finish()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{:02x}", b)).collect::<String>() + "…"
}

/// Produces signatures on behalf of the current device.
///
/// Injected rather than owned so the journal never holds private key
/// material; a caller-side keystore implements it.
pub trait Signer {
    fn sign(&self, msg: &[u8]) -> SignatureInfo;
    fn verifying_key(&self) -> VerifyingKey;
}

/// In-process signer wrapping an ed25519 signing key.
#[derive(Clone)]
pub struct DeviceSigner {
    signing_key: SigningKey,
}

impl DeviceSigner {
    /// Create a signer with a random key.
    pub fn generate<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Self {
        Self {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }
}

impl Signer for DeviceSigner {
    fn sign(&self, msg: &[u8]) -> SignatureInfo {
        use ed25519_dalek::Signer as _;
        SignatureInfo::new(self.signing_key.sign(msg), self.signing_key.verifying_key())
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for DeviceSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSigner")
            .field(
                "verifying_key",
                &hex_prefix(self.signing_key.verifying_key().as_bytes()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let signer = DeviceSigner::from_bytes(&[7u8; 32]);
        let info = signer.sign(b"writer metadata");
        assert!(info.verify(b"writer metadata").is_ok());
        assert!(info.verify(b"writer metadatA").is_err());
        assert_eq!(info.verifying_key(), &signer.verifying_key());
    }

    #[test]
    fn different_keys_do_not_cross_verify() {
        let a = DeviceSigner::from_bytes(&[1u8; 32]);
        let b = DeviceSigner::from_bytes(&[2u8; 32]);
        let info = a.sign(b"payload");
        assert!(b.verifying_key() != a.verifying_key());
        assert!(
            b.verifying_key()
                .verify_strict(b"payload", info.signature())
                .is_err()
        );
    }
}
