//! Content fingerprinting for encoded metadata objects.

use sha2::{Digest, Sha256 as Sha2};

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256(pub [u8; 32]);

impl Sha256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

pub fn sha256_bytes(data: &[u8]) -> Sha256 {
    let mut hasher = Sha2::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    Sha256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable() {
        let a = sha256_bytes(b"md journal");
        let b = sha256_bytes(b"md journal");
        assert_eq!(a, b);
        assert_ne!(a, sha256_bytes(b"md journa1"));
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn zero_digest_is_zero() {
        assert!(Sha256([0u8; 32]).is_zero());
        assert!(!sha256_bytes(b"").is_zero());
    }
}
