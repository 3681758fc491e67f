//! Identity atoms
//!
//! TlfId: top-level folder being journaled
//! BranchId: fork identifier; the all-zero value is the merged trunk
//! MdId: content fingerprint of an encoded metadata revision
//! UserId: owner of the writing device

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::digest::Sha256;
use super::error::InvalidId;

fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], String> {
    if s.len() != N * 2 {
        return Err(format!("must be {} hex chars (got {})", N * 2, s.len()));
    }
    let mut bytes = [0u8; N];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hex = std::str::from_utf8(chunk).map_err(|_| "contains invalid UTF-8".to_string())?;
        bytes[i] =
            u8::from_str_radix(hex, 16).map_err(|_| format!("contains invalid hex: {}", hex))?;
    }
    Ok(bytes)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Top-level folder identifier - 16 opaque bytes, hex-displayed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TlfId([u8; 16]);

impl TlfId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, InvalidId> {
        parse_hex(s).map(Self).map_err(|reason| InvalidId::Tlf {
            raw: s.to_string(),
            reason,
        })
    }
}

impl fmt::Debug for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlfId({})", self.to_hex())
    }
}

impl fmt::Display for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Branch identifier - 16 random bytes.
///
/// `BranchId::NULL` is the merged (trunk) branch; every other value names an
/// unmerged local fork awaiting conflict resolution.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId([u8; 16]);

impl BranchId {
    pub const NULL: BranchId = BranchId([0u8; 16]);

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh non-null branch identifier.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 16];
        loop {
            rng.fill_bytes(&mut bytes);
            if bytes != [0u8; 16] {
                return Self(bytes);
            }
        }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, InvalidId> {
        parse_hex(s).map(Self).map_err(|reason| InvalidId::Branch {
            raw: s.to_string(),
            reason,
        })
    }
}

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", self.to_hex())
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Metadata identifier - SHA256 of the canonical encoding of a stored
/// revision. Two revisions are equal iff their MdIds match.
///
/// The zero value is a sentinel: it is the `prev_root` of the first revision
/// in a folder and must never identify a stored object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MdId(Sha256);

impl MdId {
    pub const NULL: MdId = MdId(Sha256([0u8; 32]));

    pub fn from_digest(digest: Sha256) -> Self {
        Self(digest)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn from_hex(s: &str) -> Result<Self, InvalidId> {
        parse_hex(s)
            .map(|bytes| Self(Sha256(bytes)))
            .map_err(|reason| InvalidId::Md {
                raw: s.to_string(),
                reason,
            })
    }
}

impl fmt::Debug for MdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MdId({})", self.to_hex())
    }
}

impl fmt::Display for MdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

macro_rules! hex_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(TlfId);
hex_serde!(BranchId);
hex_serde!(MdId);

/// User identifier - non-empty string.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidId> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::User {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({:?})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
