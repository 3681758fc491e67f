//! Metadata revision ordinals.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidId;

/// Width of an on-disk ordinal file name, in hex digits.
pub const REVISION_NAME_WIDTH: usize = 16;

/// Revision number of a metadata object within a folder.
///
/// Revisions are strictly monotonic with no gaps; `Revision::FIRST` is the
/// first valid revision and zero is the uninitialized sentinel.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    pub const UNINITIALIZED: Revision = Revision(0);
    pub const FIRST: Revision = Revision(1);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn is_initialized(&self) -> bool {
        self.0 > 0
    }

    /// The successor revision.
    pub fn next(&self) -> Revision {
        Revision(self.0 + 1)
    }

    /// Fixed-width lowercase-hex form used for ordinal file names.
    pub fn file_name(&self) -> String {
        format!("{:0width$x}", self.0, width = REVISION_NAME_WIDTH)
    }

    pub fn from_file_name(name: &str) -> Result<Self, InvalidId> {
        if name.len() != REVISION_NAME_WIDTH {
            return Err(InvalidId::Revision {
                raw: name.to_string(),
                reason: format!("must be {} hex chars (got {})", REVISION_NAME_WIDTH, name.len()),
            });
        }
        u64::from_str_radix(name, 16)
            .map(Revision)
            .map_err(|_| InvalidId::Revision {
                raw: name.to_string(),
                reason: "contains invalid hex".into(),
            })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments() {
        assert_eq!(Revision::FIRST.next(), Revision::new(2));
        assert_eq!(Revision::UNINITIALIZED.next(), Revision::FIRST);
    }

    #[test]
    fn file_name_is_fixed_width() {
        let rev = Revision::new(0xfff);
        assert_eq!(rev.file_name(), "0000000000000fff");
        assert_eq!(Revision::from_file_name(&rev.file_name()).unwrap(), rev);
    }

    #[test]
    fn from_file_name_rejects_short_and_bad() {
        assert!(Revision::from_file_name("fff").is_err());
        assert!(Revision::from_file_name("000000000000000g").is_err());
    }
}
