//! Access tiers that decide who may read an object and where it lives on disk.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Access tier recorded for every stored object.
///
/// The tier is part of the signed option set, is written to the metadata
/// sidecar on publish, and selects the on-disk leaf name: private objects are
/// dot-hidden, public ones are not.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Access {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
}

impl Access {
    pub const ALL: [Access; 3] = [Access::Private, Access::PublicRead, Access::PublicReadWrite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Private => "private",
            Access::PublicRead => "public-read",
            Access::PublicReadWrite => "public-read-write",
        }
    }

    /// Whether an unauthenticated GET may serve the object.
    pub fn is_public(&self) -> bool {
        !matches!(self, Access::Private)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Access::ALL
            .into_iter()
            .find(|access| access.as_str() == value)
            .ok_or_else(|| {
                format!(
                    "Invalid enum value. Expected 'private' | 'public-read' | 'public-read-write', received '{}'",
                    value
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tier() {
        for access in Access::ALL {
            assert_eq!(access.as_str().parse::<Access>().unwrap(), access);
        }
        assert!("public".parse::<Access>().is_err());
        assert!("PRIVATE".parse::<Access>().is_err());
    }

    #[test]
    fn serializes_as_kebab_case() {
        let json = serde_json::to_string(&Access::PublicReadWrite).unwrap();
        assert_eq!(json, "\"public-read-write\"");
        assert_eq!(Access::default(), Access::Private);
        assert!(!Access::Private.is_public());
        assert!(Access::PublicRead.is_public());
    }
}
