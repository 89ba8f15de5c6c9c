//! Keyspaces, shards and key ranges.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Keyspace reported for backends that are not sharded.
pub const SINGLE_KEYSPACE: &str = "keyspace";

/// Shard name reported for backends that are not sharded.
pub const SINGLE_SHARD: &str = "0";

/// The shards visible for a cluster.
pub type ShardSet = BTreeSet<Shard>;

/// Returns the shard set of a backend that is not sharded.
#[must_use]
pub fn single_shard_set() -> ShardSet {
    BTreeSet::from([Shard::new(Keyspace::new(SINGLE_KEYSPACE), SINGLE_SHARD)])
}

/// A logical database of a sharded cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyspace(String);

impl Keyspace {
    /// Creates a keyspace.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the keyspace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One partition of a keyspace, e.g. `commerce/-80`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shard {
    keyspace: Keyspace,
    name: String,
}

impl Shard {
    /// Creates a shard.
    pub fn new(keyspace: Keyspace, name: impl Into<String>) -> Self {
        Self {
            keyspace,
            name: name.into(),
        }
    }

    /// Parses `<keyspace>/<shard>`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either part is missing.
    pub fn parse(value: &str) -> CoreResult<Self> {
        match value.trim().split_once('/') {
            Some((keyspace, name)) if !keyspace.is_empty() && !name.is_empty() => {
                Ok(Self::new(Keyspace::new(keyspace), name))
            }
            _ => Err(CoreError::invalid_argument(format!(
                "malformed shard '{value}', expected <keyspace>/<shard>"
            ))),
        }
    }

    /// Returns the keyspace.
    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Returns the shard name within its keyspace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the keyspace-id range served by this shard.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the name is not a hex range.
    pub fn key_range(&self) -> CoreResult<KeyRange> {
        KeyRange::parse(&self.name)
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.keyspace, self.name)
    }
}

impl FromStr for Shard {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Half-open range `[start, end)` of keyspace ids. Empty bounds are open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl KeyRange {
    /// The range covering every keyspace id.
    #[must_use]
    pub fn full() -> Self {
        Self::default()
    }

    /// Parses a shard name such as `-80`, `40-80`, `80-`, `0` or `-`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for anything that is not two hex bounds
    /// separated by one dash.
    pub fn parse(name: &str) -> CoreResult<Self> {
        if name == SINGLE_SHARD || name == "-" {
            return Ok(Self::full());
        }
        let (start, end) = name.split_once('-').ok_or_else(|| {
            CoreError::invalid_argument(format!("shard name '{name}' is not a key range"))
        })?;
        let range = Self {
            start: decode_hex(start)?,
            end: decode_hex(end)?,
        };
        if !range.end.is_empty() && range.start >= range.end {
            return Err(CoreError::invalid_argument(format!(
                "shard name '{name}' is an empty key range"
            )));
        }
        Ok(range)
    }

    /// Inclusive lower bound; empty means unbounded.
    #[must_use]
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// Exclusive upper bound; empty means unbounded.
    #[must_use]
    pub fn end(&self) -> &[u8] {
        &self.end
    }

    /// Returns true if `keyspace_id` falls inside the range.
    #[must_use]
    pub fn contains(&self, keyspace_id: &[u8]) -> bool {
        keyspace_id >= self.start.as_slice()
            && (self.end.is_empty() || keyspace_id < self.end.as_slice())
    }
}

fn decode_hex(value: &str) -> CoreResult<Vec<u8>> {
    if value.len() % 2 != 0 {
        return Err(CoreError::invalid_argument(format!(
            "odd-length key range bound '{value}'"
        )));
    }
    (0..value.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&value[i..i + 2], 16).map_err(|_| {
                CoreError::invalid_argument(format!("invalid hex in key range bound '{value}'"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_and_display() {
        let shard = Shard::parse("commerce/-80").unwrap();
        assert_eq!(shard.keyspace().name(), "commerce");
        assert_eq!(shard.name(), "-80");
        assert_eq!(shard.to_string(), "commerce/-80");
        assert_eq!("commerce/-80".parse::<Shard>().unwrap(), shard);
    }

    #[test]
    fn malformed_shards_are_rejected() {
        for value in ["", "commerce", "/-80", "commerce/"] {
            assert!(matches!(
                Shard::parse(value),
                Err(CoreError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn single_shard_set_is_a_singleton() {
        let set = single_shard_set();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().to_string(), "keyspace/0");
    }

    #[test]
    fn key_ranges() {
        let low = KeyRange::parse("-80").unwrap();
        assert!(low.contains(&[0x00]));
        assert!(low.contains(&[0x7f, 0xff]));
        assert!(!low.contains(&[0x80]));

        let high = KeyRange::parse("80-").unwrap();
        assert!(high.contains(&[0x80]));
        assert!(high.contains(&[0xff, 0xff]));
        assert!(!high.contains(&[0x10]));

        let middle = KeyRange::parse("40-80").unwrap();
        assert_eq!(middle.start(), &[0x40]);
        assert_eq!(middle.end(), &[0x80]);
        assert!(middle.contains(&[0x40]));
        assert!(!middle.contains(&[0x80]));

        assert!(KeyRange::parse("0").unwrap().contains(&[0xab]));
        assert!(KeyRange::parse("-").unwrap().contains(&[]));
    }

    #[test]
    fn bad_key_ranges() {
        assert!(KeyRange::parse("80").is_err());
        assert!(KeyRange::parse("8-").is_err());
        assert!(KeyRange::parse("zz-").is_err());
        assert!(KeyRange::parse("80-40").is_err());
    }

    proptest! {
        #[test]
        fn shard_display_round_trips(keyspace in "[a-z_]{1,12}", name in "[0-9a-f-]{1,8}") {
            let shard = Shard::new(Keyspace::new(keyspace), name);
            prop_assert_eq!(Shard::parse(&shard.to_string()).unwrap(), shard);
        }

        #[test]
        fn split_ranges_partition_the_space(split in 1u8..=255, id in any::<u8>()) {
            let low = KeyRange::parse(&format!("-{split:02x}")).unwrap();
            let high = KeyRange::parse(&format!("{split:02x}-")).unwrap();
            prop_assert!(low.contains(&[id]) != high.contains(&[id]));
        }
    }
}
