//! Safety checks that a transaction can enforce or suppress.

use std::fmt;

/// A named invariant enforced on behalf of application code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Check {
    /// A query fanned out to every shard.
    FullScatter,
    /// A query scanned a table without an index.
    TableScan,
    /// One transaction wrote to more than one entity group.
    Cowrite,
}

impl Check {
    /// Every check, in declaration order.
    pub const ALL: [Check; 3] = [Check::FullScatter, Check::TableScan, Check::Cowrite];

    const fn bit(self) -> u8 {
        match self {
            Check::FullScatter => 1,
            Check::TableScan => 1 << 1,
            Check::Cowrite => 1 << 2,
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::FullScatter => "FULL_SCATTER",
            Check::TableScan => "TABLE_SCAN",
            Check::Cowrite => "COWRITE",
        };
        f.write_str(name)
    }
}

/// An immutable set of checks.
///
/// `CheckSet` is `Copy`: deriving a set with one more or one fewer check
/// produces a new value and never changes the set it was derived from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CheckSet(u8);

impl CheckSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The set of every check.
    #[must_use]
    pub const fn all() -> Self {
        Self(Check::FullScatter.bit() | Check::TableScan.bit() | Check::Cowrite.bit())
    }

    /// Builds a set from a slice of checks.
    #[must_use]
    pub fn of(checks: &[Check]) -> Self {
        checks.iter().copied().collect()
    }

    /// Returns true if `check` is in the set.
    #[must_use]
    pub const fn contains(self, check: Check) -> bool {
        self.0 & check.bit() != 0
    }

    /// Returns a copy of the set with `check` added.
    #[must_use]
    pub const fn with(self, check: Check) -> Self {
        Self(self.0 | check.bit())
    }

    /// Returns a copy of the set with `check` removed.
    #[must_use]
    pub const fn without(self, check: Check) -> Self {
        Self(self.0 & !check.bit())
    }

    /// Returns the union of two sets.
    #[must_use]
    pub const fn union(self, other: CheckSet) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the number of checks in the set.
    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates the checks in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Check> {
        Check::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Check> for CheckSet {
    fn from_iter<I: IntoIterator<Item = Check>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), CheckSet::with)
    }
}

impl fmt::Debug for CheckSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
