//! Commit identifiers and snapshot visibility.

use std::{collections::BTreeSet, fmt};

/// Identifier of the transaction that committed an insert or a mutation.
///
/// Commit identifiers are totally ordered; a larger value committed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn new(ts: u64) -> Self {
        Timestamp(ts)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The following identifier. Saturates at [`Timestamp::MAX`].
    pub const fn next(self) -> Self {
        Timestamp(self.0.saturating_add(1))
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Timestamp(ts)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hands out commit identifiers to a tablet's writers.
///
/// Writers hold the clock while they apply a write, so every identifier below
/// [`CommitClock::peek`] belongs to a finished write.
#[derive(Debug)]
pub struct CommitClock {
    upcoming: Timestamp,
}

impl CommitClock {
    pub fn starting_at(first: Timestamp) -> Self {
        Self { upcoming: first }
    }

    /// Identifier the next write will commit with.
    pub fn peek(&self) -> Timestamp {
        self.upcoming
    }

    /// Consume the identifier returned by [`CommitClock::peek`].
    pub fn advance(&mut self) -> Timestamp {
        let ts = self.upcoming;
        self.upcoming = ts.next();
        ts
    }
}

impl Default for CommitClock {
    fn default() -> Self {
        Self::starting_at(Timestamp::new(1))
    }
}

/// Immutable point-in-time visibility predicate.
///
/// Every timestamp strictly below `all_committed_before` is committed; above
/// that watermark only the explicitly listed timestamps are. This admits
/// out-of-order commits while keeping the common case a single comparison.
#[derive(Clone, PartialEq, Eq)]
pub struct MvccSnapshot {
    all_committed_before: Timestamp,
    committed: BTreeSet<Timestamp>,
}

impl MvccSnapshot {
    /// Snapshot in which every timestamp below `all_committed_before` is committed.
    pub fn new(all_committed_before: Timestamp) -> Self {
        Self {
            all_committed_before,
            committed: BTreeSet::new(),
        }
    }

    /// Snapshot that considers every transaction committed.
    pub fn including_all() -> Self {
        Self::new(Timestamp::MAX)
    }

    /// Snapshot that considers no transaction committed.
    pub fn including_none() -> Self {
        Self::new(Timestamp::MIN)
    }

    /// Add individually committed timestamps above the watermark.
    pub fn with_committed(mut self, timestamps: impl IntoIterator<Item = Timestamp>) -> Self {
        let watermark = self.all_committed_before;
        self.committed
            .extend(timestamps.into_iter().filter(|ts| *ts >= watermark));
        self
    }

    /// Whether the transaction that committed at `ts` is visible in this snapshot.
    #[inline]
    pub fn is_committed(&self, ts: Timestamp) -> bool {
        ts < self.all_committed_before || self.committed.contains(&ts)
    }

    /// Watermark below which everything is committed.
    pub fn all_committed_before(&self) -> Timestamp {
        self.all_committed_before
    }

    /// Returns true if every transaction committed in `other` is committed in `self`.
    ///
    /// Conservative: a snapshot whose watermark is lower than `other`'s is never
    /// reported as a superset, even if its explicit set happens to cover the gap.
    pub fn includes_all_of(&self, other: &MvccSnapshot) -> bool {
        self.all_committed_before >= other.all_committed_before
            && other.committed.iter().all(|ts| self.is_committed(*ts))
    }
}

impl fmt::Debug for MvccSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for MvccSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MvccSnapshot[committed={{T|T < {}", self.all_committed_before)?;
        if !self.committed.is_empty() {
            write!(f, " or T in {{")?;
            for (idx, ts) in self.committed.iter().enumerate() {
                if idx > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", ts)?;
            }
            write!(f, "}}")?;
        }
        write!(f, "}}]")
    }
}
