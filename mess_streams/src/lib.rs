#![warn(clippy::missing_const_for_fn, clippy::must_use_candidate)]

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub mod clock;
pub mod error;
pub mod rusqlite;
pub mod store;

pub use store::Store;

/// Server-assigned id of a stream entry: milliseconds of the append time
/// and a sequence number for entries appended in the same millisecond.
///
/// ```
/// use mess_streams::EntryId;
///
/// let id: EntryId = "1526919030474-55".parse().unwrap();
/// assert_eq!(id, EntryId::new(1526919030474, 55));
/// assert_eq!(id.to_string(), "1526919030474-55");
/// assert_eq!("42".parse::<EntryId>().unwrap(), EntryId::new(42, 0));
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub const MIN: Self = Self::new(0, 0);
    pub const MAX: Self = Self::new(u64::MAX, u64::MAX);

    #[must_use]
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The smallest id greater than this one.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.seq == u64::MAX {
            Self::new(self.ms.saturating_add(1), 0)
        } else {
            Self::new(self.ms, self.seq + 1)
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidId(s.to_owned());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, Some(seq)),
            None => (s, None),
        };
        let ms = ms.parse().map_err(|_| invalid())?;
        let seq = match seq {
            Some(seq) => seq.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self::new(ms, seq))
    }
}

impl TryFrom<String> for EntryId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(value: EntryId) -> Self {
        value.to_string()
    }
}

/// Where a new consumer group starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartId {
    /// Only entries appended after the group is created (`$`).
    #[default]
    Latest,
    /// Entries with ids greater than the given one.
    Id(EntryId),
}

impl fmt::Display for StartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("$"),
            Self::Id(id) => id.fmt(f),
        }
    }
}

impl FromStr for StartId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$" => Ok(Self::Latest),
            id => id.parse().map(Self::Id),
        }
    }
}

impl TryFrom<String> for StartId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StartId> for String {
    fn from(value: StartId) -> Self {
        value.to_string()
    }
}

impl From<EntryId> for StartId {
    fn from(value: EntryId) -> Self {
        Self::Id(value)
    }
}

/// Ordered name/value pairs of an entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<(String, Vec<u8>)>);

impl Fields {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.push((name.into(), value.into()));
    }

    /// Value of the first field called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Fields
where
    N: Into<String>,
    V: Into<Vec<u8>>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Which entries a group read returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to any consumer of the group (`>`).
    #[default]
    New,
    /// This consumer's pending entries with ids greater than the given one.
    Pending(EntryId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Block {
    #[default]
    No,
    Forever,
    Timeout(Duration),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadGroupArgs {
    pub group: String,
    pub consumer: String,
    pub stream: String,
    pub from: ReadFrom,
    pub count: Option<usize>,
    pub block: Block,
    pub no_ack: bool,
}

impl ReadGroupArgs {
    #[must_use]
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            stream: stream.into(),
            from: ReadFrom::New,
            count: None,
            block: Block::No,
            no_ack: false,
        }
    }

    #[must_use]
    pub const fn read_from(mut self, from: ReadFrom) -> Self {
        self.from = from;
        self
    }

    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub const fn block(mut self, block: Block) -> Self {
        self.block = block;
        self
    }

    #[must_use]
    pub const fn no_ack(mut self, no_ack: bool) -> Self {
        self.no_ack = no_ack;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingSummary {
    pub count: u64,
    pub lowest: Option<EntryId>,
    pub highest: Option<EntryId>,
    pub consumers: Vec<(String, u64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutoClaim {
    /// Where the next claim scan should start; `0-0` once the scan has
    /// covered the whole pending list.
    pub next: EntryId,
    pub claimed: Vec<Entry>,
}
