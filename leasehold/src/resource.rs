use std::cmp::Ordering;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Coarse category of shared state guarded by the lease table.
///
/// The discriminant is the global acquisition rank: any code path that needs
/// more than one kind at once must take them in ascending rank.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResourceKind {
    /// The lease table itself.
    Lock = 0,
    /// Aggregated and raw counters.
    Counter = 1,
    /// Job rows and their parameters/states.
    Job = 2,
    /// List entries.
    List = 3,
    /// Sorted set entries.
    Set = 4,
    /// Hash entries.
    Hash = 5,
    /// Job queue entries.
    Queue = 6,
}

impl ResourceKind {
    /// Number of kinds.
    pub const COUNT: usize = 7;

    /// Every kind, in rank order.
    pub const ALL: [ResourceKind; Self::COUNT] = [
        ResourceKind::Lock,
        ResourceKind::Counter,
        ResourceKind::Job,
        ResourceKind::List,
        ResourceKind::Set,
        ResourceKind::Hash,
        ResourceKind::Queue,
    ];

    /// Position of this kind in the global acquisition order.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Lock => "lock",
            ResourceKind::Counter => "counter",
            ResourceKind::Job => "job",
            ResourceKind::List => "list",
            ResourceKind::Set => "set",
            ResourceKind::Hash => "hash",
            ResourceKind::Queue => "queue",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive ordinal comparison of two resource names.
///
/// Compares char by char after simple lowercasing, so the result does not
/// depend on the process locale.
pub fn compare_resources(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// A resource name qualified by its kind.
///
/// Keys sort by kind rank, then case-insensitively by name. Names that differ
/// only by case fall back to a raw ordinal comparison so that the order is
/// strict and every caller derives the same sequence.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub resource: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, resource: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.resource
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .rank()
            .cmp(&other.kind.rank())
            .then_with(|| compare_resources(&self.resource, &other.resource))
            .then_with(|| self.resource.cmp(&other.resource))
    }
}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.resource)
    }
}

/// Sorts keys into global acquisition order and drops exact duplicates.
pub fn acquisition_order(
    keys: impl IntoIterator<Item = ResourceKey>,
) -> Vec<ResourceKey> {
    let mut keys: Vec<ResourceKey> = keys.into_iter().collect();
    keys.sort();
    keys.dedup();
    keys
}
