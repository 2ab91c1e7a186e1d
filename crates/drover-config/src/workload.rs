//! Queue partitions and the per-worker workload derived from configuration.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Queue name that matches every queue.
pub const MATCH_ALL_QUEUE: &str = "*";

/// The set of named queues assigned to one worker process.
///
/// Partitions are written as comma-separated queue lists (`"high,low"`); the
/// order is preserved because workers poll queues in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    queues: Vec<String>,
}

impl Partition {
    /// Builds a partition from queue names, rejecting blank entries.
    pub fn new<I, S>(queues: I) -> Result<Self, PartitionParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = queues
            .into_iter()
            .map(Into::into)
            .map(|queue| queue.trim().to_owned())
            .collect::<Vec<_>>();
        if queues.is_empty() {
            return Err(PartitionParseError::Empty);
        }
        if let Some(position) = queues.iter().position(String::is_empty) {
            return Err(PartitionParseError::BlankQueue { position });
        }
        Ok(Self { queues })
    }

    /// Partition that consumes every queue.
    pub fn match_all() -> Self {
        Self {
            queues: vec![MATCH_ALL_QUEUE.to_owned()],
        }
    }

    /// Queue names in polling order.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Whether the partition is the single wildcard queue.
    pub fn is_match_all(&self) -> bool {
        matches!(self.queues.as_slice(), [only] if only == MATCH_ALL_QUEUE)
    }
}

impl FromStr for Partition {
    type Err = PartitionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Err(PartitionParseError::Empty);
        }
        Self::new(raw.split(','))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.queues.join(","))
    }
}

/// Errors raised while parsing a [`Partition`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionParseError {
    /// No queue names were supplied.
    #[error("partition must name at least one queue")]
    Empty,
    /// A queue name was blank, e.g. `"a,,b"`.
    #[error("queue name at position {position} is blank")]
    BlankQueue {
        /// Zero-based position of the blank entry.
        position: usize,
    },
}

/// Ordered partitions, one per worker; the length is the worker count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    partitions: Vec<Partition>,
}

impl Workload {
    /// Workload from explicit partitions.
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    /// `count` workers sharing the same partition.
    pub fn repeated(partition: &Partition, count: usize) -> Self {
        Self {
            partitions: vec![partition.clone(); count],
        }
    }

    /// Number of workers the workload describes.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether no workers are requested.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Partitions in fork order.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Iterates partitions in fork order.
    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }
}

impl<'a> IntoIterator for &'a Workload {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Partition> for Workload {
    fn from_iter<T: IntoIterator<Item = Partition>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a", &["a"])]
    #[case("high, low", &["high", "low"])]
    #[case("*", &["*"])]
    fn parses_queue_lists(#[case] raw: &str, #[case] expected: &[&str]) {
        let partition: Partition = raw.parse().expect("partition should parse");
        assert_eq!(partition.queues(), expected);
    }

    #[rstest]
    #[case("", PartitionParseError::Empty)]
    #[case("  ", PartitionParseError::Empty)]
    #[case("a,,b", PartitionParseError::BlankQueue { position: 1 })]
    fn rejects_malformed_lists(#[case] raw: &str, #[case] expected: PartitionParseError) {
        assert_eq!(raw.parse::<Partition>(), Err(expected));
    }

    #[test]
    fn display_joins_queues_in_order() {
        let partition: Partition = "high, low".parse().expect("partition should parse");
        assert_eq!(partition.to_string(), "high,low");
    }

    #[test]
    fn match_all_is_detected() {
        assert!(Partition::match_all().is_match_all());
        let partition: Partition = "*,a".parse().expect("partition should parse");
        assert!(!partition.is_match_all());
    }

    #[test]
    fn repeated_workload_has_requested_length() {
        let workload = Workload::repeated(&Partition::match_all(), 3);
        assert_eq!(workload.len(), 3);
        assert!(workload.iter().all(Partition::is_match_all));
    }
}
