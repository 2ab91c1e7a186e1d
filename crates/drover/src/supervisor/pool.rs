//! Bookkeeping for live worker processes.

use nix::unistd::Pid;

use drover_config::Partition;

/// A forked worker the supervisor is responsible for.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    pid: Pid,
    index: usize,
    partition: Partition,
}

impl PoolEntry {
    /// Records a worker forked for the partition at `index`.
    pub fn new(pid: Pid, index: usize, partition: Partition) -> Self {
        Self {
            pid,
            index,
            partition,
        }
    }

    /// PID of the worker.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Position of the partition within the workload.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Queues the worker consumes.
    pub fn partition(&self) -> &Partition {
        &self.partition
    }
}

/// Live workers in fork order.
///
/// Entries are added after a successful fork and removed only when the child
/// has been reaped, so every PID here names a process that has not yet been
/// waited for.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorkerPool {
    entries: Vec<PoolEntry>,
}

impl WorkerPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: PoolEntry) {
        self.entries.push(entry);
    }

    /// Removes the entry for a reaped worker.
    pub(crate) fn remove(&mut self, pid: Pid) -> Option<PoolEntry> {
        let position = self.entries.iter().position(|entry| entry.pid == pid)?;
        Some(self.entries.remove(position))
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live workers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no workers are running.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// PIDs of the live workers in fork order.
    pub fn pids(&self) -> Vec<Pid> {
        self.entries.iter().map(PoolEntry::pid).collect()
    }

    /// Whether `pid` belongs to the pool.
    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|entry| entry.pid == pid)
    }

    /// Iterates over the live workers in fork order.
    pub fn iter(&self) -> std::slice::Iter<'_, PoolEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a WorkerPool {
    type Item = &'a PoolEntry;
    type IntoIter = std::slice::Iter<'a, PoolEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: i32, index: usize) -> PoolEntry {
        PoolEntry::new(Pid::from_raw(pid), index, Partition::match_all())
    }

    #[test]
    fn removal_keeps_fork_order() {
        let mut pool = WorkerPool::new();
        pool.push(entry(10, 0));
        pool.push(entry(11, 1));
        pool.push(entry(12, 2));

        let removed = pool.remove(Pid::from_raw(11)).expect("entry should exist");
        assert_eq!(removed.index(), 1);
        assert_eq!(pool.pids(), [Pid::from_raw(10), Pid::from_raw(12)]);
        assert!(pool.remove(Pid::from_raw(11)).is_none());
    }

    #[test]
    fn clear_empties_the_pool() {
        let mut pool = WorkerPool::new();
        pool.push(entry(10, 0));
        assert!(pool.contains(Pid::from_raw(10)));
        pool.clear();
        assert!(pool.is_empty());
    }
}
