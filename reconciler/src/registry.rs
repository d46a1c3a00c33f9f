use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A registered name together with its registration sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry<M> {
    pub name: String,
    pub seq_num: u64,
    pub metadata: M,
}

struct Inner<M> {
    next_seq: u64,
    entries: HashMap<String, IndexEntry<M>>,
}

/// Per-kind map from a symbolic name to a sequence number and metadata.
///
/// Sequence numbers start at 1, grow with every registration and are never
/// handed out twice until `reset`. Each index has its own lock; indexes of
/// different kinds never contend.
pub struct NameIndex<M> {
    title: String,
    inner: Mutex<Inner<M>>,
}

impl<M: Clone> NameIndex<M> {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            inner: Mutex::new(Inner {
                next_seq: 1,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    fn lock(&self) -> MutexGuard<'_, Inner<M>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `name`, replacing any previous entry under the same name.
    pub fn register(&self, name: &str, metadata: M) -> u64 {
        let mut inner = self.lock();
        let seq_num = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            name.to_string(),
            IndexEntry {
                name: name.to_string(),
                seq_num,
                metadata,
            },
        );
        seq_num
    }

    /// Puts back an entry taken out by `drain` or `unregister`, keeping its
    /// sequence number.
    pub fn restore(&self, entry: IndexEntry<M>) {
        self.lock().entries.insert(entry.name.clone(), entry);
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<(u64, M)> {
        self.lock()
            .entries
            .get(name)
            .map(|entry| (entry.seq_num, entry.metadata.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> Option<IndexEntry<M>> {
        self.lock().entries.remove(name)
    }

    /// Snapshot of all entries in registration order.
    pub fn list(&self) -> Vec<IndexEntry<M>> {
        let mut entries: Vec<IndexEntry<M>> = self.lock().entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.seq_num);
        entries
    }

    /// Removes every entry, keeping the sequence counter.
    pub fn drain(&self) -> Vec<IndexEntry<M>> {
        let mut entries: Vec<IndexEntry<M>> =
            self.lock().entries.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.seq_num);
        entries
    }

    /// Removes every entry and restarts the sequence counter.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.next_seq = 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let index: NameIndex<u32> = NameIndex::new("vpp_interface");
        assert_eq!(index.lookup_by_name("memif1"), None);

        let seq = index.register("memif1", 7);
        assert_eq!(index.lookup_by_name("memif1"), Some((seq, 7)));
        assert!(index.contains("memif1"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_sequence_is_monotonic_across_unregister() {
        let index: NameIndex<()> = NameIndex::new("vpp_route");
        let mut seen = Vec::new();
        for round in 0..5 {
            let name = format!("route-{}", round % 2);
            seen.push(index.register(&name, ()));
            if round % 2 == 0 {
                index.unregister(&name);
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reregister_keeps_single_entry() {
        let index: NameIndex<&str> = NameIndex::new("vpp_arp");
        let first = index.register("memif1/10.0.0.1", "a");
        let second = index.register("memif1/10.0.0.1", "b");
        assert!(second > first);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup_by_name("memif1/10.0.0.1"), Some((second, "b")));
    }

    #[test]
    fn test_drain_keeps_counter_reset_restarts() {
        let index: NameIndex<()> = NameIndex::new("linux_route");
        index.register("b", ());
        index.register("a", ());
        let drained = index.drain();
        assert_eq!(
            drained.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert!(index.is_empty());
        assert_eq!(index.register("c", ()), 3);

        index.reset();
        assert!(index.is_empty());
        assert_eq!(index.register("c", ()), 1);
    }

    #[test]
    fn test_restore_keeps_sequence_number() {
        let index: NameIndex<u32> = NameIndex::new("vpp_interface");
        let seq = index.register("memif1", 1500);
        index.register("memif2", 9000);
        let mut drained = index.drain();
        let memif1 = drained.remove(0);
        index.restore(memif1);
        assert_eq!(index.lookup_by_name("memif1"), Some((seq, 1500)));
        assert!(!index.contains("memif2"));
        assert_eq!(index.register("memif3", 1400), 3);
    }

    #[test]
    fn test_unregister_missing_is_not_an_error() {
        let index: NameIndex<()> = NameIndex::new("linux_arp");
        assert!(index.unregister("nothing").is_none());
    }
}
