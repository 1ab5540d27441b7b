// Member iterator: a shuffled round-robin over currently-alive peers,
// reshuffled from a fresh table snapshot whenever it runs dry.

use crate::member::Status;
use crate::table::MemberTable;
use std::collections::VecDeque;
use std::sync::Arc;

/// Hands out alive peers one at a time in a shuffled round-robin order.
/// Used by the gossip loop to pick the next direct-ping target without
/// favoring any one address.
pub struct MemberIterator {
    table: Arc<MemberTable>,
    queue: parking_lot::Mutex<VecDeque<String>>,
}

impl MemberIterator {
    pub fn new(table: Arc<MemberTable>) -> Self {
        Self {
            table,
            queue: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Returns the next non-local member in `alive` or `suspect` status, or
    /// `None` if the table has no pingable peers at all. A suspect peer is
    /// still worth pinging, since a successful direct ping is what lets it
    /// get refuted back to alive.
    pub async fn next(&self) -> Option<crate::member::Member> {
        loop {
            let candidate = self.queue.lock().pop_front();
            match candidate {
                Some(address) => {
                    if let Some(member) = self.table.get(&address).await {
                        if matches!(member.status, Status::Alive | Status::Suspect)
                            && member.address != self.table.local_address()
                        {
                            return Some(member);
                        }
                    }
                    // stale (left, failed, removed, or was the local entry) - skip it
                }
                None => {
                    if !self.reshuffle().await {
                        return None;
                    }
                }
            }
        }
    }

    async fn reshuffle(&self) -> bool {
        use rand::seq::SliceRandom;

        let mut addresses: Vec<String> = self
            .table
            .snapshot()
            .await
            .into_iter()
            .filter(|m| {
                matches!(m.status, Status::Alive | Status::Suspect) && m.address != self.table.local_address()
            })
            .map(|m| m.address)
            .collect();

        if addresses.is_empty() {
            return false;
        }

        addresses.shuffle(&mut rand::rng());
        *self.queue.lock() = addresses.into();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn empty_table_yields_none() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        let iter = MemberIterator::new(table);
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn cycles_through_all_alive_peers_before_repeating() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;
        table.add_member("peer:2", Some(1)).await;
        table.add_member("peer:3", Some(1)).await;

        let iter = MemberIterator::new(table);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let member = iter.next().await.unwrap();
            seen.insert(member.address);
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.contains("peer:1"));
        assert!(seen.contains("peer:2"));
        assert!(seen.contains("peer:3"));
    }

    #[tokio::test]
    async fn never_returns_local_or_faulty_members() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table
            .update(vec![crate::member::Change::new("faulty:1", Status::Faulty, 1)])
            .await;
        table.add_member("alive:1", Some(1)).await;

        let iter = MemberIterator::new(table);
        for _ in 0..6 {
            if let Some(member) = iter.next().await {
                assert_eq!(member.address, "alive:1");
            }
        }
    }

    #[tokio::test]
    async fn yields_suspect_members_too() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table
            .update(vec![crate::member::Change::new("suspect:1", Status::Suspect, 1)])
            .await;

        let iter = MemberIterator::new(table);
        let member = iter.next().await.unwrap();
        assert_eq!(member.address, "suspect:1");
    }

    #[tokio::test]
    async fn reshuffles_after_exhaustion() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;

        let iter = MemberIterator::new(table);
        for _ in 0..10 {
            let member = iter.next().await.unwrap();
            assert_eq!(member.address, "peer:1");
        }
    }
}
