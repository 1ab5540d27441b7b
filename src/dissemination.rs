// Piggyback dissemination buffer. Holds at most one
// outstanding change per address, handed out least-disseminated-first so
// every change gets a fair number of rides before it is dropped.

use crate::member::{Change, Member};
use crate::table::{MemberTable, Subscriber};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// `ceil(3 * log10(cluster_size + 1))`, floored at 1: more members means
/// more gossip fan-out needed to converge, so a change rides longer before
/// being dropped.
fn max_piggyback(cluster_size: usize) -> u32 {
    let limit = (3.0 * ((cluster_size + 1) as f64).log10()).ceil() as u32;
    limit.max(1)
}

/// Buffers membership changes awaiting piggyback onto outgoing pings,
/// acks and ping-reqs.
pub struct DisseminationBuffer {
    table: Arc<MemberTable>,
    changes: RwLock<HashMap<String, Change>>,
}

impl DisseminationBuffer {
    /// The retransmit limit for a given change is computed fresh from the
    /// table's current member count each time it's handed out, rather than
    /// fixed at construction, so it tracks the cluster as it grows and
    /// shrinks.
    pub fn new(table: Arc<MemberTable>) -> Self {
        Self {
            table,
            changes: RwLock::new(HashMap::new()),
        }
    }

    /// Merge a change into the buffer. A change already buffered for the
    /// same address is replaced only if the incoming one supersedes it
    /// under the newest-change-wins rule, so a stale update never
    /// clobbers fresher piggyback state.
    pub async fn add_change(&self, change: Change) {
        let mut changes = self.changes.write().await;
        match changes.get(&change.address) {
            Some(existing) if !existing.is_superseded_by(&change) => {}
            _ => {
                changes.insert(change.address.clone(), change);
            }
        }
    }

    /// Hand out up to `n` changes, least-disseminated first, bumping each
    /// returned change's `piggyback_count`. Any change whose count now
    /// exceeds `max_piggyback` for the current cluster size is evicted
    /// after this call instead of being handed out again.
    pub async fn get_changes(&self, n: usize) -> Vec<Change> {
        let limit = max_piggyback(self.table.len().await);
        let mut changes = self.changes.write().await;

        let mut ordered: Vec<String> = changes.keys().cloned().collect();
        ordered.sort_by_key(|address| changes[address].piggyback_count);
        ordered.truncate(n);

        let mut out = Vec::with_capacity(ordered.len());
        for address in ordered {
            let change = changes.get_mut(&address).expect("key came from this map");
            change.piggyback_count += 1;
            out.push(change.clone());
            if change.piggyback_count > limit {
                changes.remove(&address);
            }
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.changes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.changes.read().await.is_empty()
    }

    /// Full membership snapshot expressed as changes, used when a
    /// checksum mismatch can't be explained by what's currently
    /// buffered and the caller needs to fall back to a full-state sync.
    pub async fn full_state(table: &MemberTable) -> Vec<Change> {
        table
            .snapshot()
            .await
            .into_iter()
            .map(|member| Change::new(member.address, member.status, member.incarnation_number))
            .collect()
    }
}

#[async_trait]
impl Subscriber for DisseminationBuffer {
    async fn on_new(&self, member: &Member) {
        self.add_change(Change::new(member.address.clone(), member.status, member.incarnation_number))
            .await;
    }

    async fn on_alive(&self, member: &Member) {
        self.on_new(member).await;
    }

    async fn on_suspect(&self, member: &Member) {
        self.on_new(member).await;
    }

    async fn on_faulty(&self, member: &Member) {
        self.on_new(member).await;
    }

    async fn on_leave(&self, member: &Member) {
        self.on_new(member).await;
    }
}
