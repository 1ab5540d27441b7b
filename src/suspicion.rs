// Suspicion timer service: one timeout per suspected address,
// promoting to `faulty` if nothing refutes it in time.

use crate::member::{Change, Member, Status};
use crate::table::{MemberTable, Subscriber};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Tracks one timer per suspected address. When a timer expires without
/// being stopped (i.e. without the member being refuted or independently
/// confirmed faulty/left) it applies a `faulty` change at the incarnation
/// the member was suspected at, which supersedes the `suspect` record
/// under the same-incarnation precedence rule.
///
/// `stop_all` halts the service entirely -- used when the local member
/// leaves the cluster -- so that a piggybacked `suspect` change about some
/// other peer arriving afterward can't start a fresh timer. `reenable`
/// lifts the halt on rejoin.
pub struct SuspicionService {
    table: Arc<MemberTable>,
    timeout: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl SuspicionService {
    pub fn new(table: Arc<MemberTable>, timeout: Duration) -> Self {
        Self {
            table,
            timeout,
            timers: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// (Re)start the suspicion timer for `address` at `incarnation_number`.
    /// Starting a new timer for an address that already has one replaces
    /// it, so a fresh suspicion always gets a full timeout. No-ops while
    /// the service is halted (see `stop_all`/`reenable`).
    pub async fn start(&self, address: &str, incarnation_number: i64) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        self.stop(address).await;

        let table = self.table.clone();
        let addr = address.to_string();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table
                .update(vec![Change::new(addr, Status::Faulty, incarnation_number)])
                .await;
        });

        self.timers.lock().await.insert(address.to_string(), handle);
    }

    /// Cancel the timer for `address`, if any. Called when a member is
    /// refuted back to `alive`, independently confirmed `faulty`, or
    /// leaves.
    pub async fn stop(&self, address: &str) {
        if let Some(handle) = self.timers.lock().await.remove(address) {
            handle.abort();
        }
    }

    /// Cancel every outstanding timer and halt the service: further calls
    /// to `start` no-op until `reenable` is called. Used on admin leave
    /// and node destruction.
    pub async fn stop_all(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Lift a halt from `stop_all`, then restart timers for every address
    /// the table currently has marked `suspect` that doesn't already have
    /// one running. Used after rejoin, when the service's own bookkeeping
    /// was cleared by `stop_all` but the table's view of the cluster
    /// survived.
    pub async fn reenable(&self) {
        self.enabled.store(true, Ordering::SeqCst);

        let suspects: Vec<Member> = self
            .table
            .snapshot()
            .await
            .into_iter()
            .filter(|m| m.status == Status::Suspect)
            .collect();

        for member in suspects {
            if !self.is_running(&member.address).await {
                self.start(&member.address, member.incarnation_number).await;
            }
        }
    }

    pub async fn is_running(&self, address: &str) -> bool {
        self.timers.lock().await.contains_key(address)
    }

    pub async fn running_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

#[async_trait]
impl Subscriber for SuspicionService {
    async fn on_suspect(&self, member: &Member) {
        self.start(&member.address, member.incarnation_number).await;
    }

    async fn on_alive(&self, member: &Member) {
        self.stop(&member.address).await;
    }

    async fn on_faulty(&self, member: &Member) {
        self.stop(&member.address).await;
    }

    async fn on_leave(&self, member: &Member) {
        self.stop(&member.address).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_stop_prevents_promotion() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.start("peer:1", 1).await;
        assert!(service.is_running("peer:1").await);
        service.stop("peer:1").await;
        assert!(!service.is_running("peer:1").await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn expired_timer_promotes_to_faulty() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;
        table
            .update(vec![Change::new("peer:1", Status::Suspect, 1)])
            .await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.start("peer:1", 1).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Faulty);
        assert!(!service.is_running("peer:1").await);
    }

    #[tokio::test]
    async fn stop_all_cancels_every_timer() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;
        table.add_member("peer:2", Some(1)).await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.start("peer:1", 1).await;
        service.start("peer:2", 1).await;
        assert_eq!(service.running_count().await, 2);

        service.stop_all().await;
        assert_eq!(service.running_count().await, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Alive);
        assert_eq!(table.get("peer:2").await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn start_is_a_no_op_while_halted() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.stop_all().await;

        service.start("peer:1", 1).await;
        assert!(!service.is_running("peer:1").await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn reenable_lifts_the_halt_so_start_works_again() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.stop_all().await;
        service.reenable().await;

        service.start("peer:1", 1).await;
        assert!(service.is_running("peer:1").await);
    }

    #[tokio::test]
    async fn reenable_restarts_timers_for_suspect_members() {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;
        table
            .update(vec![Change::new("peer:1", Status::Suspect, 1)])
            .await;

        let service = SuspicionService::new(table.clone(), Duration::from_millis(20));
        service.reenable().await;
        assert!(service.is_running("peer:1").await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Faulty);
    }
}
