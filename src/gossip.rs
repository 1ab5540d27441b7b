// Adaptive gossip loop: direct ping, indirect ping-req
// fallback through k relays, and suspicion on double failure. The
// protocol period adapts to observed round-trip latency rather than
// running on a fixed tick.

use crate::config::NodeConfig;
use crate::dissemination::DisseminationBuffer;
use crate::iterator::MemberIterator;
use crate::member::{Change, Status};
use crate::stats::StatsSink;
use crate::table::MemberTable;
use crate::transport::{PingReqRequest, PingRequest, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

const RTT_HISTORY: usize = 50;

/// Drives one node's side of the protocol: picking targets, sending
/// pings, falling back to indirect probes, and raising suspicion.
pub struct GossipLoop {
    local_address: String,
    table: Arc<MemberTable>,
    iterator: Arc<MemberIterator>,
    dissemination: Arc<DisseminationBuffer>,
    transport: Arc<dyn Transport>,
    stats: Arc<dyn StatsSink>,
    config: NodeConfig,
    rtt_samples: Mutex<VecDeque<Duration>>,
    first_tick_done: AtomicBool,
}

impl GossipLoop {
    pub fn new(
        local_address: impl Into<String>,
        table: Arc<MemberTable>,
        iterator: Arc<MemberIterator>,
        dissemination: Arc<DisseminationBuffer>,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn StatsSink>,
        config: NodeConfig,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            table,
            iterator,
            dissemination,
            transport,
            stats,
            config,
            rtt_samples: Mutex::new(VecDeque::with_capacity(RTT_HISTORY)),
            first_tick_done: AtomicBool::new(false),
        }
    }

    /// Run protocol periods until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let period = self.compute_protocol_period().await;
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.tick().await;
                }
                _ = &mut shutdown => {
                    tracing::info!(node = %self.local_address, "gossip loop shutting down");
                    break;
                }
            }
        }
    }

    /// Period floor is `min_protocol_period`; above that it tracks twice
    /// the median observed round-trip time, so a slow cluster backs off
    /// its probe rate instead of timing out members that are merely far
    /// away. The very first call returns a uniform random delay in
    /// `[0, min_protocol_period]` instead, so a fleet that bootstraps in
    /// lockstep doesn't all ping on the same tick.
    pub async fn compute_protocol_period(&self) -> Duration {
        if !self.first_tick_done.swap(true, Ordering::SeqCst) {
            let jitter_ms = rand::random::<u64>() % (self.config.min_protocol_period.as_millis() as u64 + 1);
            return Duration::from_millis(jitter_ms);
        }

        let samples = self.rtt_samples.lock().await;
        if samples.is_empty() {
            return self.config.min_protocol_period;
        }
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort();
        let p50 = sorted[sorted.len() / 2];
        std::cmp::max(self.config.min_protocol_period, p50 * 2)
    }

    async fn record_rtt(&self, rtt: Duration) {
        let mut samples = self.rtt_samples.lock().await;
        samples.push_back(rtt);
        if samples.len() > RTT_HISTORY {
            samples.pop_front();
        }
    }

    /// Namespaces a stat key under `ringpop.<host_port>.`, matching the
    /// exported-counter convention the protocol documents.
    fn stat(&self, name: &str) -> String {
        format!("ringpop.{}.{}", self.local_address, name)
    }

    /// One protocol period: pick a target, ping it directly, fall back to
    /// indirect ping-req through up to `ping_req_size` relays, and raise
    /// suspicion if both fail.
    pub async fn tick(&self) {
        let Some(target) = self.iterator.next().await else {
            return;
        };

        let checksum = self.table.checksum().await;
        let changes = self
            .dissemination
            .get_changes(self.config.ping_req_size.max(3))
            .await;
        let request = PingRequest {
            source: self.local_address.clone(),
            checksum,
            changes,
        };

        self.stats.incr(&self.stat("ping.send"), 1);
        let started = Instant::now();
        let direct = tokio::time::timeout(
            self.config.ping_timeout,
            self.transport.send_ping(&target.address, request.clone()),
        )
        .await;

        if let Ok(Ok(response)) = direct {
            let rtt = started.elapsed();
            self.record_rtt(rtt).await;
            self.stats.record_timer(&self.stat("ping"), rtt);
            self.apply_incoming(response.changes).await;
            return;
        }

        if self
            .indirect_ping(&target.address, target.incarnation_number, request)
            .await
        {
            return;
        }

        tracing::warn!(
            target = %target.address,
            "marking peer suspect after direct and indirect ping failed"
        );
        self.table
            .update(vec![Change::new(
                target.address.clone(),
                Status::Suspect,
                target.incarnation_number,
            )])
            .await;
    }

    /// Fan out a ping-req to `ping_req_size` relays and wait for any one
    /// of them to report reaching `target`, up to `ping_req_timeout`. A
    /// relay confirming reachability marks `target` alive at its
    /// last-known incarnation, curing any suspicion already raised on it.
    async fn indirect_ping(&self, target: &str, target_incarnation: i64, request: PingRequest) -> bool {
        let relays = self
            .table
            .get_random_pingable_members(self.config.ping_req_size, &[target.to_string()])
            .await;
        if relays.is_empty() {
            return false;
        }

        self.stats.incr(&self.stat("ping-req.send"), 1);
        let started = Instant::now();
        let (tx, mut rx) = tokio::sync::mpsc::channel(relays.len());
        for relay in relays {
            let transport = self.transport.clone();
            let relay_addr = relay.address;
            let req = PingReqRequest {
                source: self.local_address.clone(),
                target: target.to_string(),
                checksum: request.checksum,
                changes: request.changes.clone(),
            };
            let tx = tx.clone();
            let stats = self.stats.clone();
            let other_members_stat = self.stat("ping-req.other-members");
            tokio::spawn(async move {
                let relay_started = Instant::now();
                if let Ok(response) = transport.send_ping_req(&relay_addr, req).await {
                    stats.record_timer(&other_members_stat, relay_started.elapsed());
                    let _ = tx.send(response).await;
                }
            });
        }
        drop(tx);

        let outcome = tokio::time::timeout(self.config.ping_req_timeout, async {
            while let Some(response) = rx.recv().await {
                if response.reached {
                    return Some(response);
                }
            }
            None
        })
        .await;

        match outcome {
            Ok(Some(response)) => {
                self.stats
                    .record_timer(&self.stat("ping-req"), started.elapsed());
                self.table
                    .update(vec![Change::new(target.to_string(), Status::Alive, target_incarnation)])
                    .await;
                self.apply_incoming(response.changes).await;
                true
            }
            _ => false,
        }
    }

    /// Apply incoming changes to the table. The dissemination buffer is
    /// itself a table subscriber, so whatever actually gets applied
    /// (including any local self-refutation) is automatically re-seeded
    /// for further piggyback without needing to be forwarded here.
    pub(crate) async fn apply_incoming(&self, changes: Vec<Change>) {
        self.table.update(changes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::member::Member;
    use crate::stats::NoopStats;
    use crate::transport::{JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PingReqResponse, PingResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        ping_should_succeed: bool,
        ping_req_should_reach: bool,
        ping_calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_join(&self, _target: &str, _request: JoinRequest) -> Result<JoinResponse> {
            unimplemented!("not exercised by gossip loop tests")
        }

        async fn send_ping(&self, _target: &str, _request: PingRequest) -> Result<PingResponse> {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            if self.ping_should_succeed {
                Ok(PingResponse {
                    checksum: 0,
                    changes: vec![],
                })
            } else {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("timeout should fire first")
            }
        }

        async fn send_ping_req(
            &self,
            _target: &str,
            _request: PingReqRequest,
        ) -> Result<PingReqResponse> {
            Ok(PingReqResponse {
                reached: self.ping_req_should_reach,
                changes: vec![],
            })
        }

        async fn send_leave(&self, _target: &str, _request: LeaveRequest) -> Result<LeaveResponse> {
            Ok(LeaveResponse::default())
        }
    }

    fn test_config() -> NodeConfig {
        let mut config = NodeConfig::new("app", "local:1");
        config.ping_timeout = Duration::from_millis(30);
        config.ping_req_timeout = Duration::from_millis(30);
        config
    }

    async fn build_loop(transport: MockTransport) -> (Arc<MemberTable>, GossipLoop) {
        let table = Arc::new(MemberTable::new("local:1"));
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;
        table.add_member("peer:2", Some(1)).await;
        table.add_member("peer:3", Some(1)).await;

        let iterator = Arc::new(MemberIterator::new(table.clone()));
        let dissemination = Arc::new(DisseminationBuffer::new(table.clone()));
        let gossip = GossipLoop::new(
            "local:1",
            table.clone(),
            iterator,
            dissemination,
            Arc::new(transport),
            Arc::new(NoopStats),
            test_config(),
        );
        (table, gossip)
    }

    #[tokio::test]
    async fn successful_direct_ping_keeps_target_alive() {
        let (table, gossip) = build_loop(MockTransport {
            ping_should_succeed: true,
            ping_req_should_reach: true,
            ping_calls: AtomicUsize::new(0),
        })
        .await;

        gossip.tick().await;

        let statuses: Vec<Member> = table.snapshot().await;
        assert!(statuses.iter().all(|m| m.status == Status::Alive));
    }

    #[tokio::test]
    async fn failed_direct_but_successful_indirect_keeps_target_alive() {
        let (table, gossip) = build_loop(MockTransport {
            ping_should_succeed: false,
            ping_req_should_reach: true,
            ping_calls: AtomicUsize::new(0),
        })
        .await;

        gossip.tick().await;

        let statuses: Vec<Member> = table.snapshot().await;
        assert!(statuses.iter().all(|m| m.status == Status::Alive));
    }

    #[tokio::test]
    async fn successful_indirect_ping_cures_existing_suspicion() {
        let (table, gossip) = build_loop(MockTransport {
            ping_should_succeed: false,
            ping_req_should_reach: true,
            ping_calls: AtomicUsize::new(0),
        })
        .await;
        table
            .update(vec![Change::new("peer:1", Status::Suspect, 1)])
            .await;
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Suspect);

        let reached = gossip
            .indirect_ping(
                "peer:1",
                1,
                PingRequest {
                    source: "local:1".to_string(),
                    checksum: 0,
                    changes: vec![],
                },
            )
            .await;

        assert!(reached);
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn failed_direct_and_indirect_raises_suspicion() {
        let (table, gossip) = build_loop(MockTransport {
            ping_should_succeed: false,
            ping_req_should_reach: false,
            ping_calls: AtomicUsize::new(0),
        })
        .await;

        gossip.tick().await;

        let statuses = table.snapshot().await;
        let suspected = statuses
            .iter()
            .filter(|m| m.status == Status::Suspect)
            .count();
        assert_eq!(suspected, 1);
    }

    #[tokio::test]
    async fn first_protocol_period_is_jittered_within_min() {
        let (_, gossip) = build_loop(MockTransport {
            ping_should_succeed: true,
            ping_req_should_reach: true,
            ping_calls: AtomicUsize::new(0),
        })
        .await;

        let first = gossip.compute_protocol_period().await;
        assert!(first <= gossip.config.min_protocol_period);
    }

    #[tokio::test]
    async fn protocol_period_floors_at_min_with_no_samples_after_first_tick() {
        let (_, gossip) = build_loop(MockTransport {
            ping_should_succeed: true,
            ping_req_should_reach: true,
            ping_calls: AtomicUsize::new(0),
        })
        .await;

        gossip.compute_protocol_period().await; // consume the jittered first tick
        assert_eq!(
            gossip.compute_protocol_period().await,
            gossip.config.min_protocol_period
        );
    }
}
