// Stats sink contract (SPEC_FULL.md §4.12). Process metrics counters are
// out of scope for this crate; it only defines the seam an embedder wires
// up to whatever metrics system it runs, plus the table subscriber that
// turns membership events into the `ringpop.<host_port>.membership-update.*`
// / `updates` / `num-members` counters the protocol documents.

use crate::member::Member;
use crate::table::{MemberTable, Subscriber};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Counter/timer/gauge sink the gossip loop, suspicion service and
/// admin joiner report into. An embedder backs this with its own metrics
/// system; [`NoopStats`] is the default when nothing is wired up.
pub trait StatsSink: Send + Sync {
    fn incr(&self, _name: &str, _count: i64) {}
    fn record_timer(&self, _name: &str, _duration: Duration) {}
    fn gauge(&self, _name: &str, _value: i64) {}
}

/// Discards everything. Used when an embedder hasn't wired up a real
/// sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatsSink for NoopStats {}

/// Table subscriber that reports every membership event as
/// `ringpop.<host_port>.membership-update.{alive,suspect,faulty,leave,new}`,
/// a cumulative `ringpop.<host_port>.updates` counter, and a
/// `ringpop.<host_port>.num-members` gauge, so the per-event accounting
/// lives in one place instead of scattered across every table caller.
pub struct StatsSubscriber {
    local_address: String,
    table: Arc<MemberTable>,
    sink: Arc<dyn StatsSink>,
}

impl StatsSubscriber {
    pub fn new(local_address: impl Into<String>, table: Arc<MemberTable>, sink: Arc<dyn StatsSink>) -> Self {
        Self {
            local_address: local_address.into(),
            table,
            sink,
        }
    }

    fn stat(&self, name: &str) -> String {
        format!("ringpop.{}.{}", self.local_address, name)
    }

    async fn record(&self, event: &str, _member: &Member) {
        self.sink.incr(&self.stat(&format!("membership-update.{event}")), 1);
        self.sink.incr(&self.stat("updates"), 1);
        self.sink
            .gauge(&self.stat("num-members"), self.table.len().await as i64);
    }
}

#[async_trait]
impl Subscriber for StatsSubscriber {
    async fn on_new(&self, member: &Member) {
        self.record("new", member).await;
    }

    async fn on_alive(&self, member: &Member) {
        self.record("alive", member).await;
    }

    async fn on_suspect(&self, member: &Member) {
        self.record("suspect", member).await;
    }

    async fn on_faulty(&self, member: &Member) {
        self.record("faulty", member).await;
    }

    async fn on_leave(&self, member: &Member) {
        self.record("leave", member).await;
    }
}
