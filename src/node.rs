// Node facade: wires the member table, dissemination buffer,
// hash ring, suspicion service, member iterator, gossip loop and admin
// joiner together, and implements the join/ping/ping-req/leave protocol
// handlers an embedding transport dispatches incoming wire messages into.

use crate::admin::AdminJoiner;
use crate::bootstrap::load_hosts;
use crate::config::NodeConfig;
use crate::dissemination::DisseminationBuffer;
use crate::error::{Error, Result};
use crate::gossip::GossipLoop;
use crate::iterator::MemberIterator;
use crate::member::Status;
use crate::ring::HashRing;
use crate::stats::{StatsSink, StatsSubscriber};
use crate::suspicion::SuspicionService;
use crate::table::MemberTable;
use crate::transport::{
    JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PingReqRequest, PingReqResponse,
    PingRequest, PingResponse, Transport,
};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    NotReady,
    Ready,
    Destroyed,
}

/// The facade an embedder drives: `bootstrap` into a cluster, `lookup`
/// keys on the hash ring, `admin_leave`/`rejoin` gracefully, and
/// `destroy` to tear everything down. Also the entry point for the
/// protocol handlers (`handle_join`/`handle_ping`/`handle_ping_req`/
/// `handle_leave`) an embedding transport dispatches incoming messages
/// into.
pub struct Node {
    config: NodeConfig,
    table: Arc<MemberTable>,
    dissemination: Arc<DisseminationBuffer>,
    ring: Arc<HashRing>,
    suspicion: Arc<SuspicionService>,
    transport: Arc<dyn Transport>,
    stats: Arc<dyn StatsSink>,
    gossip: Arc<GossipLoop>,
    state: RwLock<NodeState>,
    gossip_shutdown: Mutex<Option<oneshot::Sender<()>>>,
    gossip_task: Mutex<Option<JoinHandle<()>>>,
    join_cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl Node {
    /// Build a node and wire its components together. Does not contact
    /// the network; call `bootstrap` to join a cluster.
    pub async fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn StatsSink>,
    ) -> Arc<Self> {
        let table = Arc::new(MemberTable::new(config.host_port.clone()));
        let dissemination = Arc::new(DisseminationBuffer::new(table.clone()));
        let ring = Arc::new(HashRing::new(config.ring_vnodes));
        let suspicion = Arc::new(SuspicionService::new(table.clone(), config.suspicion_timeout));
        let iterator = Arc::new(MemberIterator::new(table.clone()));

        table.subscribe(ring.clone()).await;
        table.subscribe(suspicion.clone()).await;
        table.subscribe(dissemination.clone()).await;
        table
            .subscribe(Arc::new(StatsSubscriber::new(
                config.host_port.clone(),
                table.clone(),
                stats.clone(),
            )))
            .await;

        let gossip = Arc::new(GossipLoop::new(
            config.host_port.clone(),
            table.clone(),
            iterator,
            dissemination.clone(),
            transport.clone(),
            stats.clone(),
            config.clone(),
        ));

        Arc::new(Self {
            config,
            table,
            dissemination,
            ring,
            suspicion,
            transport,
            stats,
            gossip,
            state: RwLock::new(NodeState::NotReady),
            gossip_shutdown: Mutex::new(None),
            gossip_task: Mutex::new(None),
            join_cancel: Mutex::new(None),
        })
    }

    pub fn local_address(&self) -> &str {
        &self.config.host_port
    }

    /// Namespaces a stat key under `ringpop.<host_port>.`, matching the
    /// exported-counter convention the protocol documents.
    fn stat(&self, name: &str) -> String {
        format!("ringpop.{}.{}", self.config.host_port, name)
    }

    /// Join the cluster. `hosts` overrides the bootstrap host file when
    /// supplied. An empty effective host list (after filtering out the
    /// local address) bootstraps a single-node cluster instead of
    /// failing.
    pub async fn bootstrap(self: &Arc<Self>, hosts: Option<Vec<String>>) -> Result<()> {
        if *self.state.read().await != NodeState::NotReady {
            return Err(Error::AlreadyReady);
        }

        self.table.add_local_member().await;

        let candidates = match hosts {
            Some(hosts) => hosts,
            None => load_hosts(&self.config.bootstrap_file).await?,
        };
        self.warn_on_host_list(&candidates);
        let peers: Vec<String> = candidates
            .into_iter()
            .filter(|host| host != &self.config.host_port)
            .collect();

        if !peers.is_empty() {
            let joiner = AdminJoiner::new(
                self.config.host_port.clone(),
                self.config.app.clone(),
                self.table.clone(),
                self.transport.clone(),
                self.stats.clone(),
            );
            let (cancel_tx, cancel_rx) = oneshot::channel();
            *self.join_cancel.lock().await = Some(cancel_tx);
            joiner
                .join(peers, self.config.join_size, self.config.max_join_duration, cancel_rx)
                .await?;
            *self.join_cancel.lock().await = None;
        }

        self.start_gossip().await;
        *self.state.write().await = NodeState::Ready;
        tracing::info!(node = %self.config.host_port, "bootstrap complete");
        Ok(())
    }

    /// Non-fatal sanity warnings on the effective bootstrap host list:
    /// the local address should be in its own host list, and a host
    /// list shouldn't mix bare IPs with hostnames (a sign the cluster's
    /// bootstrap config was assembled inconsistently).
    fn warn_on_host_list(&self, hosts: &[String]) {
        if !hosts.iter().any(|h| h == &self.config.host_port) {
            tracing::warn!(
                node = %self.config.host_port,
                "local address is absent from the bootstrap host list"
            );
        }

        let is_ip_host = |host: &str| {
            host.rsplit_once(':')
                .map(|(head, _)| head.parse::<std::net::IpAddr>().is_ok())
                .unwrap_or(false)
        };
        let has_ip = hosts.iter().any(|h| is_ip_host(h));
        let has_hostname = hosts.iter().any(|h| !is_ip_host(h));
        if has_ip && has_hostname {
            tracing::warn!(
                node = %self.config.host_port,
                "bootstrap host list mixes IP addresses and hostnames"
            );
        }
    }

    async fn start_gossip(self: &Arc<Self>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let gossip = self.gossip.clone();
        let task = tokio::spawn(async move {
            gossip.run(shutdown_rx).await;
        });
        *self.gossip_shutdown.lock().await = Some(shutdown_tx);
        *self.gossip_task.lock().await = Some(task);
    }

    /// Map `key` onto its owning server, or `None` if the ring has no
    /// servers yet.
    pub async fn lookup(&self, key: &str) -> Result<Option<String>> {
        self.ensure_ready().await?;
        self.stats.incr(&self.stat("lookup"), 1);
        Ok(self.ring.lookup(key).await)
    }

    /// Mark the local member `leave`, then stop this node's own gossip
    /// loop and every suspicion timer. The `leave` change
    /// itself still reaches the rest of the cluster: it was enqueued into
    /// the dissemination buffer by the table event this just emitted, and
    /// `handle_ping`/`handle_ping_req` keep piggybacking it onto replies
    /// to whichever peers ping *this* node next, even with the local
    /// gossip loop stopped.
    pub async fn admin_leave(self: &Arc<Self>) -> Result<()> {
        self.ensure_ready().await?;
        if let Some(local) = self.table.local_member().await {
            if local.status == Status::Leave {
                return Err(Error::RedundantLeave);
            }
        } else {
            return Err(Error::InvalidLeaveLocalMember);
        }
        self.table.make_leave().await;
        self.stop_gossip().await;
        self.suspicion.stop_all().await;
        tracing::info!(node = %self.config.host_port, "local member left the cluster");
        Ok(())
    }

    /// Reverse a prior `admin_leave`: mark the local member `alive` again
    /// at a fresh incarnation, restart the gossip loop, and re-enable the
    /// suspicion service.
    pub async fn rejoin(self: &Arc<Self>) -> Result<()> {
        self.ensure_ready().await?;
        self.table.make_alive().await;
        self.start_gossip().await;
        self.suspicion.reenable().await;
        tracing::info!(node = %self.config.host_port, "rejoined the cluster");
        Ok(())
    }

    async fn stop_gossip(&self) {
        if let Some(shutdown) = self.gossip_shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.gossip_task.lock().await.take() {
            let _ = task.await;
        }
    }

    /// Tear the node down: stop the gossip loop, cancel any in-flight
    /// join, and stop every suspicion timer. Idempotent only in the
    /// sense that a second call reports `Error::Destroyed`.
    pub async fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == NodeState::Destroyed {
                return Err(Error::Destroyed);
            }
            *state = NodeState::Destroyed;
        }

        if let Some(cancel) = self.join_cancel.lock().await.take() {
            let _ = cancel.send(());
        }
        if let Some(shutdown) = self.gossip_shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.gossip_task.lock().await.take() {
            let _ = task.await;
        }
        self.suspicion.stop_all().await;
        Ok(())
    }

    async fn ensure_ready(&self) -> Result<()> {
        match *self.state.read().await {
            NodeState::Ready => Ok(()),
            NodeState::NotReady => Err(Error::NotReady),
            NodeState::Destroyed => Err(Error::Destroyed),
        }
    }

    /// Handle an incoming join request. Rejects joins from a
    /// different `app`, or from the joiner's own address, then seeds the
    /// joiner with a full membership snapshot.
    pub async fn handle_join(&self, request: JoinRequest) -> Result<JoinResponse> {
        self.ensure_ready().await?;
        self.stats.incr(&self.stat("join.recv"), 1);

        if request.app != self.config.app {
            return Err(Error::InvalidJoinApp {
                joiner_app: request.app,
                local_app: self.config.app.clone(),
            });
        }
        if request.source == self.config.host_port {
            return Err(Error::InvalidJoinSource);
        }

        self.table
            .add_member(request.source.clone(), Some(request.incarnation_number))
            .await;

        let membership = DisseminationBuffer::full_state(&self.table).await;
        Ok(JoinResponse {
            app: self.config.app.clone(),
            coordinator: self.config.host_port.clone(),
            membership,
        })
    }

    /// Piggyback payload for an outgoing reply: the usual least-
    /// disseminated changes, falling back to a full membership snapshot
    /// only when the buffer has nothing to offer *and* the peer's
    /// checksum disagrees with ours -- the one mechanism that resolves a
    /// disagreement that has otherwise gone quiet.
    async fn piggyback_changes(&self, remote_checksum: u32) -> Vec<crate::member::Change> {
        let changes = self
            .dissemination
            .get_changes(self.config.ping_req_size.max(3))
            .await;
        if changes.is_empty() && remote_checksum != self.table.checksum().await {
            DisseminationBuffer::full_state(&self.table).await
        } else {
            changes
        }
    }

    /// Handle an incoming direct ping. Applies the piggybacked
    /// changes, then replies with more piggybacked changes (or a
    /// full-state fallback, see `piggyback_changes`).
    pub async fn handle_ping(&self, request: PingRequest) -> Result<PingResponse> {
        self.ensure_ready().await?;
        self.stats.incr(&self.stat("ping.recv"), 1);
        self.table.update(request.changes).await;

        let changes = self.piggyback_changes(request.checksum).await;
        Ok(PingResponse {
            checksum: self.table.checksum().await,
            changes,
        })
    }

    /// Handle an incoming indirect-ping request: relay a
    /// direct ping to `request.target` on the requester's behalf and
    /// report whether it was reached.
    pub async fn handle_ping_req(&self, request: PingReqRequest) -> Result<PingReqResponse> {
        self.ensure_ready().await?;
        self.stats.incr(&self.stat("ping-req.recv"), 1);
        self.table.update(request.changes).await;

        let relay_request = PingRequest {
            source: self.config.host_port.clone(),
            checksum: self.table.checksum().await,
            changes: self.piggyback_changes(request.checksum).await,
        };

        let relay_started = std::time::Instant::now();
        let reached = match tokio::time::timeout(
            self.config.ping_timeout,
            self.transport.send_ping(&request.target, relay_request),
        )
        .await
        {
            Ok(Ok(response)) => {
                self.stats
                    .record_timer(&self.stat("ping-req-ping"), relay_started.elapsed());
                self.table.update(response.changes).await;
                true
            }
            _ => false,
        };

        let changes = self.piggyback_changes(request.checksum).await;
        Ok(PingReqResponse { reached, changes })
    }

    /// Handle an incoming leave notification. Deliberately a
    /// no-op beyond the acknowledgement: the leave itself propagates
    /// through ordinary gossip piggyback, not through this RPC.
    pub async fn handle_leave(&self, _request: LeaveRequest) -> Result<LeaveResponse> {
        self.ensure_ready().await?;
        Ok(LeaveResponse::default())
    }
}
