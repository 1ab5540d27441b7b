// Admin joiner: fan out join attempts to a handful of
// bootstrap hosts concurrently, refilling from the remaining pool as
// attempts fail, until one succeeds, the join is cancelled, or the
// overall join budget runs out.

use crate::error::{Error, Result};
use crate::stats::StatsSink;
use crate::table::{now_millis, MemberTable};
use crate::transport::{JoinRequest, JoinResponse, Transport};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub struct AdminJoiner {
    local_address: String,
    app: String,
    table: Arc<MemberTable>,
    transport: Arc<dyn Transport>,
    stats: Arc<dyn StatsSink>,
}

impl AdminJoiner {
    pub fn new(
        local_address: impl Into<String>,
        app: impl Into<String>,
        table: Arc<MemberTable>,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            local_address: local_address.into(),
            app: app.into(),
            table,
            transport,
            stats,
        }
    }

    /// Fan out to up to `join_size` hosts from `hosts` concurrently,
    /// refilling from whatever remains as attempts fail. Returns as soon
    /// as one host accepts the join; returns `Error::JoinTimeout` if
    /// `max_join_duration` elapses first, or `Error::Destroyed` if
    /// `cancel` fires (the node was destroyed mid-join).
    pub async fn join(
        &self,
        hosts: Vec<String>,
        join_size: usize,
        max_join_duration: Duration,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<()> {
        let mut pool: Vec<String> = hosts
            .into_iter()
            .filter(|host| host != &self.local_address)
            .collect();
        {
            use rand::seq::SliceRandom;
            pool.shuffle(&mut rand::rng());
        }
        let mut pool: VecDeque<String> = pool.into_iter().collect();

        if pool.is_empty() {
            return Err(Error::JoinFailed("no bootstrap hosts available".to_string()));
        }

        let deadline = Instant::now() + max_join_duration;
        let (tx, mut rx) = mpsc::channel(join_size.max(1));
        let mut in_flight = 0usize;

        for _ in 0..join_size.min(pool.len()) {
            if let Some(host) = pool.pop_front() {
                self.spawn_attempt(host, tx.clone());
                in_flight += 1;
            }
        }

        loop {
            if in_flight == 0 && pool.is_empty() {
                self.stats.incr(&self.stat("join.exhausted"), 1);
                return Err(Error::JoinFailed(
                    "exhausted bootstrap hosts without a successful join".to_string(),
                ));
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.stats.incr(&self.stat("join.timeout"), 1);
                    return Err(Error::JoinTimeout(max_join_duration));
                }
                _ = &mut cancel => {
                    self.stats.incr(&self.stat("join.cancelled"), 1);
                    return Err(Error::Destroyed);
                }
                attempt = rx.recv() => {
                    match attempt {
                        Some(Ok(response)) => {
                            self.apply_join_response(response).await;
                            self.stats.incr(&self.stat("join.success"), 1);
                            return Ok(());
                        }
                        Some(Err(_failed_host)) => {
                            in_flight -= 1;
                            if let Some(host) = pool.pop_front() {
                                self.spawn_attempt(host, tx.clone());
                                in_flight += 1;
                            }
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// Namespaces a stat key under `ringpop.<host_port>.`, matching the
    /// exported-counter convention the protocol documents. These
    /// `join.*` outcome counters are joiner-side diagnostics supplementing
    /// the receiver-side `join.recv` the protocol names explicitly.
    fn stat(&self, name: &str) -> String {
        format!("ringpop.{}.{}", self.local_address, name)
    }

    fn spawn_attempt(&self, host: String, tx: mpsc::Sender<std::result::Result<JoinResponse, String>>) {
        let transport = self.transport.clone();
        let request = JoinRequest {
            app: self.app.clone(),
            source: self.local_address.clone(),
            incarnation_number: now_millis(),
        };
        tracing::debug!(host = %host, "attempting join");
        tokio::spawn(async move {
            let result = transport.send_join(&host, request).await;
            let outcome = match result {
                Ok(response) => Ok(response),
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "join attempt failed");
                    Err(host)
                }
            };
            let _ = tx.send(outcome).await;
        });
    }

    async fn apply_join_response(&self, response: JoinResponse) {
        self.table.update(response.membership).await;
    }
}
