// Membership table: the authoritative address -> Member map, its
// supersession/merge rules, and the Subscriber fan-out the facade, ring,
// suspicion service and dissemination buffer hook into.

use crate::member::{Change, EventKind, Member, MembershipEvent, Status};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fan-out target for member-table events. The facade, the hash ring and
/// the suspicion service each implement a subset; default methods are
/// no-ops so implementors only override what they react to.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_new(&self, _member: &Member) {}
    async fn on_alive(&self, _member: &Member) {}
    async fn on_suspect(&self, _member: &Member) {}
    async fn on_faulty(&self, _member: &Member) {}
    async fn on_leave(&self, _member: &Member) {}
}

/// The authoritative membership table for one node.
pub struct MemberTable {
    local_address: String,
    members: RwLock<HashMap<String, Member>>,
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl MemberTable {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            members: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.write().await.push(subscriber);
    }

    async fn notify(&self, event: &MembershipEvent) {
        let subs = self.subscribers.read().await;
        for sub in subs.iter() {
            match event.kind {
                EventKind::New => sub.on_new(&event.member).await,
                EventKind::Alive => sub.on_alive(&event.member).await,
                EventKind::Suspect => sub.on_suspect(&event.member).await,
                EventKind::Faulty => sub.on_faulty(&event.member).await,
                EventKind::Leave => sub.on_leave(&event.member).await,
            }
        }
    }

    /// Insert the local member as `alive` at `now_millis()`.
    pub async fn add_local_member(&self) -> MembershipEvent {
        let member = Member::new(self.local_address.clone(), Status::Alive, now_millis());
        self.members
            .write()
            .await
            .insert(self.local_address.clone(), member.clone());
        let event = MembershipEvent {
            kind: EventKind::New,
            member,
        };
        self.notify(&event).await;
        event
    }

    /// Add a member, minting an incarnation if none is supplied. If the
    /// address is already known this behaves like `update` with
    /// `{status: alive, incarnation_number}`.
    pub async fn add_member(
        &self,
        address: impl Into<String>,
        incarnation_number: Option<i64>,
    ) -> Option<MembershipEvent> {
        let address = address.into();
        let mut members = self.members.write().await;

        if let Some(existing) = members.get(&address) {
            let incarnation = incarnation_number.unwrap_or(existing.incarnation_number);
            drop(members);
            return self
                .apply_change(Change::new(address, Status::Alive, incarnation))
                .await;
        }

        let incarnation = incarnation_number.unwrap_or_else(now_millis);
        let member = Member::new(address.clone(), Status::Alive, incarnation);
        members.insert(address, member.clone());
        drop(members);

        let event = MembershipEvent {
            kind: EventKind::New,
            member,
        };
        self.notify(&event).await;
        Some(event)
    }

    /// Apply a batch of changes, returning one event per change that was
    /// actually applied. Changes about the local member that
    /// would mark it `suspect`/`faulty` are refuted instead of adopted.
    pub async fn update(&self, changes: Vec<Change>) -> Vec<MembershipEvent> {
        let mut events = Vec::with_capacity(changes.len());
        for change in changes {
            if let Some(event) = self.apply_change(change).await {
                events.push(event);
            }
        }
        events
    }

    async fn apply_change(&self, change: Change) -> Option<MembershipEvent> {
        if change.address == self.local_address {
            return self.apply_local_change(change).await;
        }

        let mut members = self.members.write().await;
        match members.get(&change.address) {
            Some(existing) if !existing.is_superseded_by(change.status, change.incarnation_number) => {
                None
            }
            _ => {
                let member = Member::new(change.address.clone(), change.status, change.incarnation_number);
                members.insert(change.address.clone(), member.clone());
                drop(members);
                let event = MembershipEvent {
                    kind: change.status.into(),
                    member,
                };
                self.notify(&event).await;
                Some(event)
            }
        }
    }

    async fn apply_local_change(&self, change: Change) -> Option<MembershipEvent> {
        let mut members = self.members.write().await;
        let local = members
            .get(&self.local_address)
            .cloned()
            .unwrap_or_else(|| Member::new(self.local_address.clone(), Status::Alive, now_millis()));

        if !local.is_superseded_by(change.status, change.incarnation_number) {
            return None;
        }

        if matches!(change.status, Status::Suspect | Status::Faulty) {
            let refuted_incarnation = change.incarnation_number.max(local.incarnation_number) + 1;
            let member = Member::new(self.local_address.clone(), Status::Alive, refuted_incarnation);
            members.insert(self.local_address.clone(), member.clone());
            drop(members);
            let event = MembershipEvent {
                kind: EventKind::Alive,
                member,
            };
            self.notify(&event).await;
            return Some(event);
        }

        let member = Member::new(self.local_address.clone(), change.status, change.incarnation_number);
        members.insert(self.local_address.clone(), member.clone());
        drop(members);
        let event = MembershipEvent {
            kind: change.status.into(),
            member,
        };
        self.notify(&event).await;
        Some(event)
    }

    /// Force the local member `alive`, bumping its incarnation to
    /// `now_millis()`.
    pub async fn make_alive(&self) -> MembershipEvent {
        self.force_local(Status::Alive).await
    }

    /// Force the local member `leave`, bumping its incarnation to
    /// `now_millis()`.
    pub async fn make_leave(&self) -> MembershipEvent {
        self.force_local(Status::Leave).await
    }

    async fn force_local(&self, status: Status) -> MembershipEvent {
        let member = Member::new(self.local_address.clone(), status, now_millis());
        self.members
            .write()
            .await
            .insert(self.local_address.clone(), member.clone());
        let event = MembershipEvent {
            kind: status.into(),
            member,
        };
        self.notify(&event).await;
        event
    }

    pub async fn get(&self, address: &str) -> Option<Member> {
        self.members.read().await.get(address).cloned()
    }

    pub async fn local_member(&self) -> Option<Member> {
        self.get(&self.local_address.clone()).await
    }

    pub async fn snapshot(&self) -> Vec<Member> {
        self.members.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Uniform random sample without replacement of up to `n` members that
    /// are `alive`, not the local address, and not in `exclude`.
    pub async fn get_random_pingable_members(&self, n: usize, exclude: &[String]) -> Vec<Member> {
        use rand::seq::SliceRandom;

        let candidates: Vec<Member> = self
            .members
            .read()
            .await
            .values()
            .filter(|m| {
                m.status == Status::Alive
                    && m.address != self.local_address
                    && !exclude.iter().any(|e| e == &m.address)
            })
            .cloned()
            .collect();

        let mut rng = rand::rng();
        let mut picked = candidates;
        picked.shuffle(&mut rng);
        picked.truncate(n);
        picked
    }

    /// Deterministic 32-bit checksum over the canonical encoding
    /// `sort_by_address([addr, incarnation, status]) joined by ';'`.
    pub async fn checksum(&self) -> u32 {
        let mut members: Vec<Member> = self.members.read().await.values().cloned().collect();
        members.sort_by(|a, b| a.address.cmp(&b.address));

        let mut encoded = String::new();
        for m in &members {
            encoded.push_str(&m.address);
            encoded.push(',');
            encoded.push_str(&m.incarnation_number.to_string());
            encoded.push(',');
            encoded.push_str(&m.status.to_string());
            encoded.push(';');
        }

        crc32fast::hash(encoded.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_local_member_is_alive() {
        let table = MemberTable::new("local:1");
        let event = table.add_local_member().await;
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(event.member.status, Status::Alive);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn add_member_new_address_emits_new() {
        let table = MemberTable::new("local:1");
        table.add_local_member().await;
        let event = table.add_member("peer:1", Some(10)).await.unwrap();
        assert_eq!(event.kind, EventKind::New);
        assert_eq!(event.member.incarnation_number, 10);
    }

    #[tokio::test]
    async fn update_applies_higher_incarnation() {
        let table = MemberTable::new("local:1");
        table.add_local_member().await;
        table.add_member("peer:1", Some(1)).await;

        let events = table
            .update(vec![Change::new("peer:1", Status::Suspect, 2)])
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Suspect);

        let peer = table.get("peer:1").await.unwrap();
        assert_eq!(peer.status, Status::Suspect);
        assert_eq!(peer.incarnation_number, 2);
    }

    #[tokio::test]
    async fn update_ignores_stale_change() {
        let table = MemberTable::new("local:1");
        table.add_local_member().await;
        table.add_member("peer:1", Some(5)).await;

        let events = table
            .update(vec![Change::new("peer:1", Status::Faulty, 3)])
            .await;
        assert!(events.is_empty());
        assert_eq!(table.get("peer:1").await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn suspect_claim_about_self_is_refuted() {
        let table = MemberTable::new("local:1");
        let local_event = table.add_local_member().await;
        let local_incarnation = local_event.member.incarnation_number;

        let events = table
            .update(vec![Change::new(
                "local:1",
                Status::Suspect,
                local_incarnation,
            )])
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Alive);
        assert!(events[0].member.incarnation_number > local_incarnation);

        // no outgoing record ever carries {local, suspect|faulty, *}
        let local = table.local_member().await.unwrap();
        assert_eq!(local.status, Status::Alive);
    }

    #[tokio::test]
    async fn faulty_claim_with_lower_incarnation_is_ignored() {
        let table = MemberTable::new("local:1");
        let local_event = table.add_local_member().await;
        let inc = local_event.member.incarnation_number;

        let events = table
            .update(vec![Change::new("local:1", Status::Faulty, inc - 1)])
            .await;
        assert!(events.is_empty());
        assert_eq!(table.local_member().await.unwrap().status, Status::Alive);
    }

    #[tokio::test]
    async fn checksum_is_order_independent() {
        let t1 = MemberTable::new("a:1");
        t1.add_member("a:1", Some(1)).await;
        t1.add_member("b:1", Some(2)).await;
        t1.add_member("c:1", Some(3)).await;

        let t2 = MemberTable::new("a:1");
        t2.add_member("c:1", Some(3)).await;
        t2.add_member("a:1", Some(1)).await;
        t2.add_member("b:1", Some(2)).await;

        assert_eq!(t1.checksum().await, t2.checksum().await);
    }

    #[tokio::test]
    async fn random_pingable_excludes_local_and_non_alive() {
        let table = MemberTable::new("local:1");
        table.add_local_member().await;
        table.add_member("alive:1", Some(1)).await;
        table
            .update(vec![Change::new("suspect:1", Status::Suspect, 1)])
            .await;

        let picked = table.get_random_pingable_members(10, &[]).await;
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].address, "alive:1");
    }
}
