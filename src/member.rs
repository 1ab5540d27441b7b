// Member record, status precedence and the supersession rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Member lifecycle status.
///
/// Declaration order is alphabetical-ish for readability; precedence for the
/// supersession rule is *not* derived from it -- see the explicit
/// [`Status::precedence`] method below instead of a derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Alive,
    Suspect,
    Faulty,
    Leave,
}

impl Status {
    /// Precedence used to break same-incarnation ties: `Faulty > Suspect >
    /// Alive > Leave`. Any transition that downgrades liveness at the same
    /// incarnation wins; a same-incarnation upgrade loses.
    pub fn precedence(self) -> u8 {
        match self {
            Status::Faulty => 3,
            Status::Suspect => 2,
            Status::Alive => 1,
            Status::Leave => 0,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Alive => "alive",
            Status::Suspect => "suspect",
            Status::Faulty => "faulty",
            Status::Leave => "leave",
        };
        write!(f, "{s}")
    }
}

/// A known peer. Identified by `address`, treated as an opaque,
/// case-sensitive `"host:port"` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub address: String,
    pub status: Status,
    pub incarnation_number: i64,
}

impl Member {
    pub fn new(address: impl Into<String>, status: Status, incarnation_number: i64) -> Self {
        Self {
            address: address.into(),
            status,
            incarnation_number,
        }
    }

    /// Whether `(status, incarnation)` supersedes this member's current
    /// record: a strictly higher incarnation always wins; at equal
    /// incarnation, higher status precedence wins.
    pub fn is_superseded_by(&self, status: Status, incarnation_number: i64) -> bool {
        if incarnation_number > self.incarnation_number {
            return true;
        }
        if incarnation_number == self.incarnation_number {
            return status.precedence() > self.status.precedence();
        }
        false
    }
}

/// A change record emitted by the member table and consumed by the
/// dissemination buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub address: String,
    pub status: Status,
    pub incarnation_number: i64,
    pub piggyback_count: u32,
}

impl Change {
    pub fn new(address: impl Into<String>, status: Status, incarnation_number: i64) -> Self {
        Self {
            address: address.into(),
            status,
            incarnation_number,
            piggyback_count: 0,
        }
    }

    /// Whether `other` supersedes `self` by the same newest-change-wins
    /// rule members use.
    pub fn is_superseded_by(&self, other: &Change) -> bool {
        if other.incarnation_number > self.incarnation_number {
            return true;
        }
        if other.incarnation_number == self.incarnation_number {
            return other.status.precedence() > self.status.precedence();
        }
        false
    }
}

/// The kind of membership event the table emits for a given change:
/// `alive | suspect | faulty | leave | new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    New,
    Alive,
    Suspect,
    Faulty,
    Leave,
}

impl From<Status> for EventKind {
    fn from(status: Status) -> Self {
        match status {
            Status::Alive => EventKind::Alive,
            Status::Suspect => EventKind::Suspect,
            Status::Faulty => EventKind::Faulty,
            Status::Leave => EventKind::Leave,
        }
    }
}

/// A membership event: one change plus the kind it was delivered as.
/// Multiple updates from a single `update()` call are delivered as one
/// batch (`Vec<MembershipEvent>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub kind: EventKind,
    pub member: Member,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_incarnation_always_supersedes() {
        let m = Member::new("a:1", Status::Alive, 5);
        assert!(m.is_superseded_by(Status::Leave, 6));
    }

    #[test]
    fn same_incarnation_downgrade_wins() {
        let m = Member::new("a:1", Status::Alive, 5);
        assert!(m.is_superseded_by(Status::Suspect, 5));
        assert!(m.is_superseded_by(Status::Faulty, 5));
    }

    #[test]
    fn same_incarnation_upgrade_loses() {
        let m = Member::new("a:1", Status::Suspect, 5);
        assert!(!m.is_superseded_by(Status::Alive, 5));
    }

    #[test]
    fn lower_incarnation_never_supersedes() {
        let m = Member::new("a:1", Status::Alive, 5);
        assert!(!m.is_superseded_by(Status::Faulty, 4));
    }

    #[test]
    fn precedence_matches_spec_order() {
        assert!(Status::Faulty.precedence() > Status::Suspect.precedence());
        assert!(Status::Suspect.precedence() > Status::Alive.precedence());
        assert!(Status::Alive.precedence() > Status::Leave.precedence());
    }
}
