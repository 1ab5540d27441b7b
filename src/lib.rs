//! SWIM-based cluster membership, failure detection and consistent hash
//! ring routing.
//!
//! [`Node`] is the entry point: build one with [`NodeConfig`], a
//! [`Transport`] impl wired to your own socket layer, and a
//! [`StatsSink`] (or [`NoopStats`] if you don't have one yet), then call
//! [`Node::bootstrap`].

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod dissemination;
pub mod error;
pub mod gossip;
pub mod iterator;
pub mod member;
pub mod node;
pub mod ring;
pub mod stats;
pub mod suspicion;
pub mod table;
pub mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use member::{Change, Member, MembershipEvent, Status};
pub use node::Node;
pub use ring::HashRing;
pub use stats::{NoopStats, StatsSink, StatsSubscriber};
pub use table::{MemberTable, Subscriber};
pub use transport::Transport;

/// Crate version, exposed for the `app`/version compatibility checks an
/// embedder may want to surface alongside `app` mismatches.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize a reasonable default `tracing` subscriber for an embedder
/// that doesn't already have one: target/thread-id/level output, level
/// driven by `RUST_LOG`. Convenience only -- any embedder already
/// running `tracing-subscriber` should keep its own setup instead.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
