// Node configuration surface.
//
// Split by concern -- membership/SWIM/ring timing each get their own
// fields on one flat struct -- with every timing constant overridable by
// the embedder but defaulting to the values this protocol expects.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level node configuration.
///
/// `app` and `host_port` are required (no sensible default exists for
/// either), matching the "required" markers on the Configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Logical application/cluster name. Joins across differing `app`
    /// values are rejected (`InvalidJoinApp`).
    pub app: String,

    /// This node's own `"host:port"` address.
    pub host_port: String,

    /// Path to the JSON bootstrap host-list file, consulted when no
    /// explicit host array is supplied to `bootstrap`.
    pub bootstrap_file: String,

    /// Direct ping round-trip deadline.
    pub ping_timeout: Duration,

    /// Deadline for the indirect-ping round (fan-out to `ping_req_size`
    /// peers and await any single affirmative reply).
    pub ping_req_timeout: Duration,

    /// Number of peers to fan out indirect pings to.
    pub ping_req_size: usize,

    /// How long a member stays `suspect` before being marked `faulty`.
    pub suspicion_timeout: Duration,

    /// Floor for the adaptive protocol period, and the span of the
    /// first-tick stagger jitter.
    pub min_protocol_period: Duration,

    /// Virtual nodes per live server on the hash ring.
    pub ring_vnodes: u32,

    /// Number of bootstrap hosts to contact concurrently while joining.
    pub join_size: usize,

    /// Wall-clock budget for a bootstrap join attempt.
    pub max_join_duration: Duration,

    /// Deadline applied by the embedding proxy to forwarded application
    /// requests. The proxy itself is out of scope for this crate; the
    /// value is carried here only because it is part of the Configuration
    /// surface the embedder supplies.
    pub proxy_req_timeout: Duration,
}

impl NodeConfig {
    pub fn new(app: impl Into<String>, host_port: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            host_port: host_port.into(),
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            app: String::new(),
            host_port: String::new(),
            bootstrap_file: "./hosts.json".to_string(),
            ping_timeout: Duration::from_millis(1500),
            ping_req_timeout: Duration::from_millis(5000),
            ping_req_size: 3,
            suspicion_timeout: Duration::from_millis(5000),
            min_protocol_period: Duration::from_millis(200),
            ring_vnodes: 100,
            join_size: 3,
            max_join_duration: Duration::from_millis(300_000),
            proxy_req_timeout: Duration::from_millis(30_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = NodeConfig::new("myapp", "127.0.0.1:3000");
        assert_eq!(cfg.app, "myapp");
        assert_eq!(cfg.host_port, "127.0.0.1:3000");
        assert_eq!(cfg.ping_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.ping_req_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.ping_req_size, 3);
        assert_eq!(cfg.suspicion_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.min_protocol_period, Duration::from_millis(200));
        assert_eq!(cfg.ring_vnodes, 100);
        assert_eq!(cfg.join_size, 3);
        assert_eq!(cfg.max_join_duration, Duration::from_millis(300_000));
    }
}
