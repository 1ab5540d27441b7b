// Wire message shapes and the transport contract external callers
// implement to move them. The transport itself -- sockets,
// framing, retries -- is out of scope; this crate only defines what goes
// over the wire and the trait it expects to call to send it.

use crate::error::Result;
use crate::member::Change;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub app: String,
    pub source: String,
    pub incarnation_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub app: String,
    pub coordinator: String,
    pub membership: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub source: String,
    pub checksum: u32,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub checksum: u32,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReqRequest {
    pub source: String,
    pub target: String,
    pub checksum: u32,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReqResponse {
    pub reached: bool,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub source: String,
}

/// Deliberately empty: a `leave` is fire-and-forget, acknowledged purely
/// to close out the request/response cycle the transport imposes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaveResponse {}

/// Sends protocol messages to a peer address and awaits its reply.
/// Implemented by the embedder on top of whatever socket layer it uses;
/// this crate only shapes the payloads.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_join(&self, target: &str, request: JoinRequest) -> Result<JoinResponse>;
    async fn send_ping(&self, target: &str, request: PingRequest) -> Result<PingResponse>;
    async fn send_ping_req(
        &self,
        target: &str,
        request: PingReqRequest,
    ) -> Result<PingReqResponse>;
    async fn send_leave(&self, target: &str, request: LeaveRequest) -> Result<LeaveResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Status;

    #[test]
    fn ping_request_round_trips_through_json() {
        let request = PingRequest {
            source: "a:1".to_string(),
            checksum: 0xdead_beef,
            changes: vec![Change::new("a:1", Status::Suspect, 7)],
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: PingRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.checksum, request.checksum);
        assert_eq!(decoded.changes, request.changes);
    }

    #[test]
    fn leave_response_is_empty() {
        let encoded = serde_json::to_string(&LeaveResponse::default()).unwrap();
        assert_eq!(encoded, "{}");
    }
}
