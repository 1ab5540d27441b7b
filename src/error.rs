// Error taxonomy for the membership and hash-ring engine.
//
// One flat `thiserror` enum, scoped down to the conditions this crate's
// components can actually raise.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid bootstrap host file: {0}")]
    InvalidHostFile(String),

    #[error("ringpop.invalid-join.app: joiner app '{joiner_app}' does not match local app '{local_app}'")]
    InvalidJoinApp {
        joiner_app: String,
        local_app: String,
    },

    #[error("ringpop.invalid-join.source: joiner address equals local address")]
    InvalidJoinSource,

    #[error("redundant leave: local member already left")]
    RedundantLeave,

    #[error("invalid leave: local member was never added to the table")]
    InvalidLeaveLocalMember,

    #[error("node is already ready")]
    AlreadyReady,

    #[error("node is not ready")]
    NotReady,

    #[error("destroyed whilst pinging")]
    Destroyed,

    #[error("join failed: {0}")]
    JoinFailed(String),

    #[error("join timed out after {0:?}")]
    JoinTimeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
