use thiserror::Error;

/// Local, non-fatal protocol errors: every variant here aborts the current
/// cycle back to IDLE rather than propagating to peers or crashing the
/// process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("cannot acquire a paser: P = {0} units configured")]
    InvalidPaserCount(i64),
    #[error("message referenced unknown peer id {0}")]
    UnknownPeer(i64),
}

/// Startup-time configuration errors: these are fatal and reported from
/// `main` before any peer connection is attempted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("peer count N must be at least 1, got {0}")]
    TooFewPeers(i64),
    #[error("process id {id} is out of range [1..{n}]")]
    IdOutOfRange { id: i64, n: i64 },
}
