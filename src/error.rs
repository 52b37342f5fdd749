use std::fmt::{self, Display};

/// A result type used pervasively across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate's catch-all error type.
///
/// Variants are intentionally coarse: callers match on `Error::NotLeader` /
/// `Error::SessionExpired` to drive clerk retry logic, everything else
/// collapses to a message that gets logged and propagated up.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Something went wrong that no caller should try to recover from.
    Internal(String),
    /// Configuration file or environment was malformed.
    Config(String),
    /// A wire message or on-disk record failed to parse.
    Parse(String),
    /// The server handling a client request is not (or no longer) the
    /// Raft leader. Carries a hint at who might be, if known.
    NotLeader { leader_hint: Option<u64> },
    /// The client's session was evicted before this request's reply could
    /// be delivered (e.g. due to a leadership change mid-flight).
    SessionExpired,
    /// Failed to encode a value for storage or transmission.
    Encode(String),
    /// Failed to decode a value read from storage or the network.
    Decode(String),
    /// The underlying RPC transport failed (timeout, connection refused,
    /// peer unreachable).
    Rpc(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "internal error: {s}"),
            Error::Config(s) => write!(f, "configuration error: {s}"),
            Error::Parse(s) => write!(f, "parse error: {s}"),
            Error::NotLeader { leader_hint: Some(id) } => {
                write!(f, "not leader, try {id}")
            }
            Error::NotLeader { leader_hint: None } => write!(f, "not leader"),
            Error::SessionExpired => write!(f, "session expired"),
            Error::Encode(s) => write!(f, "encode error: {s}"),
            Error::Decode(s) => write!(f, "decode error: {s}"),
            Error::Rpc(s) => write!(f, "rpc error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(s: tonic::Status) -> Self {
        Error::Rpc(s.message().to_string())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
