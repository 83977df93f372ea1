use thiserror::Error;

/// Crate-wide error type. One variant per failure kind so callers can
/// match instead of string-sniffing an opaque error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kv store: {0}")]
    Kv(String),

    #[error("decode document: {0}")]
    Decode(String),

    #[error("encode document: {0}")]
    Encode(String),

    #[error("no alive worker for service {0}")]
    NoEndpoints(String),

    #[error("rpc to {endpoint} failed: {reason}")]
    Rpc { endpoint: String, reason: String },

    #[error("lease {0} lost")]
    LeaseLost(u64),

    #[error("invalid listen port {0}, should be more than 1024")]
    InvalidPort(u16),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn rpc(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Error::Rpc {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
