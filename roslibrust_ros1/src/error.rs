use roslibrust_common::Error as CommonError;

/// Errors specific to the TCPROS framing and connection-header handshake.
#[derive(thiserror::Error, Debug)]
pub enum TcprosError {
    #[error("connection header field did not match `key=value`: {0:?}")]
    MalformedField(String),
    #[error("connection header is missing required field: {0}")]
    MissingField(&'static str),
    #[error("peer advertised type {their_type}/{their_md5}, expected {our_type}/{our_md5}")]
    TypeMismatch {
        their_type: String,
        their_md5: String,
        our_type: String,
        our_md5: String,
    },
    #[error("peer reported error: {0}")]
    PeerError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_rosmsg::Error),
}

/// Errors from the XML-RPC call queue (Master-API client and peer Slave-API calls).
#[derive(thiserror::Error, Debug)]
pub enum XmlRpcError {
    #[error("connection refused after exhausting retry schedule ({0} attempts)")]
    RetriesExhausted(usize),
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("master/peer returned failure status {status_code}: {status_message}")]
    RemoteFailure {
        status_code: i32,
        status_message: String,
    },
    #[error("failed to encode/decode xmlrpc payload: {0}")]
    Codec(String),
    #[error("call queue was cleared before this call could complete")]
    QueueCleared,
}

/// Top-level error type for this crate, convertible into [`roslibrust_common::Error`].
#[derive(thiserror::Error, Debug)]
pub enum Ros1Error {
    #[error(transparent)]
    Tcpros(#[from] TcprosError),
    #[error(transparent)]
    XmlRpc(#[from] XmlRpcError),
    #[error("node is shutting down or has shut down, operation is a no-op")]
    ShuttingDown,
    #[error("a call is already in progress on this service client")]
    ServiceClientBusy,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<Ros1Error> for CommonError {
    fn from(err: Ros1Error) -> Self {
        match err {
            Ros1Error::Tcpros(TcprosError::Io(e)) => CommonError::IoError(e),
            Ros1Error::Tcpros(e) => CommonError::SerializationError(e.to_string()),
            Ros1Error::XmlRpc(e) => CommonError::ServerError(e.to_string()),
            Ros1Error::ShuttingDown => CommonError::Disconnected,
            Ros1Error::ServiceClientBusy => {
                CommonError::Unexpected(anyhow::anyhow!("service client call already in flight"))
            }
            Ros1Error::Io(e) => CommonError::IoError(e),
            Ros1Error::Other(e) => CommonError::Unexpected(e),
        }
    }
}

pub type Ros1Result<T> = std::result::Result<T, Ros1Error>;
