//! Error types for the xic engine.
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is [`XicError`]. The enum is `Clone` so a single recorded failure cause can
//! be handed to every pending call on a connection that goes down.
//!
//! Errors that are turned into failure answers on the wire carry a
//! conventional exception name ([`XicError::exname`]) so peers written in
//! other languages can match on it.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::{Map, Value};

/// Status code carried by failure answers built from local errors.
pub const FAILURE_STATUS: i32 = -1;

/// Decode failures of the VBS value codec.
///
/// The offset is the position in the input at which decoding gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VbsError {
    /// The input ended before a value or a declared length was complete.
    #[error("incomplete vbs data at offset {0}")]
    Incomplete(usize),

    /// The input holds a byte sequence that is not valid vbs.
    #[error("invalid vbs data at offset {offset}: {reason}")]
    Invalid {
        /// Offset of the offending byte.
        offset: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A number does not fit its destination type.
    #[error("vbs number too big at offset {0}")]
    TooBig(usize),
}

/// Main error type for all xic operations.
#[derive(Debug, Clone, Error)]
pub enum XicError {
    /// I/O error on a socket.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Malformed vbs stream in a message body.
    #[error("vbs error: {0}")]
    Vbs(#[from] VbsError),

    /// Bad magic, unknown message type, or a body that does not fit its type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Body decoded to a different length than the header declared.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Message body exceeds the configured size limit.
    #[error("message size {size} exceeds limit {limit}")]
    MessageSize {
        /// Declared or actual body size.
        size: i64,
        /// Configured limit.
        limit: usize,
    },

    /// Outbound connect failed.
    #[error("connect to {0} failed")]
    ConnectFailed(String),

    /// Outbound connect (including the hello wait) did not finish in time.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// Peer closed the socket in the middle of a read.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Connection was closed by either side.
    #[error("connection closed")]
    ConnectionClosed,

    /// No message arrived in time while answers were pending.
    #[error("message timeout on {0}")]
    MessageTimeout(String),

    /// Graceful close did not finish before the close timeout.
    #[error("close timeout on {0}")]
    CloseTimeout(String),

    /// No servant is registered for the service and no default exists.
    #[error("service `{0}` not found")]
    ServiceNotFound(String),

    /// Quest carried an empty service name.
    #[error("service name is empty")]
    ServiceEmpty,

    /// Servant has no such method.
    #[error("method `{0}` not found")]
    MethodNotFound(String),

    /// Quest carried an empty method name.
    #[error("method name is empty")]
    MethodEmpty,

    /// Servant gave no answer to a twoway quest and did not defer it.
    #[error("method `{0}` returned no answer for a twoway quest")]
    MethodOneway(String),

    /// Quest arrived on an inbound connection with no adapter bound.
    #[error("no adapter bound to connection")]
    AdapterAbsent,

    /// Required parameter absent from an argument map.
    #[error("parameter `{0}` is missing")]
    ParameterMissing(String),

    /// Parameter present but of the wrong kind.
    #[error("parameter `{name}` should be {expected}")]
    ParameterType {
        /// Parameter name.
        name: String,
        /// Expected kind.
        expected: &'static str,
    },

    /// Parameter has the right kind but an unacceptable value.
    #[error("parameter `{0}` has invalid data")]
    ParameterData(String),

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint `{0}`")]
    EndpointParse(String),

    /// No endpoint was given where one is required.
    #[error("no endpoint for `{0}`")]
    EndpointMissing(String),

    /// Proxy string has no service name.
    #[error("invalid proxy string `{0}`")]
    ServiceParse(String),

    /// Proxy is bound to a fixed inbound connection.
    #[error("proxy is bound to a fixed connection")]
    ProxyFixed,

    /// Engine has been shut down or dropped.
    #[error("engine stopped")]
    EngineStopped,

    /// Error raised by a servant implementation.
    #[error("{0}")]
    Servant(String),

    /// Failure answer received from the peer.
    #[error("{0}")]
    Remote(RemoteException),
}

impl From<io::Error> for XicError {
    fn from(e: io::Error) -> Self {
        XicError::Io(Arc::new(e))
    }
}

impl XicError {
    /// Build a servant error with a free-form message.
    pub fn servant(msg: impl Into<String>) -> Self {
        XicError::Servant(msg.into())
    }

    /// Conventional exception name used in failure answers.
    pub fn exname(&self) -> &str {
        match self {
            XicError::Io(_) => "SocketException",
            XicError::Vbs(_) | XicError::Marshal(_) => "MarshalException",
            XicError::Protocol(_) => "ProtocolException",
            XicError::MessageSize { .. } => "MessageSizeException",
            XicError::ConnectFailed(_) => "ConnectFailedException",
            XicError::ConnectTimeout(_) => "ConnectTimeoutException",
            XicError::ConnectionLost(_) => "ConnectionLostException",
            XicError::ConnectionClosed => "ConnectionClosedException",
            XicError::MessageTimeout(_) => "MessageTimeoutException",
            XicError::CloseTimeout(_) => "CloseTimeoutException",
            XicError::ServiceNotFound(_) => "ServiceNotFoundException",
            XicError::ServiceEmpty => "ServiceEmptyException",
            XicError::MethodNotFound(_) => "MethodNotFoundException",
            XicError::MethodEmpty => "MethodEmptyException",
            XicError::MethodOneway(_) => "MethodOnewayException",
            XicError::AdapterAbsent => "AdapterAbsentException",
            XicError::ParameterMissing(_) => "ParameterMissingException",
            XicError::ParameterType { .. } => "ParameterTypeException",
            XicError::ParameterData(_) => "ParameterDataException",
            XicError::EndpointParse(_) => "EndpointParseException",
            XicError::EndpointMissing(_) => "EndpointMissingException",
            XicError::ServiceParse(_) => "ServiceParseException",
            XicError::ProxyFixed => "ProxyFixedException",
            XicError::EngineStopped => "EngineStoppedException",
            XicError::Servant(_) => "ServantException",
            XicError::Remote(re) => re.exname(),
        }
    }

    /// Numeric exception code. Local errors use 0.
    pub fn code(&self) -> i64 {
        match self {
            XicError::Remote(re) => re.code(),
            _ => 0,
        }
    }

    /// Build the argument map of a failure answer for this error.
    ///
    /// A remote exception is relayed with its raiser extended by `raiser`.
    /// Any other error is marked `local`.
    pub fn to_answer_args(&self, raiser: &str) -> Map {
        if let XicError::Remote(re) = self {
            let mut args = re.args.clone();
            let chained = match re.raiser() {
                "" => format!("UNKNOWN_RAISER, {}", raiser),
                prev => format!("{}, {}", prev, raiser),
            };
            args.insert("raiser", chained);
            return args;
        }

        let mut args = Map::with_capacity(7);
        args.insert("exname", self.exname());
        args.insert("code", self.code());
        args.insert("tag", "");
        args.insert("message", self.to_string());
        args.insert("raiser", raiser);
        args.insert("detail", Map::new());
        args.insert("local", true);
        args
    }
}

/// Failure answer received from a peer.
///
/// Holds the answer status and its exception payload as sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteException {
    /// Answer status (nonzero).
    pub status: i32,
    /// Exception payload.
    pub args: Map,
}

impl RemoteException {
    /// Wrap a failure answer's status and arguments.
    pub fn new(status: i32, args: Map) -> Self {
        Self { status, args }
    }

    fn str_field(&self, key: &str) -> &str {
        self.args.get_str(key).unwrap_or("")
    }

    /// Remote exception name, `"RemoteException"` when absent.
    pub fn exname(&self) -> &str {
        match self.str_field("exname") {
            "" => "RemoteException",
            name => name,
        }
    }

    /// Remote exception code.
    pub fn code(&self) -> i64 {
        self.args.get_int("code").unwrap_or(0)
    }

    /// Remote exception tag.
    pub fn tag(&self) -> &str {
        self.str_field("tag")
    }

    /// Remote exception message.
    pub fn message(&self) -> &str {
        self.str_field("message")
    }

    /// Chain of places that raised or relayed the exception.
    pub fn raiser(&self) -> &str {
        self.str_field("raiser")
    }

    /// Free-form detail map.
    pub fn detail(&self) -> Option<&Map> {
        self.args.get("detail").and_then(Value::as_map)
    }

    /// True when the payload was built on this side for a local failure.
    pub fn is_local(&self) -> bool {
        self.args.get_bool("local").unwrap_or(false)
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "!{}({}) on {} --- {}",
            self.exname(),
            self.code(),
            self.raiser(),
            self.message()
        )
    }
}

/// Result type alias using XicError.
pub type Result<T> = std::result::Result<T, XicError>;
