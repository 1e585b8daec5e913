use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::object_path::ObjectPathError;
use crate::signature::{SignatureBuf, SignatureError};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self {
            kind: Box::new(kind),
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Test if the error was caused by a value not being representable in,
    /// or decodable from, the wire format.
    pub fn is_type_error(&self) -> bool {
        matches!(
            &*self.kind,
            ErrorKind::Signature(..)
                | ErrorKind::ObjectPath(..)
                | ErrorKind::Utf8(..)
                | ErrorKind::BufferUnderflow
                | ErrorKind::NotNullTerminated
                | ErrorKind::InvalidBoolean(..)
                | ErrorKind::TypeMismatch { .. }
                | ErrorKind::ExpectedSingleSignature(..)
                | ErrorKind::MissingFd(..)
        )
    }

    /// Test if the error indicates that the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Closed)
    }

    /// The error name carried by a peer error reply, if this is one.
    pub fn error_name(&self) -> Option<&str> {
        match &*self.kind {
            ErrorKind::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8(error))
    }
}

impl fmt::Debug for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::ObjectPath(error) => error.fmt(f),
            ErrorKind::Utf8(error) => error.fmt(f),
            ErrorKind::BufferUnderflow => write!(f, "Buffer underflow"),
            ErrorKind::NotNullTerminated => write!(f, "String is not null terminated"),
            ErrorKind::InvalidBoolean(value) => {
                write!(f, "Invalid boolean value {value}")
            }
            ErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "Expected value of type `{expected}` but got `{actual}`")
            }
            ErrorKind::ExpectedSingleSignature(signature) => {
                write!(f, "Expected a single complete type but got `{signature}`")
            }
            ErrorKind::MissingFd(index) => {
                write!(f, "Message carries no file descriptor at index {index}")
            }
            ErrorKind::Call { name, detail } => match detail {
                Some(detail) => write!(f, "Call failed with {name}: {detail}"),
                None => write!(f, "Call failed with {name}"),
            },
            ErrorKind::Closed => write!(f, "Connection is closed"),
            ErrorKind::MissingBus => write!(f, "Missing session bus address"),
            ErrorKind::InvalidAddress => write!(f, "Invalid d-bus address"),
            ErrorKind::InvalidSasl => write!(f, "Invalid SASL message"),
            ErrorKind::SaslRejected => write!(f, "SASL authentication rejected"),
            ErrorKind::FdPassingUnsupported => {
                write!(f, "Peer did not negotiate file descriptor passing")
            }
            ErrorKind::MissingPath => write!(f, "Missing required PATH header"),
            ErrorKind::MissingInterface => write!(f, "Missing required INTERFACE header"),
            ErrorKind::MissingMember => write!(f, "Missing required MEMBER header"),
            ErrorKind::MissingDestination => {
                write!(f, "Missing required DESTINATION header")
            }
            ErrorKind::MissingReplySerial => {
                write!(f, "Missing required REPLY_SERIAL header")
            }
            ErrorKind::MissingErrorName => write!(f, "Missing required ERROR_NAME header"),
            ErrorKind::ZeroSerial => write!(f, "Zero in header serial"),
            ErrorKind::InvalidEndianness(b) => {
                write!(f, "Unknown byte-order mark {b:#04x}")
            }
            ErrorKind::InvalidMessageType(b) => write!(f, "Unknown message type {b}"),
            ErrorKind::InvalidProtocolVersion(b) => {
                write!(f, "Unsupported protocol version {b}")
            }
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "Array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "Body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::DuplicateVardictKey(key) => {
                write!(f, "Duplicate dictionary key `{key}`")
            }
            ErrorKind::NameRejected(name) => {
                write!(f, "Request for name `{name}` was rejected")
            }
            ErrorKind::UnexpectedReply(value) => {
                write!(f, "Unexpected reply code {value} from bus")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &*self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            ErrorKind::Utf8(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    ObjectPath(ObjectPathError),
    Utf8(Utf8Error),
    BufferUnderflow,
    NotNullTerminated,
    InvalidBoolean(u32),
    TypeMismatch {
        expected: SignatureBuf,
        actual: SignatureBuf,
    },
    ExpectedSingleSignature(SignatureBuf),
    MissingFd(u32),
    Call {
        name: String,
        detail: Option<String>,
    },
    Closed,
    MissingBus,
    InvalidAddress,
    InvalidSasl,
    SaslRejected,
    FdPassingUnsupported,
    MissingPath,
    MissingInterface,
    MissingMember,
    MissingDestination,
    MissingReplySerial,
    MissingErrorName,
    ZeroSerial,
    InvalidEndianness(u8),
    InvalidMessageType(u8),
    InvalidProtocolVersion(u8),
    ArrayTooLong(u32),
    BodyTooLong(u32),
    DuplicateVardictKey(String),
    NameRejected(String),
    UnexpectedReply(u32),
}
