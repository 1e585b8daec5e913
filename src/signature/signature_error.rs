use std::error;
use std::fmt;

/// An error raised when validating a D-Bus signature.
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureError {
    kind: SignatureErrorKind,
}

impl SignatureError {
    #[inline]
    pub(crate) const fn new(kind: SignatureErrorKind) -> Self {
        Self { kind }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SignatureErrorKind::SignatureTooLong => {
                write!(f, "Signature is longer than 255 bytes")
            }
            SignatureErrorKind::UnknownTypeCode(code) => {
                write!(f, "Unknown type code {:?}", code as char)
            }
            SignatureErrorKind::MissingArrayElementType => {
                write!(f, "Array is missing its element type")
            }
            SignatureErrorKind::StructEndedButNotStarted => {
                write!(f, "Struct ended but was not started")
            }
            SignatureErrorKind::StructHasNoFields => {
                write!(f, "Struct must have at least one field")
            }
            SignatureErrorKind::StructStartedButNotEnded => {
                write!(f, "Struct started but was not ended")
            }
            SignatureErrorKind::DictEndedButNotStarted => {
                write!(f, "Dict entry ended but was not started")
            }
            SignatureErrorKind::DictEntryNotInsideArray => {
                write!(f, "Dict entry must be the element type of an array")
            }
            SignatureErrorKind::DictEntryHasOnlyOneField => {
                write!(f, "Dict entry must have a value type")
            }
            SignatureErrorKind::DictEntryHasTooManyFields => {
                write!(f, "Dict entry has more than two fields")
            }
            SignatureErrorKind::DictStartedButNotEnded => {
                write!(f, "Dict entry started but was not ended")
            }
            SignatureErrorKind::DictKeyMustBeBasicType => {
                write!(f, "Dict entry key must be a basic type")
            }
            SignatureErrorKind::ExceededMaximumArrayRecursion => {
                write!(f, "Exceeded maximum array nesting depth")
            }
            SignatureErrorKind::ExceededMaximumStructRecursion => {
                write!(f, "Exceeded maximum struct nesting depth")
            }
            SignatureErrorKind::ExceededMaximumDepth => {
                write!(f, "Exceeded maximum signature nesting depth")
            }
        }
    }
}

impl error::Error for SignatureError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureErrorKind {
    SignatureTooLong,
    UnknownTypeCode(u8),
    MissingArrayElementType,
    StructEndedButNotStarted,
    StructHasNoFields,
    StructStartedButNotEnded,
    DictEndedButNotStarted,
    DictEntryNotInsideArray,
    DictEntryHasOnlyOneField,
    DictEntryHasTooManyFields,
    DictStartedButNotEnded,
    DictKeyMustBeBasicType,
    ExceededMaximumArrayRecursion,
    ExceededMaximumStructRecursion,
    ExceededMaximumDepth,
}
