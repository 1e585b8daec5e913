//! Types for working with D-Bus type signatures.

pub use self::signature::Signature;
mod signature;

pub use self::signature_buf::SignatureBuf;
mod signature_buf;

pub use self::signature_builder::SignatureBuilder;
mod signature_builder;

pub use self::signature_error::SignatureError;
pub(crate) use self::signature_error::SignatureErrorKind;
mod signature_error;

pub use self::iter::{Iter, Part};
mod iter;

pub(crate) use self::validation::validate;
mod validation;


/// The maximum length of a signature in bytes.
pub(crate) const MAX_SIGNATURE_LENGTH: usize = 255;

/// The maximum number of nested arrays or structs.
pub(crate) const MAX_CONTAINER_DEPTH: usize = 32;

/// The maximum total nesting depth of a signature.
pub(crate) const MAX_DEPTH: usize = 64;
