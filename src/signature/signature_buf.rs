use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use super::{validate, Signature, SignatureError, MAX_SIGNATURE_LENGTH};

/// An owned D-Bus signature.
///
/// Signatures are at most 255 bytes long, so this is backed by an inline
/// buffer and is cheap to clone.
///
/// # Examples
///
/// ```
/// use unibus::{Signature, SignatureBuf};
///
/// let sig = SignatureBuf::new("a{sv}")?;
/// assert_eq!(sig, *Signature::new("a{sv}")?);
/// # Ok::<_, unibus::SignatureError>(())
/// ```
#[derive(Clone)]
pub struct SignatureBuf {
    data: [u8; MAX_SIGNATURE_LENGTH],
    len: u8,
}

impl SignatureBuf {
    /// Construct a new signature with validation.
    #[inline]
    pub fn new<S>(signature: &S) -> Result<Self, SignatureError>
    where
        S: ?Sized + AsRef<[u8]>,
    {
        let signature = signature.as_ref();
        validate(signature)?;
        // SAFETY: The signature was just validated.
        Ok(unsafe { Self::from_slice_unchecked(signature) })
    }

    /// Construct a new empty signature.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            data: [0; MAX_SIGNATURE_LENGTH],
            len: 0,
        }
    }

    /// Construct from a borrowed signature.
    #[inline]
    pub fn from_signature(signature: &Signature) -> Self {
        // SAFETY: The borrowed signature is already valid.
        unsafe { Self::from_slice_unchecked(signature.as_bytes()) }
    }

    /// Construct from a byte slice without validation.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the slice is a valid signature, which
    /// implies that it is at most 255 bytes long.
    pub(crate) unsafe fn from_slice_unchecked(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_SIGNATURE_LENGTH);
        let mut data = [0; MAX_SIGNATURE_LENGTH];
        data[..bytes.len()].copy_from_slice(bytes);

        Self {
            data,
            len: bytes.len() as u8,
        }
    }

    /// Borrow as a [`Signature`].
    #[inline]
    pub fn as_signature(&self) -> &Signature {
        // SAFETY: The contents are valid by construction.
        unsafe { Signature::new_unchecked(&self.data[..usize::from(self.len)]) }
    }
}

impl Deref for SignatureBuf {
    type Target = Signature;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_signature()
    }
}

impl Borrow<Signature> for SignatureBuf {
    #[inline]
    fn borrow(&self) -> &Signature {
        self.as_signature()
    }
}

impl AsRef<Signature> for SignatureBuf {
    #[inline]
    fn as_ref(&self) -> &Signature {
        self.as_signature()
    }
}

impl Default for SignatureBuf {
    #[inline]
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&Signature> for SignatureBuf {
    #[inline]
    fn from(signature: &Signature) -> Self {
        Self::from_signature(signature)
    }
}

impl fmt::Debug for SignatureBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_signature().fmt(f)
    }
}

impl fmt::Display for SignatureBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for SignatureBuf {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_signature() == other.as_signature()
    }
}

impl Eq for SignatureBuf {}

impl PartialEq<Signature> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &Signature) -> bool {
        self.as_signature() == other
    }
}

impl PartialEq<&Signature> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &&Signature) -> bool {
        self.as_signature() == *other
    }
}

impl PartialEq<str> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for SignatureBuf {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Hash for SignatureBuf {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_signature().hash(state);
    }
}
