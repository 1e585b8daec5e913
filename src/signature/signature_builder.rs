use super::{validate, Signature, SignatureBuf, SignatureError, SignatureErrorKind, MAX_SIGNATURE_LENGTH};

/// Incrementally builds a signature, enforcing the 255-byte cap.
///
/// The builder trusts its callers to produce structurally valid output; the
/// cap is the only failure mode. A debug assertion re-validates the result.
pub struct SignatureBuilder {
    data: [u8; MAX_SIGNATURE_LENGTH],
    len: usize,
}

impl SignatureBuilder {
    pub const fn new() -> Self {
        Self {
            data: [0; MAX_SIGNATURE_LENGTH],
            len: 0,
        }
    }

    /// Append a single type code.
    pub fn push(&mut self, code: u8) -> Result<(), SignatureError> {
        if self.len == MAX_SIGNATURE_LENGTH {
            return Err(SignatureError::new(SignatureErrorKind::SignatureTooLong));
        }

        self.data[self.len] = code;
        self.len += 1;
        Ok(())
    }

    /// Append a complete signature.
    pub fn append(&mut self, signature: &Signature) -> Result<(), SignatureError> {
        let bytes = signature.as_bytes();

        if self.len + bytes.len() > MAX_SIGNATURE_LENGTH {
            return Err(SignatureError::new(SignatureErrorKind::SignatureTooLong));
        }

        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> SignatureBuf {
        debug_assert!(validate(&self.data[..self.len]).is_ok());
        // SAFETY: Built from valid fragments, re-checked above in debug.
        unsafe { SignatureBuf::from_slice_unchecked(&self.data[..self.len]) }
    }
}
