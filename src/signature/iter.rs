use std::slice;

use crate::proto;

use super::Signature;

/// A single complete type yielded by [`Iter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part<'a> {
    /// A one-byte type, including variants.
    Single(&'a Signature),
    /// An array together with its element signature.
    Array(&'a Signature),
    /// A struct together with its concatenated field signatures.
    Struct(&'a Signature),
    /// A dictionary together with its key and value signatures.
    Dict(&'a Signature, &'a Signature),
}

impl Part<'_> {
    /// The natural alignment of values of this part.
    ///
    /// A dictionary aligns as the array it is encoded as; its entries align
    /// to 8 on their own.
    pub(crate) fn alignment(&self) -> usize {
        match self {
            Part::Single(sig) => sig.alignment(),
            Part::Array(..) | Part::Dict(..) => 4,
            Part::Struct(..) => 8,
        }
    }
}

/// An iterator over the top-level complete types of a signature.
///
/// # Examples
///
/// ```
/// use unibus::{Signature, signature::Part};
///
/// let sig = Signature::new("ua{sv}")?;
/// let mut it = sig.iter();
///
/// assert_eq!(it.next(), Some(Part::Single(Signature::UINT32)));
/// assert!(matches!(it.next(), Some(Part::Dict(..))));
/// assert_eq!(it.next(), None);
/// # Ok::<_, unibus::SignatureError>(())
/// ```
pub struct Iter<'a> {
    iter: slice::Iter<'a, u8>,
}

impl<'a> Iter<'a> {
    #[inline]
    pub(super) fn new(signature: &'a Signature) -> Iter<'a> {
        Iter {
            iter: signature.as_bytes().iter(),
        }
    }

    /// Consume one complete type and return its span.
    fn next_signature(&mut self) -> Option<&'a Signature> {
        let slice = self.iter.as_slice();
        let mut depth = 0usize;
        let mut n = 0;

        loop {
            let &b = self.iter.next()?;

            let (c, term) = match b {
                b'a' => (0, false),
                b'(' | b'{' => (1, false),
                b')' | b'}' => (-1, true),
                _ => (0, true),
            };

            depth = depth.wrapping_add_signed(c);
            n += 1;

            if term && depth == 0 {
                break;
            }
        }

        // SAFETY: A span of a valid signature delimited at complete type
        // boundaries is itself valid.
        Some(unsafe { Signature::new_unchecked(&slice[..n]) })
    }

    /// Consume the interior of a container whose opening byte has already
    /// been taken, up to the matching closing byte.
    fn next_interior(&mut self) -> Option<&'a Signature> {
        let slice = self.iter.as_slice();
        let mut depth = 1usize;
        let mut n = 0;

        loop {
            let &b = self.iter.next()?;

            depth = depth.wrapping_add_signed(match b {
                b'(' | b'{' => 1,
                b')' | b'}' => -1,
                _ => 0,
            });

            if depth == 0 {
                break;
            }

            n += 1;
        }

        // SAFETY: See next_signature.
        Some(unsafe { Signature::new_unchecked(&slice[..n]) })
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Part<'a>;

    fn next(&mut self) -> Option<Part<'a>> {
        let slice = self.iter.as_slice();
        let b = *self.iter.next()?;

        Some(match proto::Type::new(b) {
            proto::Type::ARRAY => {
                if self.iter.as_slice().first() == Some(&b'{') {
                    self.iter.next()?;
                    let key = self.next_signature()?;
                    let value = self.next_signature()?;

                    if self.iter.next().copied() != Some(b'}') {
                        return None;
                    }

                    Part::Dict(key, value)
                } else {
                    Part::Array(self.next_signature()?)
                }
            }
            proto::Type::OPEN_PAREN => Part::Struct(self.next_interior()?),
            // SAFETY: A single byte of a valid signature in type position is
            // a valid one-byte signature.
            _ => Part::Single(unsafe { Signature::new_unchecked(&slice[..1]) }),
        })
    }
}
