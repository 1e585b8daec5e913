use std::fmt;
use std::os::fd::{AsRawFd, RawFd};

use crate::buf::{BodyBuf, ReadBuf};
use crate::error::Result;
use crate::signature::{SignatureBuilder, SignatureError};

use super::{Arg, BasicArg, Load, Store};

/// A file descriptor travelling with a message.
///
/// On encode the descriptor is duplicated into the message and its index is
/// written to the wire. On decode the index is resolved against the
/// descriptors that arrived with the frame; the raw value stays valid for as
/// long as the message owning it, so callers keeping it must duplicate it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fd(RawFd);

impl Fd {
    /// Wrap a raw file descriptor for sending.
    #[inline]
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }
}

impl AsRawFd for Fd {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl<T> From<&T> for Fd
where
    T: AsRawFd,
{
    #[inline]
    fn from(fd: &T) -> Self {
        Self(fd.as_raw_fd())
    }
}

impl fmt::Debug for Fd {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fd").field(&self.0).finish()
    }
}

impl Arg for Fd {
    const ALIGNMENT: usize = 4;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'h')
    }
}

impl Store for Fd {
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        let index = buf.push_fd(self.0)?;
        buf.store_u32(index);
        Ok(())
    }
}

impl Load<'_> for Fd {
    fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
        let index = buf.load_u32()?;
        Ok(Self(buf.fd(index)?))
    }
}

impl BasicArg for Fd {}
