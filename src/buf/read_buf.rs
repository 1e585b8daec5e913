use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::str::from_utf8;

use crate::error::{Error, ErrorKind, Result};
use crate::object_path::ObjectPath;
use crate::proto::Endianness;
use crate::signature::Signature;

use super::{padding_to, MAX_ARRAY_LENGTH};

/// The read half of the fragment codec.
///
/// Mirrors [`BodyBuf`]: it carries the byte order of the peer, skips padding
/// relative to the start of the enclosing message, and resolves file
/// descriptor indexes against the descriptors that arrived with the frame.
///
/// [`BodyBuf`]: crate::BodyBuf
#[derive(Clone)]
pub struct ReadBuf<'a> {
    data: &'a [u8],
    /// Offset of `data[0]` from the start of the message, for alignment.
    base: usize,
    pos: usize,
    endianness: Endianness,
    fds: &'a [OwnedFd],
}

impl<'a> ReadBuf<'a> {
    /// Construct a reader over a complete message or body.
    #[inline]
    pub fn new(data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            data,
            base: 0,
            pos: 0,
            endianness,
            fds: &[],
        }
    }

    /// Attach the file descriptors that arrived alongside the frame.
    #[inline]
    pub fn with_fds(self, fds: &'a [OwnedFd]) -> Self {
        Self { fds, ..self }
    }

    /// The byte order this buffer decodes with.
    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Test if the buffer has been fully consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Skip padding up to the next multiple of `align`.
    ///
    /// Non-zero padding bytes are accepted.
    pub fn align(&mut self, align: usize) -> Result<()> {
        let padding = padding_to(align, self.base + self.pos);

        if self.remaining() < padding {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        self.pos += padding;
        Ok(())
    }

    /// Take `n` raw bytes.
    pub fn load_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(bytes) = self.data.get(self.pos..self.pos + n) else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        self.pos += n;
        Ok(bytes)
    }

    pub fn load_u8(&mut self) -> Result<u8> {
        let [b] = self.load_slice(1)? else {
            unreachable!();
        };

        Ok(*b)
    }

    pub fn load_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes: [u8; 2] = self.load_slice(2)?.try_into().unwrap();

        Ok(match self.endianness {
            Endianness::BIG => u16::from_be_bytes(bytes),
            _ => u16::from_le_bytes(bytes),
        })
    }

    pub fn load_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes: [u8; 4] = self.load_slice(4)?.try_into().unwrap();

        Ok(match self.endianness {
            Endianness::BIG => u32::from_be_bytes(bytes),
            _ => u32::from_le_bytes(bytes),
        })
    }

    pub fn load_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes: [u8; 8] = self.load_slice(8)?.try_into().unwrap();

        Ok(match self.endianness {
            Endianness::BIG => u64::from_be_bytes(bytes),
            _ => u64::from_le_bytes(bytes),
        })
    }

    #[inline]
    pub fn load_i16(&mut self) -> Result<i16> {
        Ok(self.load_u16()? as i16)
    }

    #[inline]
    pub fn load_i32(&mut self) -> Result<i32> {
        Ok(self.load_u32()? as i32)
    }

    #[inline]
    pub fn load_i64(&mut self) -> Result<i64> {
        Ok(self.load_u64()? as i64)
    }

    #[inline]
    pub fn load_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.load_u64()?))
    }

    pub fn load_bool(&mut self) -> Result<bool> {
        match self.load_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::new(ErrorKind::InvalidBoolean(other))),
        }
    }

    /// Read a length-prefixed, nul-terminated string.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.load_u32()? as usize;
        let bytes = self.load_slice(len)?;

        if self.load_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(from_utf8(bytes)?)
    }

    /// Read an object path.
    pub fn read_object_path(&mut self) -> Result<&'a ObjectPath> {
        Ok(ObjectPath::new(self.read_str()?)?)
    }

    /// Read a signature, which uses a single-byte length prefix.
    pub fn read_signature(&mut self) -> Result<&'a Signature> {
        let len = usize::from(self.load_u8()?);
        let bytes = self.load_slice(len)?;

        if self.load_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(Signature::new(bytes)?)
    }

    /// Read an array frame whose elements align to `element_align`.
    ///
    /// The returned reader is bounded to the array's byte length; iteration
    /// terminates by consumed bytes, not element count.
    pub fn read_array(&mut self, element_align: usize) -> Result<ReadBuf<'a>> {
        let len = self.load_u32()?;

        if len > MAX_ARRAY_LENGTH {
            return Err(Error::new(ErrorKind::ArrayTooLong(len)));
        }

        self.align(element_align)?;

        let start = self.pos;
        let bytes = self.load_slice(len as usize)?;

        Ok(ReadBuf {
            data: bytes,
            base: self.base + start,
            pos: 0,
            endianness: self.endianness,
            fds: self.fds,
        })
    }

    /// Enter a struct frame.
    #[inline]
    pub fn read_struct(&mut self) -> Result<()> {
        self.align(8)
    }

    /// Resolve a file descriptor index read off the wire.
    pub fn fd(&self, index: u32) -> Result<RawFd> {
        match self.fds.get(index as usize) {
            Some(fd) => Ok(fd.as_raw_fd()),
            None => Err(Error::new(ErrorKind::MissingFd(index))),
        }
    }
}

impl fmt::Debug for ReadBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuf")
            .field("endianness", &self.endianness)
            .field("pos", &self.pos)
            .field("len", &self.data.len())
            .finish()
    }
}
