use std::fmt;

/// Byte string wrapper which debug-formats as text, escaping anything that
/// is not printable ASCII. Used for protocol lines in diagnostics.
pub(crate) struct LossyStr<'a>(pub(crate) &'a [u8]);

impl fmt::Debug for LossyStr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;

        for &b in self.0 {
            match b {
                b'"' => write!(f, "\\\"")?,
                b'\\' => write!(f, "\\\\")?,
                b'\r' => write!(f, "\\r")?,
                b'\n' => write!(f, "\\n")?,
                0x20..=0x7e => write!(f, "{}", b as char)?,
                _ => write!(f, "\\x{b:02x}")?,
            }
        }

        write!(f, "\"")
    }
}

impl fmt::Display for LossyStr<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::LossyStr;

    #[test]
    fn escapes() {
        assert_eq!(format!("{:?}", LossyStr(b"OK abc")), "\"OK abc\"");
        assert_eq!(format!("{:?}", LossyStr(b"a\r\n")), "\"a\\r\\n\"");
        assert_eq!(format!("{:?}", LossyStr(&[0x01])), "\"\\x01\"");
    }
}
