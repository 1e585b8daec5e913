/// Trim trailing ASCII whitespace.
pub(crate) fn trim_end(bytes: &[u8]) -> &[u8] {
    let mut n = bytes.len();

    while n > 0 && bytes[n - 1].is_ascii_whitespace() {
        n -= 1;
    }

    &bytes[..n]
}

/// Split around the first occurrence of `byte`.
pub(crate) fn split_once(bytes: &[u8], byte: u8) -> Option<(&[u8], &[u8])> {
    let n = bytes.iter().position(|&b| b == byte)?;
    Some((&bytes[..n], &bytes[n + 1..]))
}
