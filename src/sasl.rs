//! The SASL line protocol spoken before binary framing begins.

use crate::error::{Error, ErrorKind, Result};

/// A command sent to the bus during authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaslRequest<'a> {
    /// `AUTH EXTERNAL` with an ascii-hex encoded identity.
    AuthExternal(&'a [u8]),
    /// Ask the bus to allow file descriptors in messages.
    NegotiateUnixFd,
    /// Switch to binary framing.
    Begin,
}

impl SaslRequest<'_> {
    /// Append the wire line for this command, including the terminator.
    pub(crate) fn write_line(&self, out: &mut Vec<u8>) {
        match self {
            SaslRequest::AuthExternal(identity) => {
                out.extend_from_slice(b"AUTH EXTERNAL ");
                out.extend_from_slice(identity);
            }
            SaslRequest::NegotiateUnixFd => {
                out.extend_from_slice(b"NEGOTIATE_UNIX_FD");
            }
            SaslRequest::Begin => {
                out.extend_from_slice(b"BEGIN");
            }
        }

        out.extend_from_slice(b"\r\n");
    }
}

/// A response line from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaslResponse<'a> {
    /// Authentication succeeded; carries the server GUID.
    Ok(&'a str),
    /// The bus agreed to pass file descriptors.
    AgreeUnixFd,
    /// The mechanism or command was rejected.
    Rejected,
    /// The bus did not understand the command.
    Error,
}

/// Parse a single response line, without its terminator.
pub(crate) fn parse_response(line: &[u8]) -> Result<SaslResponse<'_>> {
    let line = crate::utils::trim_end(line);

    let (command, rest) = match crate::utils::split_once(line, b' ') {
        Some((command, rest)) => (command, rest),
        None => (line, &line[line.len()..]),
    };

    match command {
        b"OK" => {
            let guid = std::str::from_utf8(rest)
                .map_err(|_| Error::new(ErrorKind::InvalidSasl))?;
            Ok(SaslResponse::Ok(guid))
        }
        b"AGREE_UNIX_FD" => Ok(SaslResponse::AgreeUnixFd),
        b"REJECTED" => Ok(SaslResponse::Rejected),
        b"ERROR" => Ok(SaslResponse::Error),
        _ => Err(Error::new(ErrorKind::InvalidSasl)),
    }
}

/// The `EXTERNAL` identity of this process: the uid rendered in decimal,
/// then ascii-hex encoded. A uid of 1000 becomes `31303030`.
pub(crate) fn external_identity() -> Vec<u8> {
    // SAFETY: getuid never fails.
    let uid = unsafe { libc::getuid() };
    hex_identity(uid)
}

fn hex_identity(id: u32) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    let decimal = id.to_string();
    let mut out = Vec::with_capacity(decimal.len() * 2);

    for b in decimal.bytes() {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0xf)]);
    }

    out
}
