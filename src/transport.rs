//! The Unix socket transport: address resolution, the authentication
//! handshake and framed I/O with out-of-band file descriptor passing.

use std::collections::VecDeque;
use std::env;
use std::ffi::OsStr;
use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream as StdUnixStream;

use tokio::io::unix::AsyncFd;
use tokio::net::UnixStream;

use crate::buf::{padding_to, MAX_ARRAY_LENGTH, MAX_BODY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::lossy_str::LossyStr;
use crate::message::Message;
use crate::proto::{Endianness, FIXED_HEADER_LENGTH};
use crate::sasl::{self, SaslRequest, SaslResponse};

const ENV_STARTER_ADDRESS: &str = "DBUS_STARTER_ADDRESS";
const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str =
    "unix:path=/run/dbus/system_bus_socket;unix:path=/var/run/dbus/system_bus_socket";

const RECV_CHUNK: usize = 8192;
const CONTROL_CAPACITY: usize = 256;

/// A connection to a bus endpoint over a Unix stream socket.
///
/// All I/O goes through `sendmsg(2)`/`recvmsg(2)` so that any chunk can
/// carry `SCM_RIGHTS` ancillary descriptors alongside the byte stream.
pub(crate) struct Transport {
    fd: AsyncFd<StdUnixStream>,
    unix_fd: bool,
    guid: String,
}

/// Receive-side state owned by whichever task reads from the transport.
///
/// Descriptors arrive interleaved with bytes; they queue up here until the
/// framing layer pairs them with the message whose header claims them.
pub(crate) struct RecvState {
    buf: Vec<u8>,
    pending_fds: VecDeque<OwnedFd>,
}

impl RecvState {
    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::new(),
            pending_fds: VecDeque::new(),
        }
    }
}

impl Transport {
    /// Connect to the session bus.
    ///
    /// The address is taken from `DBUS_STARTER_ADDRESS` or
    /// `DBUS_SESSION_BUS_ADDRESS`.
    pub(crate) async fn session_bus() -> Result<Self> {
        Self::from_envs([ENV_STARTER_ADDRESS, ENV_SESSION_BUS], None).await
    }

    /// Connect to the system bus.
    ///
    /// The address is taken from `DBUS_STARTER_ADDRESS` or
    /// `DBUS_SYSTEM_BUS_ADDRESS`, with a fallback to the well-known socket
    /// path.
    pub(crate) async fn system_bus() -> Result<Self> {
        Self::from_envs(
            [ENV_STARTER_ADDRESS, ENV_SYSTEM_BUS],
            Some(DEFAULT_SYSTEM_BUS),
        )
        .await
    }

    /// Connect to an explicit bus address such as `unix:path=/run/user/1000/bus`.
    pub(crate) async fn open(address: &OsStr) -> Result<Self> {
        let paths = parse_address_list(address.as_bytes())?;
        Self::connect_any(&paths).await
    }

    async fn from_envs(
        envs: impl IntoIterator<Item = &'static str>,
        default: Option<&str>,
    ) -> Result<Self> {
        for env in envs {
            let Some(address) = env::var_os(env) else {
                continue;
            };

            return Self::open(&address).await;
        }

        match default {
            Some(default) => Self::open(OsStr::new(default)).await,
            None => Err(Error::new(ErrorKind::MissingBus)),
        }
    }

    async fn connect_any(paths: &[&[u8]]) -> Result<Self> {
        let mut last = None;

        for path in paths {
            match UnixStream::connect(OsStr::from_bytes(path)).await {
                Ok(stream) => return Self::from_std(stream.into_std()?),
                Err(error) => last = Some(error),
            }
        }

        match last {
            Some(error) => Err(error.into()),
            None => Err(Error::new(ErrorKind::InvalidAddress)),
        }
    }

    /// Construct a transport over an already connected stream.
    pub(crate) fn from_std(stream: StdUnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;

        Ok(Self {
            fd: AsyncFd::new(stream)?,
            unix_fd: false,
            guid: String::new(),
        })
    }

    /// The GUID announced by the bus during authentication.
    pub(crate) fn guid(&self) -> &str {
        &self.guid
    }

    /// Whether the bus agreed to pass file descriptors.
    pub(crate) fn supports_unix_fd(&self) -> bool {
        self.unix_fd
    }

    /// Shut the socket down, waking any task blocked on it.
    pub(crate) fn shutdown(&self) {
        _ = self.fd.get_ref().shutdown(std::net::Shutdown::Both);
    }

    /// Perform the authentication handshake.
    ///
    /// Sends the initial NUL and `AUTH EXTERNAL` with our uid, negotiates
    /// file descriptor passing on a best effort basis, then switches the
    /// stream to binary framing with `BEGIN`.
    pub(crate) async fn handshake(&mut self, state: &mut RecvState) -> Result<()> {
        let identity = sasl::external_identity();

        let mut out = vec![0u8];
        SaslRequest::AuthExternal(&identity).write_line(&mut out);
        self.send(&out, &[]).await?;

        let line = self.recv_line(state).await?;

        match sasl::parse_response(&line)? {
            SaslResponse::Ok(guid) => {
                self.guid = guid.to_owned();
            }
            SaslResponse::Rejected => {
                return Err(Error::new(ErrorKind::SaslRejected));
            }
            response => {
                tracing::debug!(?response, "unexpected response to AUTH");
                return Err(Error::new(ErrorKind::InvalidSasl));
            }
        }

        let mut out = Vec::new();
        SaslRequest::NegotiateUnixFd.write_line(&mut out);
        self.send(&out, &[]).await?;

        let line = self.recv_line(state).await?;

        match sasl::parse_response(&line)? {
            SaslResponse::AgreeUnixFd => {
                self.unix_fd = true;
            }
            response => {
                // Best effort: the bus declining fd passing is not fatal.
                tracing::debug!(?response, "bus declined NEGOTIATE_UNIX_FD");
            }
        }

        let mut out = Vec::new();
        SaslRequest::Begin.write_line(&mut out);
        self.send(&out, &[]).await?;

        tracing::trace!(guid = %self.guid, unix_fd = self.unix_fd, "handshake complete");
        Ok(())
    }

    /// Send a complete buffer, attaching `fds` to the first chunk written.
    pub(crate) async fn send(&self, bytes: &[u8], fds: &[OwnedFd]) -> Result<()> {
        if !fds.is_empty() && !self.unix_fd {
            return Err(Error::new(ErrorKind::FdPassingUnsupported));
        }

        let mut offset = 0;
        let mut fds_attached = false;

        while offset < bytes.len() {
            let mut guard = self.fd.writable().await?;

            let attach = if fds_attached { &[] } else { fds };

            match send_chunk(self.fd.get_ref(), &bytes[offset..], attach) {
                Ok(n) => {
                    offset += n;
                    fds_attached = true;
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }

    /// Receive a single line of the authentication protocol.
    pub(crate) async fn recv_line(&self, state: &mut RecvState) -> Result<Vec<u8>> {
        loop {
            if let Some(n) = state.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = state.buf.drain(..=n).collect();
                tracing::trace!(line = %LossyStr(&line), "received line");
                return Ok(line);
            }

            self.recv_some(state).await?;
        }
    }

    /// Receive one complete message frame together with the descriptors its
    /// header claims.
    pub(crate) async fn recv_message(&self, state: &mut RecvState) -> Result<Message> {
        self.fill(state, FIXED_HEADER_LENGTH).await?;

        let endianness = Endianness::new(state.buf[0]);

        if !endianness.is_valid() {
            return Err(Error::new(ErrorKind::InvalidEndianness(state.buf[0])));
        }

        let body_length = load_u32(&state.buf[4..8], endianness);
        let fields_length = load_u32(&state.buf[12..16], endianness);

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }

        if fields_length > MAX_ARRAY_LENGTH {
            return Err(Error::new(ErrorKind::ArrayTooLong(fields_length)));
        }

        let headers = FIXED_HEADER_LENGTH + fields_length as usize;
        let total = headers + padding_to(8, headers) + body_length as usize;

        self.fill(state, total).await?;

        let RecvState { buf, pending_fds } = state;
        let message = Message::decode(&buf[..total], pending_fds)?;
        buf.drain(..total);

        Ok(message)
    }

    /// Fill the receive buffer up to `n` bytes.
    async fn fill(&self, state: &mut RecvState, n: usize) -> Result<()> {
        while state.buf.len() < n {
            self.recv_some(state).await?;
        }

        Ok(())
    }

    async fn recv_some(&self, state: &mut RecvState) -> Result<()> {
        loop {
            let mut guard = self.fd.readable().await?;

            match recv_chunk(self.fd.get_ref(), &mut state.buf, &mut state.pending_fds) {
                Ok(0) => {
                    return Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)));
                }
                Ok(_) => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

impl AsRawFd for Transport {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

/// One `recvmsg` call: bytes append to `buf`, `SCM_RIGHTS` descriptors
/// queue onto `fds` in arrival order.
fn recv_chunk(
    stream: &StdUnixStream,
    buf: &mut Vec<u8>,
    fds: &mut VecDeque<OwnedFd>,
) -> io::Result<usize> {
    let mut data = [0u8; RECV_CHUNK];
    let mut control = [0u8; CONTROL_CAPACITY];

    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: data.len(),
    };

    // SAFETY: A zeroed msghdr is a valid starting point.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = control.len() as _;

    // SAFETY: The msghdr points at live, correctly sized buffers.
    let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: Walking control messages within the lengths recvmsg reported.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);

        while !cmsg.is_null() {
            let header = &*cmsg;

            if header.cmsg_level == libc::SOL_SOCKET && header.cmsg_type == libc::SCM_RIGHTS {
                let payload = header.cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = payload / size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();

                for i in 0..count {
                    fds.push_back(OwnedFd::from_raw_fd(data.add(i).read_unaligned()));
                }
            }

            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    buf.extend_from_slice(&data[..n as usize]);
    Ok(n as usize)
}

/// One `sendmsg` call, attaching `fds` as `SCM_RIGHTS` when non-empty.
fn send_chunk(stream: &StdUnixStream, bytes: &[u8], fds: &[OwnedFd]) -> io::Result<usize> {
    let mut control = [0u8; CONTROL_CAPACITY];

    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut _,
        iov_len: bytes.len(),
    };

    // SAFETY: A zeroed msghdr is a valid starting point.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        let payload = fds.len() * size_of::<RawFd>();

        // SAFETY: CMSG_SPACE is a pure size computation.
        let space = unsafe { libc::CMSG_SPACE(payload as u32) } as usize;

        if space > control.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "too many file descriptors in one message",
            ));
        }

        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;

        // SAFETY: The control buffer was sized and registered above.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload as u32) as _;

            let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();

            for (i, fd) in fds.iter().enumerate() {
                data.add(i).write_unaligned(fd.as_raw_fd());
            }
        }
    }

    // SAFETY: The msghdr points at live, correctly sized buffers.
    let n = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(n as usize)
}

fn load_u32(bytes: &[u8], endianness: Endianness) -> u32 {
    let bytes: [u8; 4] = bytes.try_into().unwrap();

    match endianness {
        Endianness::BIG => u32::from_be_bytes(bytes),
        _ => u32::from_le_bytes(bytes),
    }
}

/// Parse a semicolon-separated address list, keeping the `unix:path=`
/// entries.
fn parse_address_list(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let mut paths = Vec::new();

    for entry in bytes.split(|&b| b == b';') {
        let Some(params) = entry.strip_prefix(b"unix:") else {
            continue;
        };

        for param in params.split(|&b| b == b',') {
            if let Some((b"path", path)) = crate::utils::split_once(param, b'=') {
                paths.push(path);
            }
        }
    }

    if paths.is_empty() {
        return Err(Error::new(ErrorKind::InvalidAddress));
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::parse_address_list;

    #[test]
    fn address_parsing() {
        assert_eq!(
            parse_address_list(b"unix:path=/run/user/1000/bus").unwrap(),
            vec![&b"/run/user/1000/bus"[..]]
        );

        assert_eq!(
            parse_address_list(b"tcp:host=x,port=1;unix:path=/a;unix:path=/b,guid=0").unwrap(),
            vec![&b"/a"[..], &b"/b"[..]]
        );

        assert!(parse_address_list(b"tcp:host=x,port=1").is_err());
        assert!(parse_address_list(b"").is_err());
    }
}
