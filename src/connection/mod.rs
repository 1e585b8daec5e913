//! The connection runtime: serial allocation, the pending-call table, the
//! reader task and inbound dispatch.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::num::NonZeroU32;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::body::{self, LoadArgs, StoreArgs};
use crate::buf::ReadBuf;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{Message, MessageKind};
use crate::object_path::ObjectPath;
use crate::proto::{Endianness, Flags};
use crate::signature::SignatureBuf;
use crate::transport::{RecvState, Transport};
use crate::value::Value;
use crate::watch::{Notification, Watcher, WatcherShared, DEFAULT_CAPACITY};

pub(crate) mod dbus;

/// A handle to a bus connection.
///
/// The handle is cheap to clone; all clones share one socket, serial
/// counter and reader task. Any number of calls may be in flight
/// concurrently, matched to their replies by serial.
///
/// # Examples
///
/// ```no_run
/// use unibus::Connection;
///
/// # #[tokio::main] async fn main() -> unibus::Result<()> {
/// let c = Connection::session_bus().await?;
/// println!("connected as {}", c.unique_name());
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<Transport>,
    /// Serializes socket writes so concurrent calls interleave at message
    /// granularity.
    write_gate: tokio::sync::Mutex<()>,
    unique_name: OnceLock<String>,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

struct State {
    last_serial: u32,
    pending: HashMap<u32, PendingCall>,
    watchers: Vec<(u64, Weak<WatcherShared>)>,
    next_watcher: u64,
    call_hook: Option<Arc<dyn Fn(&Message) + Send + Sync>>,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

struct PendingCall {
    tx: oneshot::Sender<Result<Reply>>,
}

/// An undecoded reply body, handed from the reader task to the caller that
/// owns the result type.
struct Reply {
    signature: SignatureBuf,
    endianness: Endianness,
    body: Vec<u8>,
    fds: Vec<OwnedFd>,
}

/// Removes the pending entry if the caller stops waiting, so that a late
/// reply finds no slot and is dropped.
struct PendingGuard<'a> {
    connection: &'a Connection,
    serial: u32,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.connection.inner.state.lock().unwrap();
            state.pending.remove(&self.serial);
        }
    }
}

impl Connection {
    /// Connect to the session bus.
    ///
    /// The address is taken from the `DBUS_STARTER_ADDRESS` or
    /// `DBUS_SESSION_BUS_ADDRESS` environment variables.
    pub async fn session_bus() -> Result<Self> {
        Self::from_transport(Transport::session_bus().await?).await
    }

    /// Connect to the system bus.
    pub async fn system_bus() -> Result<Self> {
        Self::from_transport(Transport::system_bus().await?).await
    }

    /// Connect to an explicit bus address such as
    /// `unix:path=/run/user/1000/bus`.
    pub async fn open<A>(address: A) -> Result<Self>
    where
        A: AsRef<OsStr>,
    {
        Self::from_transport(Transport::open(address.as_ref()).await?).await
    }

    /// Establish a connection over an already connected stream.
    ///
    /// Performs the authentication handshake and registers with the bus.
    pub async fn from_std(stream: StdUnixStream) -> Result<Self> {
        Self::from_transport(Transport::from_std(stream)?).await
    }

    async fn from_transport(mut transport: Transport) -> Result<Self> {
        let mut recv = RecvState::new();
        transport.handshake(&mut recv).await?;

        let transport = Arc::new(transport);

        let inner = Arc::new(Inner {
            transport: transport.clone(),
            write_gate: tokio::sync::Mutex::new(()),
            unique_name: OnceLock::new(),
            state: Mutex::new(State {
                last_serial: 0,
                pending: HashMap::new(),
                watchers: Vec::new(),
                next_watcher: 0,
                call_hook: None,
                reader: None,
                closed: false,
            }),
        });

        let reader = tokio::spawn(read_loop(transport, Arc::downgrade(&inner), recv));
        inner.state.lock().unwrap().reader = Some(reader);

        let connection = Connection { inner };

        let (name,): (String,) = connection
            .call(dbus::BUS_NAME, dbus::BUS_PATH, dbus::BUS_INTERFACE, "Hello", ())
            .await?;

        tracing::debug!(unique_name = %name, "registered with bus");
        _ = connection.inner.unique_name.set(name);

        Ok(connection)
    }

    /// The unique name the bus assigned to this connection.
    pub fn unique_name(&self) -> &str {
        self.inner.unique_name.get().map(String::as_str).unwrap_or("")
    }

    /// The GUID the bus announced during authentication.
    pub fn server_guid(&self) -> &str {
        self.inner.transport.guid()
    }

    /// Whether the bus agreed to pass file descriptors on this connection.
    pub fn supports_unix_fd(&self) -> bool {
        self.inner.transport.supports_unix_fd()
    }

    /// Test if the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().closed
    }

    /// Close the connection.
    ///
    /// Every in-flight call fails with a closed-connection error and every
    /// watcher is closed after flushing its queue. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        close_inner(&self.inner, None);
    }

    /// Install a hook observing inbound method calls.
    ///
    /// The connection does not serve methods; calls addressed to it are
    /// consumed to preserve framing and passed here. Without a hook they
    /// are logged and dropped, producing no reply.
    pub fn on_method_call<F>(&self, hook: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.state.lock().unwrap().call_hook = Some(Arc::new(hook));
    }

    /// Invoke `member` on the peer owning `destination`, awaiting its
    /// reply.
    ///
    /// `args` and the result are argument-list tuples; a single argument is
    /// written `(value,)`. The future may be dropped to abandon the call,
    /// in which case a reply arriving later is discarded.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use unibus::{Connection, ObjectPath};
    ///
    /// # #[tokio::main] async fn main() -> unibus::Result<()> {
    /// let c = Connection::session_bus().await?;
    ///
    /// let (id,): (String,) = c
    ///     .call(
    ///         "org.freedesktop.DBus",
    ///         ObjectPath::new("/org/freedesktop/DBus")?,
    ///         "org.freedesktop.DBus",
    ///         "GetId",
    ///         (),
    ///     )
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub async fn call<A, R>(
        &self,
        destination: &str,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: A,
    ) -> Result<R>
    where
        A: StoreArgs,
        R: for<'de> LoadArgs<'de>,
    {
        self.call_with_flags(destination, path, interface, member, args, Flags::EMPTY)
            .await
    }

    /// Like [`call()`], with explicit message flags.
    ///
    /// With [`Flags::NO_REPLY_EXPECTED`] no pending call is registered and
    /// the result must be the empty tuple.
    ///
    /// [`call()`]: Self::call
    pub async fn call_with_flags<A, R>(
        &self,
        destination: &str,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: A,
        flags: Flags,
    ) -> Result<R>
    where
        A: StoreArgs,
        R: for<'de> LoadArgs<'de>,
    {
        let message = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(destination)
            .with_flags(flags)
            .with_args(&args)?;

        if flags & Flags::NO_REPLY_EXPECTED {
            self.send(message).await?;
            let mut empty = ReadBuf::new(&[], Endianness::NATIVE);
            return R::load_args(&mut empty);
        }

        let (serial, rx) = {
            let mut state = self.inner.state.lock().unwrap();

            if state.closed {
                return Err(Error::new(ErrorKind::Closed));
            }

            let serial = next_serial(&mut state);
            let (tx, rx) = oneshot::channel();
            state.pending.insert(serial.get(), PendingCall { tx });
            (serial, rx)
        };

        let mut guard = PendingGuard {
            connection: self,
            serial: serial.get(),
            armed: true,
        };

        let message = message.with_serial(serial).without_sender();
        self.write_message(&message).await?;

        let reply = match rx.await {
            Ok(result) => result?,
            Err(_) => return Err(Error::new(ErrorKind::Closed)),
        };

        guard.armed = false;

        let expected = body::args_signature_of::<R>()?;

        if *reply.signature.as_signature() != *expected.as_signature() {
            return Err(Error::new(ErrorKind::TypeMismatch {
                expected,
                actual: reply.signature,
            }));
        }

        let mut buf = ReadBuf::new(&reply.body, reply.endianness).with_fds(&reply.fds);
        R::load_args(&mut buf)
    }

    /// Invoke `member` without registering interest in a reply.
    pub async fn call_noreply<A>(
        &self,
        destination: &str,
        path: &ObjectPath,
        interface: &str,
        member: &str,
        args: A,
    ) -> Result<()>
    where
        A: StoreArgs,
    {
        let message = Message::method_call(path, member)
            .with_interface(interface)
            .with_destination(destination)
            .with_flags(Flags::EMPTY | Flags::NO_REPLY_EXPECTED)
            .with_args(&args)?;

        self.send(message).await?;
        Ok(())
    }

    /// Send a message without awaiting any reply, returning the serial it
    /// was assigned.
    ///
    /// The sender field, if set, is stripped: on a bus that field belongs
    /// to the bus.
    pub async fn send(&self, message: Message) -> Result<NonZeroU32> {
        let serial = {
            let mut state = self.inner.state.lock().unwrap();

            if state.closed {
                return Err(Error::new(ErrorKind::Closed));
            }

            next_serial(&mut state)
        };

        let message = message.with_serial(serial).without_sender();
        self.write_message(&message).await?;
        Ok(serial)
    }

    async fn write_message(&self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;

        let gate = self.inner.write_gate.lock().await;
        let result = self.inner.transport.send(&bytes, message.fds()).await;
        drop(gate);

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                // A write failure is transport-fatal.
                close_inner(&self.inner, Some(&error));
                Err(error)
            }
        }
    }

    /// Create a watcher with the default queue capacity.
    pub fn watcher(&self) -> Watcher {
        self.watcher_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a watcher whose queue holds up to `capacity` notifications.
    pub fn watcher_with_capacity(&self, capacity: usize) -> Watcher {
        let shared = Arc::new(WatcherShared::new(capacity.max(1)));

        let id = {
            let mut state = self.inner.state.lock().unwrap();
            let id = state.next_watcher;
            state.next_watcher += 1;

            if state.closed {
                shared.close();
            } else {
                state.watchers.push((id, Arc::downgrade(&shared)));
            }

            id
        };

        Watcher::new(self.clone(), shared, id)
    }

    pub(crate) fn unregister_watcher(&self, id: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.watchers.retain(|(n, _)| *n != id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("unique_name", &self.unique_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn next_serial(state: &mut State) -> NonZeroU32 {
    state.last_serial = state.last_serial.wrapping_add(1);

    if state.last_serial == 0 {
        state.last_serial = 1;
    }

    // SAFETY: Zero was just excluded.
    NonZeroU32::new(state.last_serial).unwrap_or(NonZeroU32::MIN)
}

async fn read_loop(transport: Arc<Transport>, inner: Weak<Inner>, mut recv: RecvState) {
    let error = loop {
        let message = match transport.recv_message(&mut recv).await {
            Ok(message) => message,
            Err(error) => break error,
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };

        if let Err(error) = dispatch(&inner, message) {
            break error;
        }
    };

    let Some(inner) = inner.upgrade() else {
        return;
    };

    close_inner(&inner, Some(&error));
}

fn dispatch(inner: &Arc<Inner>, mut message: Message) -> Result<()> {
    match message.kind() {
        MessageKind::MethodReturn | MessageKind::Error => {
            let Some(serial) = message.reply_serial() else {
                return Ok(());
            };

            let call = inner.state.lock().unwrap().pending.remove(&serial.get());

            let Some(call) = call else {
                tracing::trace!(serial = serial.get(), "dropping reply with no pending call");
                return Ok(());
            };

            let result = match message.kind() {
                MessageKind::Error => Err(error_reply(&message)),
                _ => {
                    let fds = message.take_fds();

                    Ok(Reply {
                        signature: message.signature().to_owned(),
                        endianness: message.endianness(),
                        body: message.body_bytes().to_vec(),
                        fds,
                    })
                }
            };

            _ = call.tx.send(result);
        }
        MessageKind::Signal => {
            // A body this connection cannot decode is a protocol violation
            // and terminates the reader.
            let body = Value::load_many(message.signature(), &mut message.body())?;

            let watchers: Vec<Arc<WatcherShared>> = {
                let state = inner.state.lock().unwrap();
                state
                    .watchers
                    .iter()
                    .filter_map(|(_, watcher)| watcher.upgrade())
                    .collect()
            };

            for watcher in watchers {
                if !watcher.accepts(&message, &body) {
                    continue;
                }

                watcher.enqueue(Notification {
                    sender: message.sender().map(str::to_owned),
                    path: message.path().map(ToOwned::to_owned),
                    interface: message.interface().map(str::to_owned),
                    member: message.member().map(str::to_owned),
                    body: body.clone(),
                    overflow: false,
                });
            }
        }
        MessageKind::MethodCall => {
            let hook = inner.state.lock().unwrap().call_hook.clone();

            match hook {
                Some(hook) => hook(&message),
                None => {
                    tracing::debug!(
                        member = ?message.member(),
                        "ignoring inbound method call"
                    );
                }
            }
        }
    }

    Ok(())
}

fn error_reply(message: &Message) -> Error {
    let name = message.error_name().unwrap_or_default().to_owned();

    // An optional leading string in the body is the human readable detail.
    let detail = if message.signature().as_bytes().first() == Some(&b's') {
        let mut body = message.body();
        body.read_str().ok().map(str::to_owned)
    } else {
        None
    };

    Error::new(ErrorKind::Call { name, detail })
}

fn close_inner(inner: &Inner, error: Option<&Error>) {
    let (pending, watchers, reader) = {
        let mut state = inner.state.lock().unwrap();

        if state.closed {
            return;
        }

        state.closed = true;

        (
            std::mem::take(&mut state.pending),
            std::mem::take(&mut state.watchers),
            state.reader.take(),
        )
    };

    if let Some(error) = error {
        tracing::debug!(%error, "closing connection");
    }

    for (_, call) in pending {
        _ = call.tx.send(Err(Error::new(ErrorKind::Closed)));
    }

    for (_, watcher) in watchers {
        if let Some(watcher) = watcher.upgrade() {
            watcher.close();
        }
    }

    inner.transport.shutdown();

    // When invoked from the reader itself this is a no-op: the task has no
    // remaining suspension points.
    if let Some(reader) = reader {
        reader.abort();
    }
}
