//! Well-known name ownership: requesting names, tracking primary
//! ownership through bus signals, and releasing on close.

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::dbus::{BUS_INTERFACE, BUS_NAME, BUS_PATH};
use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};
use crate::filter::MatchRule;
use crate::watch::Watcher;

/// Options of a name request, mapping to the wire flags of `RequestName`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Permit another peer to take the name away from us later.
    pub allow_replacement: bool,
    /// Attempt to take the name from its current owner, which only
    /// succeeds if the owner allows replacement.
    pub try_replace: bool,
    /// Fail instead of waiting in the ownership queue when the name is
    /// taken.
    pub no_queue: bool,
}

impl ClaimOptions {
    /// Options with every flag unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether other peers may replace us.
    pub fn allow_replacement(mut self, allow: bool) -> Self {
        self.allow_replacement = allow;
        self
    }

    /// Set whether to attempt replacing the current owner.
    pub fn try_replace(mut self, replace: bool) -> Self {
        self.try_replace = replace;
        self
    }

    /// Set whether to refuse queueing.
    pub fn no_queue(mut self, no_queue: bool) -> Self {
        self.no_queue = no_queue;
        self
    }

    pub(crate) fn flags(&self) -> u32 {
        u32::from(self.allow_replacement)
            | u32::from(self.try_replace) << 1
            | u32::from(self.no_queue) << 2
    }
}

/// The outcome of a `RequestName` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RequestNameReply {
    /// We became the primary owner.
    PrimaryOwner,
    /// The name is taken; we wait in its ownership queue.
    InQueue,
    /// The name is taken and queueing was refused.
    Exists,
    /// We already were the primary owner.
    AlreadyOwner,
}

impl RequestNameReply {
    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::PrimaryOwner),
            2 => Ok(Self::InQueue),
            3 => Ok(Self::Exists),
            4 => Ok(Self::AlreadyOwner),
            other => Err(Error::new(ErrorKind::UnexpectedReply(other))),
        }
    }

    /// Whether the reply means we hold the name.
    pub fn is_owner(&self) -> bool {
        matches!(self, Self::PrimaryOwner | Self::AlreadyOwner)
    }
}

/// The outcome of a `ReleaseName` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReleaseNameReply {
    /// The name was released.
    Released,
    /// No peer owned the name.
    NonExistent,
    /// Another peer owns the name.
    NotOwner,
}

impl ReleaseNameReply {
    fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(Self::Released),
            2 => Ok(Self::NonExistent),
            3 => Ok(Self::NotOwner),
            other => Err(Error::new(ErrorKind::UnexpectedReply(other))),
        }
    }
}

impl Connection {
    /// Ask the bus to bind `name` to this connection.
    pub async fn request_name(
        &self,
        name: &str,
        options: ClaimOptions,
    ) -> Result<RequestNameReply> {
        let (code,) = self
            .call(
                BUS_NAME,
                BUS_PATH,
                BUS_INTERFACE,
                "RequestName",
                (name, options.flags()),
            )
            .await?;

        RequestNameReply::from_code(code)
    }

    /// Give up ownership of `name`, or our position in its queue.
    pub async fn release_name(&self, name: &str) -> Result<ReleaseNameReply> {
        let (code,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "ReleaseName", (name,))
            .await?;

        ReleaseNameReply::from_code(code)
    }

    /// Claim `name`, tracking ownership until the claim is closed.
    ///
    /// The claim subscribes to the `NameAcquired` and `NameLost` signals
    /// for the name before requesting it, so no transition is missed. A
    /// request refused with [`RequestNameReply::Exists`] fails the claim.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use unibus::{ClaimOptions, Connection};
    ///
    /// # #[tokio::main] async fn main() -> unibus::Result<()> {
    /// let c = Connection::session_bus().await?;
    ///
    /// let mut claim = c.claim("org.example.Service", ClaimOptions::new()).await?;
    /// assert_eq!(claim.recv().await, Some(true));
    /// # Ok(()) }
    /// ```
    pub async fn claim(&self, name: &str, options: ClaimOptions) -> Result<Claim> {
        let mut watcher = self.watcher();

        let base = MatchRule::signal()
            .with_sender(BUS_NAME)
            .with_interface(BUS_INTERFACE)
            .with_arg(0, name);

        watcher
            .add_match(base.clone().with_member("NameAcquired"))
            .await?;
        watcher.add_match(base.with_member("NameLost")).await?;

        let reply = match self.request_name(name, options).await {
            Ok(reply) => reply,
            Err(error) => {
                watcher.close().await;
                return Err(error);
            }
        };

        if reply == RequestNameReply::Exists {
            watcher.close().await;
            return Err(Error::new(ErrorKind::NameRejected(name.to_owned())));
        }

        // Start from an unseen state so that the first receive yields the
        // initial ownership.
        let (tx, rx) = watch::channel(false);
        _ = tx.send(reply.is_owner());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let pump = tokio::spawn(pump(watcher, tx, shutdown_rx));

        Ok(Claim {
            connection: self.clone(),
            name: name.to_owned(),
            rx,
            shutdown: Some(shutdown_tx),
            pump: Some(pump),
            closed: false,
        })
    }
}

/// Mirror the private watcher's acquired/lost notifications onto the
/// claim's channel, which always carries the latest known state.
async fn pump(
    mut watcher: Watcher,
    tx: watch::Sender<bool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                watcher.close().await;
                _ = tx.send(false);
                return;
            }
            notification = watcher.next() => {
                let Some(notification) = notification else {
                    // The watcher closed underneath us, which means the
                    // connection is gone and so is any ownership.
                    _ = tx.send(false);
                    return;
                };

                let owner = match notification.member.as_deref() {
                    Some("NameAcquired") => true,
                    Some("NameLost") => false,
                    _ => continue,
                };

                _ = tx.send(owner);
            }
        }
    }
}

/// An active claim on a well-known name.
///
/// The claim's channel carries "are we the primary owner" updates,
/// coalesced so that a slow consumer always observes the most recent
/// state.
#[derive(Debug)]
pub struct Claim {
    connection: Connection,
    name: String,
    rx: watch::Receiver<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
}

impl Claim {
    /// The claimed name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The most recently observed ownership state.
    pub fn is_owner(&self) -> bool {
        *self.rx.borrow()
    }

    /// Receive the next ownership state.
    ///
    /// Intermediate states overwritten before this is called are skipped.
    /// Returns `None` once the claim is closed and its final state has
    /// been observed.
    pub async fn recv(&mut self) -> Option<bool> {
        match self.rx.changed().await {
            Ok(()) => Some(*self.rx.borrow_and_update()),
            Err(_) => None,
        }
    }

    /// A second channel observing ownership updates.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Reissue the name request with new options.
    ///
    /// This is how `allow_replacement` is changed without giving the name
    /// up in between.
    pub async fn request(&self, options: ClaimOptions) -> Result<RequestNameReply> {
        self.connection.request_name(&self.name, options).await
    }

    /// Close the claim: stop watching, emit a final lost state and release
    /// the name. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;

        if let Some(shutdown) = self.shutdown.take() {
            _ = shutdown.send(());
        }

        // The pump emits the final lost state before it exits.
        if let Some(pump) = self.pump.take() {
            _ = pump.await;
        }

        let released = self.connection.release_name(&self.name).await;

        match released {
            Ok(_) => Ok(()),
            Err(error) if error.is_closed() => Ok(()),
            Err(error) => Err(error),
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        // The pump shuts itself down in the background, unsubscribing its
        // watcher as it goes.
        if let Some(shutdown) = self.shutdown.take() {
            _ = shutdown.send(());
        }
    }
}
