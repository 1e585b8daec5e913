//! An asynchronous D-Bus client for Tokio.
//!
//! A [`Connection`] multiplexes concurrent method calls, signal
//! subscriptions and name claims over one Unix socket, with out-of-band
//! file descriptor passing. Bodies are encoded and decoded statically
//! through the traits in [`body`]; dynamically typed elements travel as
//! [`Value`] and [`Variant`].
//!
//! # Examples
//!
//! ```no_run
//! use unibus::{Connection, MatchRule};
//!
//! # #[tokio::main] async fn main() -> unibus::Result<()> {
//! let c = Connection::session_bus().await?;
//!
//! let mut names = c.watcher();
//! let _guard = names
//!     .add_match(
//!         MatchRule::signal()
//!             .with_interface("org.freedesktop.DBus")
//!             .with_member("NameOwnerChanged"),
//!     )
//!     .await?;
//!
//! while let Some(notification) = names.next().await {
//!     println!("{:?}", notification.body);
//! }
//! # Ok(()) }
//! ```

#[doc(inline)]
pub use self::connection::Connection;
mod connection;

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::proto::{Endianness, Flags};
mod proto;

#[doc(inline)]
pub use self::signature::{Signature, SignatureBuf, SignatureError};
pub mod signature;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathBuf, ObjectPathError};
pub mod object_path;

#[doc(inline)]
pub use self::buf::{BodyBuf, ReadBuf};
mod buf;

#[doc(inline)]
pub use self::body::{Arg, Args, BasicArg, Fd, Load, LoadArgs, Store, StoreArgs};
pub mod body;

#[doc(inline)]
pub use self::value::{Value, Variant};
mod value;

#[doc(inline)]
pub use self::message::{Message, MessageKind};
mod message;

#[doc(inline)]
pub use self::filter::MatchRule;
mod filter;

#[doc(inline)]
pub use self::watch::{MatchGuard, Notification, Watcher};
mod watch;

#[doc(inline)]
pub use self::claim::{Claim, ClaimOptions, ReleaseNameReply, RequestNameReply};
mod claim;

mod lossy_str;
mod sasl;
mod transport;
mod utils;
