//! Typed wrappers for the message bus service at
//! `org.freedesktop.DBus / /org/freedesktop/DBus`.

use std::collections::BTreeMap;

use crate::error::{Error, ErrorKind, Result};
use crate::filter::PROPERTIES_INTERFACE;
use crate::object_path::ObjectPath;
use crate::value::{Value, Variant};

use super::Connection;

/// The well-known name of the message bus itself.
pub(crate) const BUS_NAME: &str = "org.freedesktop.DBus";

/// The interface of the message bus.
pub(crate) const BUS_INTERFACE: &str = "org.freedesktop.DBus";

/// The object path of the message bus.
pub(crate) const BUS_PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");

const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

impl Connection {
    /// Subscribe to messages matching `rule` on the bus.
    pub async fn add_match(&self, rule: &str) -> Result<()> {
        self.call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "AddMatch", (rule,))
            .await
    }

    /// Remove a subscription previously added with [`add_match()`].
    ///
    /// [`add_match()`]: Self::add_match
    pub async fn remove_match(&self, rule: &str) -> Result<()> {
        self.call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "RemoveMatch", (rule,))
            .await
    }

    /// List the names currently owned on the bus.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        let (names,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "ListNames", ())
            .await?;
        Ok(names)
    }

    /// List the names which can be activated on demand.
    pub async fn list_activatable_names(&self) -> Result<Vec<String>> {
        let (names,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "ListActivatableNames", ())
            .await?;
        Ok(names)
    }

    /// The persistent identity of the bus instance.
    pub async fn get_id(&self) -> Result<String> {
        let (id,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "GetId", ())
            .await?;
        Ok(id)
    }

    /// Test whether `name` currently has an owner.
    pub async fn name_has_owner(&self, name: &str) -> Result<bool> {
        let (owned,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "NameHasOwner", (name,))
            .await?;
        Ok(owned)
    }

    /// The unique name of the current owner of `name`.
    pub async fn get_name_owner(&self, name: &str) -> Result<String> {
        let (owner,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "GetNameOwner", (name,))
            .await?;
        Ok(owner)
    }

    /// The owner queue of `name`, primary owner first.
    pub async fn list_queued_owners(&self, name: &str) -> Result<Vec<String>> {
        let (owners,) = self
            .call(BUS_NAME, BUS_PATH, BUS_INTERFACE, "ListQueuedOwners", (name,))
            .await?;
        Ok(owners)
    }

    /// The credentials of the connection owning `name`.
    pub async fn get_connection_credentials(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, Variant>> {
        let (credentials,) = self
            .call(
                BUS_NAME,
                BUS_PATH,
                BUS_INTERFACE,
                "GetConnectionCredentials",
                (name,),
            )
            .await?;
        Ok(credentials)
    }

    /// The feature flags of the bus, read from its `Features` property.
    pub async fn features(&self) -> Result<Vec<String>> {
        let (variant,): (Variant,) = self
            .call(
                BUS_NAME,
                BUS_PATH,
                PROPERTIES_INTERFACE,
                "Get",
                (BUS_INTERFACE, "Features"),
            )
            .await?;

        let actual = variant.signature().to_owned();

        match variant.into_value() {
            Value::Array(_, values) => {
                let mut features = Vec::with_capacity(values.len());

                for value in values {
                    match value {
                        Value::String(feature) => features.push(feature),
                        _ => {
                            return Err(type_mismatch(actual));
                        }
                    }
                }

                Ok(features)
            }
            _ => Err(type_mismatch(actual)),
        }
    }

    /// Ping a peer through `org.freedesktop.DBus.Peer`.
    pub async fn ping(&self, destination: &str, path: &ObjectPath) -> Result<()> {
        self.call(destination, path, PEER_INTERFACE, "Ping", ())
            .await
    }
}

fn type_mismatch(actual: crate::SignatureBuf) -> Error {
    Error::new(ErrorKind::TypeMismatch {
        expected: crate::Signature::new_const(b"as").to_owned(),
        actual,
    })
}
