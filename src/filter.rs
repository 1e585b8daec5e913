//! Signal match rules: the canonical string form understood by the bus and
//! the equivalent local predicate.
//!
//! A single connection receives the union of the signals all of its
//! watchers subscribed to, so every rule is also evaluated locally to route
//! each signal to only the watchers whose filters accept it.

use crate::message::Message;
use crate::object_path::{ObjectPath, ObjectPathBuf};
use crate::value::Value;

/// The interface carrying property-change notifications.
pub(crate) const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const PROPERTIES_CHANGED: &str = "PropertiesChanged";

/// A conjunction of predicates over a signal's header and body.
///
/// # Examples
///
/// ```
/// use unibus::MatchRule;
///
/// let rule = MatchRule::signal()
///     .with_interface("org.freedesktop.DBus")
///     .with_member("NameOwnerChanged");
///
/// assert_eq!(
///     rule.render(),
///     "type='signal',interface='org.freedesktop.DBus',member='NameOwnerChanged'"
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchRule {
    sender: Option<String>,
    path: Option<ObjectPathBuf>,
    path_namespace: Option<ObjectPathBuf>,
    interface: Option<String>,
    member: Option<String>,
    args: Vec<(u8, String)>,
    arg_paths: Vec<(u8, String)>,
    arg0_namespace: Option<String>,
}

impl MatchRule {
    /// A rule matching every signal.
    pub fn signal() -> Self {
        Self::default()
    }

    /// A rule matching property-change notifications for `interface`.
    ///
    /// This subscribes to `PropertiesChanged` and narrows on the first body
    /// argument, which names the interface whose properties changed.
    pub fn property(interface: &str) -> Self {
        Self::signal()
            .with_interface(PROPERTIES_INTERFACE)
            .with_member(PROPERTIES_CHANGED)
            .with_arg(0, interface)
    }

    /// Require an exact sender.
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = Some(sender.to_owned());
        self
    }

    /// Require an exact object path.
    pub fn with_path(mut self, path: &ObjectPath) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    /// Require the object path to equal `prefix` or to be located below it.
    pub fn with_path_namespace(mut self, prefix: &ObjectPath) -> Self {
        self.path_namespace = Some(prefix.to_owned());
        self
    }

    /// Require an exact interface.
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_owned());
        self
    }

    /// Require an exact member.
    pub fn with_member(mut self, member: &str) -> Self {
        self.member = Some(member.to_owned());
        self
    }

    /// Require body argument `index` to be a string equal to `value`.
    pub fn with_arg(mut self, index: u8, value: &str) -> Self {
        self.args.push((index, value.to_owned()));
        self
    }

    /// Require body argument `index` to be a string or object path equal to
    /// or prefixed by `value`.
    pub fn with_arg_path(mut self, index: u8, value: &str) -> Self {
        self.arg_paths.push((index, value.to_owned()));
        self
    }

    /// Require the first body argument to equal `namespace` or to start
    /// with `namespace` followed by a dot.
    pub fn with_arg0_namespace(mut self, namespace: &str) -> Self {
        self.arg0_namespace = Some(namespace.to_owned());
        self
    }

    /// Render the canonical rule string sent to the bus with `AddMatch`.
    pub fn render(&self) -> String {
        let mut out = String::from("type='signal'");

        if let Some(sender) = &self.sender {
            push_pair(&mut out, "sender", sender);
        }

        if let Some(path) = &self.path {
            push_pair(&mut out, "path", path.as_str());
        }

        if let Some(prefix) = &self.path_namespace {
            push_pair(&mut out, "path_namespace", prefix.as_str());
        }

        if let Some(interface) = &self.interface {
            push_pair(&mut out, "interface", interface);
        }

        if let Some(member) = &self.member {
            push_pair(&mut out, "member", member);
        }

        for (index, value) in &self.args {
            push_pair(&mut out, &format!("arg{index}"), value);
        }

        for (index, value) in &self.arg_paths {
            push_pair(&mut out, &format!("arg{index}path"), value);
        }

        if let Some(namespace) = &self.arg0_namespace {
            push_pair(&mut out, "arg0namespace", namespace);
        }

        out
    }

    /// Evaluate this rule against a decoded signal.
    ///
    /// Every configured predicate must hold.
    pub fn matches(&self, message: &Message, body: &[Value]) -> bool {
        if let Some(sender) = &self.sender {
            if message.sender() != Some(sender.as_str()) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if message.path() != Some(path.as_object_path()) {
                return false;
            }
        }

        if let Some(prefix) = &self.path_namespace {
            match message.path() {
                Some(path) if path.starts_with(prefix) => {}
                _ => return false,
            }
        }

        if let Some(interface) = &self.interface {
            if message.interface() != Some(interface.as_str()) {
                return false;
            }
        }

        if let Some(member) = &self.member {
            if message.member() != Some(member.as_str()) {
                return false;
            }
        }

        for (index, expected) in &self.args {
            match body.get(usize::from(*index)).and_then(Value::as_str) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }

        for (index, expected) in &self.arg_paths {
            let Some(actual) = body
                .get(usize::from(*index))
                .and_then(Value::as_path_str)
            else {
                return false;
            };

            if actual != expected && !actual.starts_with(expected.as_str()) {
                return false;
            }
        }

        if let Some(namespace) = &self.arg0_namespace {
            let Some(actual) = body.first().and_then(Value::as_str) else {
                return false;
            };

            let in_namespace = actual.len() > namespace.len()
                && actual.starts_with(namespace.as_str())
                && actual.as_bytes()[namespace.len()] == b'.';

            if actual != namespace && !in_namespace {
                return false;
            }
        }

        true
    }
}

fn push_pair(out: &mut String, key: &str, value: &str) {
    out.push(',');
    out.push_str(key);
    out.push_str("='");

    // A literal apostrophe cannot appear inside a quoted section; it is
    // written by closing the quote, escaping the apostrophe and reopening.
    let mut first = true;

    for part in value.split('\'') {
        if !first {
            out.push_str("'\\''");
        }

        out.push_str(part);
        first = false;
    }

    out.push('\'');
}
