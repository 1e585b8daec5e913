//! Types for working with D-Bus object paths.

pub use self::object_path::ObjectPath;
mod object_path;

pub use self::object_path_buf::ObjectPathBuf;
mod object_path_buf;

pub use self::object_path_error::ObjectPathError;
mod object_path_error;

pub(crate) use self::validation::validate;
mod validation;
