use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use super::{validate, ObjectPath, ObjectPathError};

/// An owned D-Bus object path.
#[derive(Clone)]
pub struct ObjectPathBuf {
    data: Vec<u8>,
}

impl ObjectPathBuf {
    /// Construct a new object path with validation.
    #[inline]
    pub fn new<P>(path: &P) -> Result<Self, ObjectPathError>
    where
        P: ?Sized + AsRef<[u8]>,
    {
        let path = path.as_ref();

        if !validate(path) {
            return Err(ObjectPathError);
        }

        Ok(Self {
            data: path.to_vec(),
        })
    }

    /// Construct from a borrowed object path.
    #[inline]
    pub fn from_object_path(path: &ObjectPath) -> Self {
        Self {
            data: path.as_bytes().to_vec(),
        }
    }

    /// Borrow as an [`ObjectPath`].
    #[inline]
    pub fn as_object_path(&self) -> &ObjectPath {
        // SAFETY: The contents are valid by construction.
        unsafe { ObjectPath::new_unchecked(&self.data) }
    }
}

impl Deref for ObjectPathBuf {
    type Target = ObjectPath;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_object_path()
    }
}

impl Borrow<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn borrow(&self) -> &ObjectPath {
        self.as_object_path()
    }
}

impl AsRef<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn as_ref(&self) -> &ObjectPath {
        self.as_object_path()
    }
}

impl From<&ObjectPath> for ObjectPathBuf {
    #[inline]
    fn from(path: &ObjectPath) -> Self {
        Self::from_object_path(path)
    }
}

impl fmt::Debug for ObjectPathBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_object_path().fmt(f)
    }
}

impl fmt::Display for ObjectPathBuf {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for ObjectPathBuf {}

impl PartialEq<ObjectPath> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &ObjectPath) -> bool {
        self.as_object_path() == other
    }
}

impl PartialEq<&ObjectPath> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &&ObjectPath) -> bool {
        self.as_object_path() == *other
    }
}

impl PartialEq<str> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.data == *other.as_bytes()
    }
}

impl PartialEq<&str> for ObjectPathBuf {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.data == *other.as_bytes()
    }
}

impl Hash for ObjectPathBuf {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_object_path().hash(state);
    }
}
