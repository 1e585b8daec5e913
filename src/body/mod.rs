//! The static codec mapping host types to the wire format.
//!
//! A type participates in message bodies by implementing [`Arg`] together
//! with [`Store`] for encoding and [`Load`] for decoding. Implementations
//! for the primitive types, strings, object paths, signatures, file
//! descriptors, arrays, maps and tuples are provided here; structs with an
//! extensible dictionary tail are declared through [`vardict!`].
//!
//! [`vardict!`]: crate::vardict!

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use crate::buf::{BodyBuf, ReadBuf};
use crate::error::Result;
use crate::signature::{SignatureBuf, SignatureBuilder, SignatureError};

pub use self::fd::Fd;
mod fd;

#[doc(hidden)]
pub mod vardict;

#[cfg(test)]
mod tests;

/// A type with a D-Bus wire representation.
pub trait Arg {
    /// The natural alignment of the encoded value.
    const ALIGNMENT: usize;

    /// Append the signature of this type.
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError>;
}

/// A type which can be encoded into a message body.
pub trait Store: Arg {
    /// Encode `self` into `buf`.
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()>;
}

/// A type which can be decoded from a message body.
pub trait Load<'de>: Arg + Sized {
    /// Decode a value from `buf`.
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self>;
}

/// Marker for basic (non-container) types, which alone may key dictionaries.
pub trait BasicArg: Arg {}

/// Render the signature of `T`.
///
/// This fails if the rendered signature would exceed 255 bytes, which makes
/// it the gate that rejects overly deep types before any bytes are written.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
///
/// use unibus::{body, Variant};
///
/// let sig = body::signature_of::<(String, BTreeMap<u8, Variant>)>()?;
/// assert_eq!(sig.as_str(), "(sa{yv})");
/// # Ok::<_, unibus::Error>(())
/// ```
pub fn signature_of<T>() -> Result<SignatureBuf>
where
    T: ?Sized + Arg,
{
    let mut builder = SignatureBuilder::new();
    T::signature(&mut builder)?;
    Ok(builder.finish())
}

impl<T> Arg for &T
where
    T: ?Sized + Arg,
{
    const ALIGNMENT: usize = T::ALIGNMENT;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        T::signature(builder)
    }
}

impl<T> Store for &T
where
    T: ?Sized + Store,
{
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        (**self).store_to(buf)
    }
}

impl<T> BasicArg for &T where T: ?Sized + BasicArg {}

macro_rules! basic {
    ($($ty:ty, $code:literal, $align:literal, $store:ident, $load:ident;)*) => {
        $(
            impl Arg for $ty {
                const ALIGNMENT: usize = $align;

                #[inline]
                fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
                    builder.push($code)
                }
            }

            impl Store for $ty {
                #[inline]
                fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
                    buf.$store(*self);
                    Ok(())
                }
            }

            impl Load<'_> for $ty {
                #[inline]
                fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
                    buf.$load()
                }
            }

            impl BasicArg for $ty {}
        )*
    }
}

basic! {
    u8, b'y', 1, store_u8, load_u8;
    bool, b'b', 4, store_bool, load_bool;
    i16, b'n', 2, store_i16, load_i16;
    u16, b'q', 2, store_u16, load_u16;
    i32, b'i', 4, store_i32, load_i32;
    u32, b'u', 4, store_u32, load_u32;
    i64, b'x', 8, store_i64, load_i64;
    u64, b't', 8, store_u64, load_u64;
    f64, b'd', 8, store_f64, load_f64;
}

impl Arg for str {
    const ALIGNMENT: usize = 4;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b's')
    }
}

impl Store for str {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_str(self);
        Ok(())
    }
}

impl BasicArg for str {}

impl<'de> Load<'de> for &'de str {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        buf.read_str()
    }
}

impl Arg for String {
    const ALIGNMENT: usize = 4;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b's')
    }
}

impl Store for String {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_str(self);
        Ok(())
    }
}

impl Load<'_> for String {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
        Ok(buf.read_str()?.to_owned())
    }
}

impl BasicArg for String {}

impl Arg for crate::Signature {
    const ALIGNMENT: usize = 1;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'g')
    }
}

impl Store for crate::Signature {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_signature(self);
        Ok(())
    }
}

impl BasicArg for crate::Signature {}

impl<'de> Load<'de> for &'de crate::Signature {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        buf.read_signature()
    }
}

impl Arg for SignatureBuf {
    const ALIGNMENT: usize = 1;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'g')
    }
}

impl Store for SignatureBuf {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_signature(self);
        Ok(())
    }
}

impl Load<'_> for SignatureBuf {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
        Ok(buf.read_signature()?.to_owned())
    }
}

impl BasicArg for SignatureBuf {}

impl Arg for crate::ObjectPath {
    const ALIGNMENT: usize = 4;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'o')
    }
}

impl Store for crate::ObjectPath {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_object_path(self);
        Ok(())
    }
}

impl BasicArg for crate::ObjectPath {}

impl<'de> Load<'de> for &'de crate::ObjectPath {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        buf.read_object_path()
    }
}

impl Arg for crate::ObjectPathBuf {
    const ALIGNMENT: usize = 4;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'o')
    }
}

impl Store for crate::ObjectPathBuf {
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_object_path(self);
        Ok(())
    }
}

impl Load<'_> for crate::ObjectPathBuf {
    #[inline]
    fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
        Ok(buf.read_object_path()?.to_owned())
    }
}

impl BasicArg for crate::ObjectPathBuf {}

impl<T> Arg for Vec<T>
where
    T: Arg,
{
    const ALIGNMENT: usize = 4;

    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'a')?;
        T::signature(builder)
    }
}

impl<T> Store for Vec<T>
where
    T: Store,
{
    #[inline]
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        self.as_slice().store_to(buf)
    }
}

impl<'de, T> Load<'de> for Vec<T>
where
    T: Load<'de>,
{
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let mut elements = buf.read_array(T::ALIGNMENT)?;
        let mut out = Vec::new();

        while !elements.is_empty() {
            out.push(T::load_from(&mut elements)?);
        }

        Ok(out)
    }
}

impl<T> Arg for [T]
where
    T: Arg,
{
    const ALIGNMENT: usize = 4;

    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'a')?;
        T::signature(builder)
    }
}

impl<T> Store for [T]
where
    T: Store,
{
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        let mut array = buf.write_array(T::ALIGNMENT);

        for value in self {
            value.store_to(&mut array)?;
        }

        array.finish()
    }
}

impl<K, V> Arg for BTreeMap<K, V>
where
    K: BasicArg,
    V: Arg,
{
    const ALIGNMENT: usize = 4;

    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'a')?;
        builder.push(b'{')?;
        K::signature(builder)?;
        V::signature(builder)?;
        builder.push(b'}')
    }
}

impl<K, V> Store for BTreeMap<K, V>
where
    K: BasicArg + Store + Ord,
    V: Store,
{
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        let mut array = buf.write_array(8);

        for (key, value) in self {
            array.write_struct();
            key.store_to(&mut array)?;
            value.store_to(&mut array)?;
        }

        array.finish()
    }
}

impl<'de, K, V> Load<'de> for BTreeMap<K, V>
where
    K: BasicArg + Load<'de> + Ord,
    V: Load<'de>,
{
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let mut entries = buf.read_array(8)?;
        let mut out = BTreeMap::new();

        while !entries.is_empty() {
            entries.read_struct()?;
            let key = K::load_from(&mut entries)?;
            let value = V::load_from(&mut entries)?;
            // Duplicates keep the last occurrence.
            out.insert(key, value);
        }

        Ok(out)
    }
}

impl<K, V> Arg for HashMap<K, V>
where
    K: BasicArg,
    V: Arg,
{
    const ALIGNMENT: usize = 4;

    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'a')?;
        builder.push(b'{')?;
        K::signature(builder)?;
        V::signature(builder)?;
        builder.push(b'}')
    }
}

impl<K, V> Store for HashMap<K, V>
where
    K: BasicArg + Store + Ord + Hash,
    V: Store,
{
    /// Entries are emitted in sorted key order so that repeated encodings of
    /// the same map are byte-identical.
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        let mut entries = self.iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut array = buf.write_array(8);

        for (key, value) in entries {
            array.write_struct();
            key.store_to(&mut array)?;
            value.store_to(&mut array)?;
        }

        array.finish()
    }
}

impl<'de, K, V> Load<'de> for HashMap<K, V>
where
    K: BasicArg + Load<'de> + Eq + Hash,
    V: Load<'de>,
{
    fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
        let mut entries = buf.read_array(8)?;
        let mut out = HashMap::new();

        while !entries.is_empty() {
            entries.read_struct()?;
            let key = K::load_from(&mut entries)?;
            let value = V::load_from(&mut entries)?;
            out.insert(key, value);
        }

        Ok(out)
    }
}

impl Arg for () {
    const ALIGNMENT: usize = 1;

    #[inline]
    fn signature(_: &mut SignatureBuilder) -> Result<(), SignatureError> {
        Ok(())
    }
}

impl Store for () {
    #[inline]
    fn store_to(&self, _: &mut BodyBuf) -> Result<()> {
        Ok(())
    }
}

impl Load<'_> for () {
    #[inline]
    fn load_from(_: &mut ReadBuf<'_>) -> Result<Self> {
        Ok(())
    }
}

macro_rules! tuple {
    ($($ty:ident $var:ident),*) => {
        impl<$($ty,)*> Arg for ($($ty,)*)
        where
            $($ty: Arg,)*
        {
            const ALIGNMENT: usize = 8;

            fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
                builder.push(b'(')?;
                $(<$ty>::signature(builder)?;)*
                builder.push(b')')
            }
        }

        impl<$($ty,)*> Store for ($($ty,)*)
        where
            $($ty: Store,)*
        {
            fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
                let ($($var,)*) = self;
                buf.write_struct();
                $($var.store_to(buf)?;)*
                Ok(())
            }
        }

        impl<'de, $($ty,)*> Load<'de> for ($($ty,)*)
        where
            $($ty: Load<'de>,)*
        {
            fn load_from(buf: &mut ReadBuf<'de>) -> Result<Self> {
                buf.read_struct()?;
                $(let $var = <$ty>::load_from(buf)?;)*
                Ok(($($var,)*))
            }
        }
    }
}

tuple!(A a);
tuple!(A a, B b);
tuple!(A a, B b, C c);
tuple!(A a, B b, C c, D d);
tuple!(A a, B b, C c, D d, E e);
tuple!(A a, B b, C c, D d, E e, F f);
tuple!(A a, B b, C c, D d, E e, F f, G g);
tuple!(A a, B b, C c, D d, E e, F f, G g, H h);

/// A tuple of values making up a message body.
///
/// A body is a sequence of complete types, not a struct: the elements
/// concatenate without any enclosing frame, which is how method arguments
/// and return values travel. The same tuples, used as values through
/// [`Store`]/[`Load`], encode as structs instead.
pub trait Args {
    /// Append the concatenated signature of the argument list.
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError>;
}

/// An argument list which can be encoded into a message body.
pub trait StoreArgs: Args {
    /// Encode each argument in order.
    fn store_args(&self, buf: &mut BodyBuf) -> Result<()>;
}

/// An argument list which can be decoded from a message body.
pub trait LoadArgs<'de>: Args + Sized {
    /// Decode each argument in order.
    fn load_args(buf: &mut ReadBuf<'de>) -> Result<Self>;
}

/// Render the signature of the argument list `T`.
pub fn args_signature_of<T>() -> Result<SignatureBuf>
where
    T: Args,
{
    let mut builder = SignatureBuilder::new();
    T::signature(&mut builder)?;
    Ok(builder.finish())
}

macro_rules! args {
    ($($ty:ident $var:ident),*) => {
        impl<$($ty,)*> Args for ($($ty,)*)
        where
            $($ty: Arg,)*
        {
            fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
                $(<$ty>::signature(builder)?;)*
                Ok(())
            }
        }

        impl<$($ty,)*> StoreArgs for ($($ty,)*)
        where
            $($ty: Store,)*
        {
            fn store_args(&self, buf: &mut BodyBuf) -> Result<()> {
                let ($($var,)*) = self;
                $($var.store_to(buf)?;)*
                Ok(())
            }
        }

        impl<'de, $($ty,)*> LoadArgs<'de> for ($($ty,)*)
        where
            $($ty: Load<'de>,)*
        {
            fn load_args(buf: &mut ReadBuf<'de>) -> Result<Self> {
                $(let $var = <$ty>::load_from(buf)?;)*
                Ok(($($var,)*))
            }
        }
    }
}

impl Args for () {
    #[inline]
    fn signature(_: &mut SignatureBuilder) -> Result<(), SignatureError> {
        Ok(())
    }
}

impl StoreArgs for () {
    #[inline]
    fn store_args(&self, _: &mut BodyBuf) -> Result<()> {
        Ok(())
    }
}

impl LoadArgs<'_> for () {
    #[inline]
    fn load_args(_: &mut ReadBuf<'_>) -> Result<Self> {
        Ok(())
    }
}

args!(A a);
args!(A a, B b);
args!(A a, B b, C c);
args!(A a, B b, C c, D d);
args!(A a, B b, C c, D d, E e);
args!(A a, B b, C c, D d, E e, F f);
args!(A a, B b, C c, D d, E e, F f, G g);
args!(A a, B b, C c, D d, E e, F f, G g, H h);
