//! Support machinery for the [`vardict!`] macro.
//!
//! [`vardict!`]: crate::vardict!

use std::fmt;

use crate::buf::BodyBuf;
use crate::error::{Error, ErrorKind, Result};
use crate::signature::Signature;
use crate::value::Variant;

use super::{signature_of, Arg, Store};

/// Object-safe encoding surface used by generated code to schedule fields of
/// differing types into one dictionary.
pub trait ErasedStore {
    fn erased_signature(&self) -> Result<crate::SignatureBuf>;
    fn erased_store(&self, buf: &mut BodyBuf) -> Result<()>;
}

impl<T> ErasedStore for T
where
    T: Store,
{
    fn erased_signature(&self) -> Result<crate::SignatureBuf> {
        signature_of::<T>()
    }

    fn erased_store(&self, buf: &mut BodyBuf) -> Result<()> {
        self.store_to(buf)
    }
}

/// One dictionary entry scheduled for emission.
pub enum Slot<'a> {
    /// An associated field, wrapped in a variant envelope on write.
    Field(&'a dyn ErasedStore),
    /// A pass-through entry from the catch-all map.
    Extra(&'a Variant),
}

/// Fail if the declared keys of a dictionary struct collide.
pub fn check_distinct<K>(keys: &[K]) -> Result<()>
where
    K: PartialEq + fmt::Debug,
{
    for (n, key) in keys.iter().enumerate() {
        if keys[n + 1..].contains(key) {
            return Err(Error::new(ErrorKind::DuplicateVardictKey(format!(
                "{key:?}"
            ))));
        }
    }

    Ok(())
}

/// Fail if an incoming variant signature does not match the declared field
/// type.
pub fn check_signature<T>(actual: &Signature) -> Result<()>
where
    T: Arg,
{
    let expected = signature_of::<T>()?;

    if *actual != *expected.as_signature() {
        return Err(Error::new(ErrorKind::TypeMismatch {
            expected,
            actual: actual.to_owned(),
        }));
    }

    Ok(())
}

/// Sort scheduled entries by key and write them as a single dictionary.
///
/// Keys must be distinct after merging associated fields with catch-all
/// entries.
pub fn store_entries<K>(buf: &mut BodyBuf, mut entries: Vec<(K, Slot<'_>)>) -> Result<()>
where
    K: Store + Ord + fmt::Debug,
{
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    for window in entries.windows(2) {
        if window[0].0 == window[1].0 {
            return Err(Error::new(ErrorKind::DuplicateVardictKey(format!(
                "{:?}",
                window[0].0
            ))));
        }
    }

    let mut array = buf.write_array(8);

    for (key, slot) in &entries {
        array.write_struct();
        key.store_to(&mut array)?;

        match slot {
            Slot::Field(value) => {
                let signature = value.erased_signature()?;
                array.write_signature(&signature);
                value.erased_store(&mut array)?;
            }
            Slot::Extra(variant) => {
                variant.store_to(&mut array)?;
            }
        }
    }

    array.finish()
}

/// Declare a struct whose trailing fields encode as one extensible
/// dictionary of variants.
///
/// The optional `fields` block declares plain fields, which encode first
/// and in declaration order. The `dict` block declares associated fields
/// keyed by a literal of the bracketed key type, and `rest` names the
/// mandatory catch-all map collecting entries with unrecognized keys. `@`
/// as a key stands for the field's own name and is only meaningful with
/// string keys.
///
/// Associated fields are emitted only when their value differs from its
/// default, unless tagged `[always]`. On the wire associated and catch-all
/// entries merge into a single dictionary sorted by key.
///
/// Field types must implement `Default`, `PartialEq`, `Debug` and `Clone`
/// in addition to the codec traits.
///
/// # Examples
///
/// ```
/// use unibus::{body, vardict};
///
/// vardict! {
///     /// A weather report with extensible details.
///     pub struct Weather[u8] {
///         fields {
///             pub name: String,
///         }
///         dict {
///             1 => pub location: String,
///             2 => pub temperature: f64,
///         }
///         rest pub extensions;
///     }
/// }
///
/// assert_eq!(body::signature_of::<Weather>()?.as_str(), "(sa{yv})");
/// # Ok::<_, unibus::Error>(())
/// ```
#[macro_export]
macro_rules! vardict {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident [ $key:ty ] {
            $(fields {
                $(
                    $(#[$fmeta:meta])*
                    $fvis:vis $field:ident : $fty:ty,
                )*
            })?
            dict {
                $(
                    $kexpr:tt => $(#[$ameta:meta])* $avis:vis $afield:ident : $aty:ty $([$always:ident])?,
                )*
            }
            rest $(#[$rmeta:meta])* $rvis:vis $rest:ident;
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $($(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )*)?
            $(
                $(#[$ameta])*
                $avis $afield: $aty,
            )*
            $(#[$rmeta])*
            $rvis $rest: ::std::collections::BTreeMap<$key, $crate::Variant>,
        }

        impl $crate::body::Arg for $name {
            const ALIGNMENT: usize = 8;

            fn signature(
                builder: &mut $crate::signature::SignatureBuilder,
            ) -> ::std::result::Result<(), $crate::SignatureError> {
                builder.push(b'(')?;
                $($(<$fty as $crate::body::Arg>::signature(builder)?;)*)?
                builder.push(b'a')?;
                builder.push(b'{')?;
                <$key as $crate::body::Arg>::signature(builder)?;
                builder.push(b'v')?;
                builder.push(b'}')?;
                builder.push(b')')
            }
        }

        impl $crate::body::Store for $name {
            fn store_to(&self, __buf: &mut $crate::BodyBuf) -> $crate::Result<()> {
                let __declared: ::std::vec::Vec<$key> = ::std::vec![
                    $($crate::__vardict_key!($kexpr $afield),)*
                ];
                $crate::body::vardict::check_distinct(&__declared)?;

                __buf.write_struct();
                $($($crate::body::Store::store_to(&self.$field, __buf)?;)*)?

                let mut __entries: ::std::vec::Vec<(
                    $key,
                    $crate::body::vardict::Slot<'_>,
                )> = ::std::vec::Vec::new();

                $(
                    if $crate::__vardict_always!($($always)?)
                        || self.$afield != <$aty as ::std::default::Default>::default()
                    {
                        __entries.push((
                            $crate::__vardict_key!($kexpr $afield),
                            $crate::body::vardict::Slot::Field(&self.$afield),
                        ));
                    }
                )*

                for (__key, __value) in &self.$rest {
                    __entries.push((
                        ::std::clone::Clone::clone(__key),
                        $crate::body::vardict::Slot::Extra(__value),
                    ));
                }

                $crate::body::vardict::store_entries(__buf, __entries)
            }
        }

        impl<'de> $crate::body::Load<'de> for $name {
            fn load_from(__buf: &mut $crate::ReadBuf<'de>) -> $crate::Result<Self> {
                __buf.read_struct()?;
                $($(let $field = <$fty as $crate::body::Load>::load_from(__buf)?;)*)?

                $(let mut $afield: $aty = ::std::default::Default::default();)*
                let mut $rest: ::std::collections::BTreeMap<$key, $crate::Variant> =
                    ::std::collections::BTreeMap::new();

                let mut __entries = __buf.read_array(8)?;

                while !__entries.is_empty() {
                    __entries.read_struct()?;
                    let __key = <$key as $crate::body::Load>::load_from(&mut __entries)?;
                    let __signature = __entries.read_signature()?;

                    loop {
                        $(
                            if __key == ::std::convert::Into::<$key>::into($crate::__vardict_key_src!($kexpr $afield)) {
                                $crate::body::vardict::check_signature::<$aty>(__signature)?;
                                $afield = <$aty as $crate::body::Load>::load_from(&mut __entries)?;
                                break;
                            }
                        )*

                        let __value = $crate::Value::load(__signature, &mut __entries)?;
                        $rest.insert(
                            __key,
                            $crate::Variant::from_parts(
                                ::std::borrow::ToOwned::to_owned(__signature),
                                __value,
                            ),
                        );
                        break;
                    }
                }

                Ok(Self {
                    $($($field,)*)?
                    $($afield,)*
                    $rest,
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __vardict_key {
    (@ $field:ident) => {
        ::std::convert::Into::into(stringify!($field))
    };
    ($key:literal $field:ident) => {
        ::std::convert::Into::into($key)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __vardict_key_src {
    (@ $field:ident) => {
        stringify!($field)
    };
    ($key:literal $field:ident) => {
        $key
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __vardict_always {
    () => {
        false
    };
    (always) => {
        true
    };
}
