//! Dynamically typed values, used wherever the type of a message element is
//! only known at runtime: variants, header fields and signal bodies routed
//! to watchers.

use crate::body::{Arg, Fd, Load, Store};
use crate::buf::{BodyBuf, ReadBuf};
use crate::error::{Error, ErrorKind, Result};
use crate::object_path::ObjectPathBuf;
use crate::signature::{Part, Signature, SignatureBuf, SignatureBuilder, SignatureError};

/// A single complete value of any representable type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// An 8-bit unsigned integer.
    Byte(u8),
    /// A boolean.
    Bool(bool),
    /// A 16-bit signed integer.
    Int16(i16),
    /// A 16-bit unsigned integer.
    UInt16(u16),
    /// A 32-bit signed integer.
    Int32(i32),
    /// A 32-bit unsigned integer.
    UInt32(u32),
    /// A 64-bit signed integer.
    Int64(i64),
    /// A 64-bit unsigned integer.
    UInt64(u64),
    /// An IEEE 754 double.
    Double(f64),
    /// A string.
    String(String),
    /// An object path.
    ObjectPath(ObjectPathBuf),
    /// A signature.
    Signature(SignatureBuf),
    /// A file descriptor.
    Fd(Fd),
    /// An array carrying its element signature, so that empty arrays stay
    /// typed.
    Array(SignatureBuf, Vec<Value>),
    /// A dictionary carrying its key and value signatures.
    Dict(SignatureBuf, SignatureBuf, Vec<(Value, Value)>),
    /// A struct.
    Struct(Vec<Value>),
    /// A nested variant.
    Variant(Box<Variant>),
}

impl Value {
    /// Decode a single complete value described by `signature`.
    pub fn load(signature: &Signature, buf: &mut ReadBuf<'_>) -> Result<Value> {
        let mut parts = signature.iter();

        let Some(part) = parts.next() else {
            return Err(Error::new(ErrorKind::ExpectedSingleSignature(
                signature.to_owned(),
            )));
        };

        if parts.next().is_some() {
            return Err(Error::new(ErrorKind::ExpectedSingleSignature(
                signature.to_owned(),
            )));
        }

        Self::load_part(part, buf)
    }

    /// Decode every complete value of a message body described by
    /// `signature`.
    pub fn load_many(signature: &Signature, buf: &mut ReadBuf<'_>) -> Result<Vec<Value>> {
        let mut out = Vec::new();

        for part in signature.iter() {
            out.push(Self::load_part(part, buf)?);
        }

        Ok(out)
    }

    fn load_part(part: Part<'_>, buf: &mut ReadBuf<'_>) -> Result<Value> {
        Ok(match part {
            Part::Single(sig) => match sig.as_bytes() {
                b"y" => Value::Byte(buf.load_u8()?),
                b"b" => Value::Bool(buf.load_bool()?),
                b"n" => Value::Int16(buf.load_i16()?),
                b"q" => Value::UInt16(buf.load_u16()?),
                b"i" => Value::Int32(buf.load_i32()?),
                b"u" => Value::UInt32(buf.load_u32()?),
                b"x" => Value::Int64(buf.load_i64()?),
                b"t" => Value::UInt64(buf.load_u64()?),
                b"d" => Value::Double(buf.load_f64()?),
                b"s" => Value::String(buf.read_str()?.to_owned()),
                b"o" => Value::ObjectPath(buf.read_object_path()?.to_owned()),
                b"g" => Value::Signature(buf.read_signature()?.to_owned()),
                b"h" => Value::Fd(Fd::load_from(buf)?),
                b"v" => Value::Variant(Box::new(Variant::load_from(buf)?)),
                _ => {
                    return Err(Error::new(ErrorKind::ExpectedSingleSignature(
                        sig.to_owned(),
                    )));
                }
            },
            Part::Array(element) => {
                let Some(element_part) = element.iter().next() else {
                    return Err(Error::new(ErrorKind::ExpectedSingleSignature(
                        element.to_owned(),
                    )));
                };

                let mut elements = buf.read_array(element_part.alignment())?;
                let mut values = Vec::new();

                while !elements.is_empty() {
                    values.push(Self::load_part(element_part, &mut elements)?);
                }

                Value::Array(element.to_owned(), values)
            }
            Part::Dict(key, value) => {
                let mut entries = buf.read_array(8)?;
                let mut out = Vec::new();

                while !entries.is_empty() {
                    entries.read_struct()?;
                    let k = Self::load(key, &mut entries)?;
                    let v = Self::load(value, &mut entries)?;
                    out.push((k, v));
                }

                Value::Dict(key.to_owned(), value.to_owned(), out)
            }
            Part::Struct(fields) => {
                buf.read_struct()?;
                let mut values = Vec::new();

                for field in fields.iter() {
                    values.push(Self::load_part(field, buf)?);
                }

                Value::Struct(values)
            }
        })
    }

    /// Encode this value.
    pub fn store(&self, buf: &mut BodyBuf) -> Result<()> {
        match self {
            Value::Byte(v) => buf.store_u8(*v),
            Value::Bool(v) => buf.store_bool(*v),
            Value::Int16(v) => buf.store_i16(*v),
            Value::UInt16(v) => buf.store_u16(*v),
            Value::Int32(v) => buf.store_i32(*v),
            Value::UInt32(v) => buf.store_u32(*v),
            Value::Int64(v) => buf.store_i64(*v),
            Value::UInt64(v) => buf.store_u64(*v),
            Value::Double(v) => buf.store_f64(*v),
            Value::String(v) => buf.write_str(v),
            Value::ObjectPath(v) => buf.write_object_path(v),
            Value::Signature(v) => buf.write_signature(v),
            Value::Fd(v) => v.store_to(buf)?,
            Value::Array(element, values) => {
                let mut array = buf.write_array(element.alignment());

                for value in values {
                    value.store(&mut array)?;
                }

                array.finish()?;
            }
            Value::Dict(_, _, entries) => {
                let mut array = buf.write_array(8);

                for (key, value) in entries {
                    array.write_struct();
                    key.store(&mut array)?;
                    value.store(&mut array)?;
                }

                array.finish()?;
            }
            Value::Struct(values) => {
                buf.write_struct();

                for value in values {
                    value.store(buf)?;
                }
            }
            Value::Variant(variant) => variant.store_to(buf)?,
        }

        Ok(())
    }

    /// Render the signature of this value.
    pub fn signature(&self) -> Result<SignatureBuf> {
        let mut builder = SignatureBuilder::new();
        self.append_signature(&mut builder)?;
        Ok(builder.finish())
    }

    fn append_signature(&self, builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        match self {
            Value::Byte(..) => builder.push(b'y'),
            Value::Bool(..) => builder.push(b'b'),
            Value::Int16(..) => builder.push(b'n'),
            Value::UInt16(..) => builder.push(b'q'),
            Value::Int32(..) => builder.push(b'i'),
            Value::UInt32(..) => builder.push(b'u'),
            Value::Int64(..) => builder.push(b'x'),
            Value::UInt64(..) => builder.push(b't'),
            Value::Double(..) => builder.push(b'd'),
            Value::String(..) => builder.push(b's'),
            Value::ObjectPath(..) => builder.push(b'o'),
            Value::Signature(..) => builder.push(b'g'),
            Value::Fd(..) => builder.push(b'h'),
            Value::Array(element, ..) => {
                builder.push(b'a')?;
                builder.append(element)
            }
            Value::Dict(key, value, ..) => {
                builder.push(b'a')?;
                builder.push(b'{')?;
                builder.append(key)?;
                builder.append(value)?;
                builder.push(b'}')
            }
            Value::Struct(values) => {
                builder.push(b'(')?;

                for value in values {
                    value.append_signature(builder)?;
                }

                builder.push(b')')
            }
            Value::Variant(..) => builder.push(b'v'),
        }
    }

    /// The string carried by this value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// The string form of this value if it is a string or an object path.
    pub(crate) fn as_path_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            Value::ObjectPath(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

macro_rules! from_impl {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                #[inline]
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    }
}

from_impl! {
    u8 => Byte,
    bool => Bool,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f64 => Double,
    String => String,
    ObjectPathBuf => ObjectPath,
    SignatureBuf => Signature,
    Fd => Fd,
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

/// A value tagged with its signature.
///
/// On the wire a variant encodes as its signature followed by the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    signature: SignatureBuf,
    value: Value,
}

impl Variant {
    /// Construct a variant, deriving the signature from the value.
    pub fn new<V>(value: V) -> Result<Self>
    where
        V: Into<Value>,
    {
        let value = value.into();
        let signature = value.signature()?;

        Ok(Self { signature, value })
    }

    /// Construct a variant from an already known signature and value.
    ///
    /// The signature must describe the value; this is not checked.
    pub fn from_parts(signature: SignatureBuf, value: Value) -> Self {
        Self { signature, value }
    }

    /// The signature of the contained value.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The contained value.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Unwrap the contained value.
    #[inline]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Arg for Variant {
    const ALIGNMENT: usize = 1;

    #[inline]
    fn signature(builder: &mut SignatureBuilder) -> Result<(), SignatureError> {
        builder.push(b'v')
    }
}

impl Store for Variant {
    fn store_to(&self, buf: &mut BodyBuf) -> Result<()> {
        buf.write_signature(&self.signature);
        self.value.store(buf)
    }
}

impl Load<'_> for Variant {
    fn load_from(buf: &mut ReadBuf<'_>) -> Result<Self> {
        let signature = buf.read_signature()?;

        if !signature.is_single() {
            return Err(Error::new(ErrorKind::ExpectedSingleSignature(
                signature.to_owned(),
            )));
        }

        let value = Value::load(signature, buf)?;

        Ok(Self {
            signature: signature.to_owned(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::body::{self, Load, Store};
    use crate::buf::{BodyBuf, ReadBuf};
    use crate::proto::Endianness;
    use crate::signature::Signature;

    use super::{Value, Variant};

    #[test]
    fn signatures() {
        assert_eq!(Value::UInt32(1).signature().unwrap().as_str(), "u");

        let value = Value::Struct(vec![
            Value::String("a".into()),
            Value::Array(Signature::new("i").unwrap().to_owned(), Vec::new()),
        ]);
        assert_eq!(value.signature().unwrap().as_str(), "(sai)");
    }

    #[test]
    fn value_round_trip() {
        let values = [
            Value::Byte(7),
            Value::Bool(true),
            Value::Double(-4.2),
            Value::String("hello".into()),
            Value::Array(
                Signature::new("s").unwrap().to_owned(),
                vec![Value::String("x".into()), Value::String("y".into())],
            ),
            Value::Dict(
                Signature::new("y").unwrap().to_owned(),
                Signature::new("v").unwrap().to_owned(),
                vec![(
                    Value::Byte(1),
                    Value::Variant(Box::new(Variant::new(Value::UInt32(2)).unwrap())),
                )],
            ),
            Value::Struct(vec![Value::UInt32(1), Value::String("s".into())]),
        ];

        for value in values {
            let signature = value.signature().unwrap();

            let mut buf = BodyBuf::with_endianness(Endianness::BIG);
            value.store(&mut buf).unwrap();

            let mut read = ReadBuf::new(buf.as_bytes(), Endianness::BIG);
            let back = Value::load(&signature, &mut read).unwrap();

            assert_eq!(back, value);
            assert!(read.is_empty());
        }
    }

    #[test]
    fn variant_wire_format() {
        let mut buf = BodyBuf::with_endianness(Endianness::LITTLE);
        Variant::new(Value::UInt32(0xdeadbeef))
            .unwrap()
            .store_to(&mut buf)
            .unwrap();

        assert_eq!(
            buf.as_bytes(),
            &[1, b'u', 0, 0, 0xef, 0xbe, 0xad, 0xde]
        );

        let mut read = ReadBuf::new(buf.as_bytes(), Endianness::LITTLE);
        let variant = Variant::load_from(&mut read).unwrap();
        assert_eq!(variant.signature().as_str(), "u");
        assert_eq!(*variant.value(), Value::UInt32(0xdeadbeef));
    }

    #[test]
    fn variant_in_typed_map() {
        let mut map = BTreeMap::new();
        map.insert(1u8, Variant::new("Helsinki").unwrap());
        map.insert(2u8, Variant::new(-4.2f64).unwrap());

        let mut buf = BodyBuf::with_endianness(Endianness::LITTLE);
        map.store_to(&mut buf).unwrap();

        let mut read = ReadBuf::new(buf.as_bytes(), Endianness::LITTLE);
        let back = BTreeMap::<u8, Variant>::load_from(&mut read).unwrap();

        assert_eq!(back, map);
        assert_eq!(
            body::signature_of::<BTreeMap<u8, Variant>>()
                .unwrap()
                .as_str(),
            "a{yv}"
        );
    }
}
