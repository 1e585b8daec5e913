//! D-Bus messages and the wire framing of their headers.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU32;
use std::os::fd::OwnedFd;

use crate::body::{self, Load, LoadArgs, Store, StoreArgs};
use crate::buf::{BodyBuf, ReadBuf, MAX_BODY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::object_path::{ObjectPath, ObjectPathBuf};
use crate::proto::{self, Endianness, Field, Flags, MessageType};
use crate::signature::{Signature, SignatureBuf};
use crate::value::{Value, Variant};

/// The kind of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind {
    /// A method call, which may prompt a reply.
    MethodCall,
    /// A reply carrying returned data.
    MethodReturn,
    /// An error reply.
    Error,
    /// A signal emission.
    Signal,
}

/// An owned D-Bus message.
///
/// Messages pair a validated header with an encoded body and any file
/// descriptors travelling out-of-band. Unknown header fields observed on
/// inbound messages are preserved so that re-encoding round-trips.
pub struct Message {
    kind: MessageKind,
    serial: Option<NonZeroU32>,
    flags: Flags,
    path: Option<ObjectPathBuf>,
    interface: Option<String>,
    member: Option<String>,
    error_name: Option<String>,
    reply_serial: Option<NonZeroU32>,
    destination: Option<String>,
    sender: Option<String>,
    signature: SignatureBuf,
    unknown_fields: Vec<(u8, Variant)>,
    endianness: Endianness,
    body: Vec<u8>,
    fds: Vec<OwnedFd>,
}

impl Message {
    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: None,
            flags: Flags::EMPTY,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            signature: SignatureBuf::empty(),
            unknown_fields: Vec::new(),
            endianness: Endianness::NATIVE,
            body: Vec::new(),
            fds: Vec::new(),
        }
    }

    /// Construct a method call.
    pub fn method_call(path: &ObjectPath, member: &str) -> Self {
        Self {
            path: Some(path.to_owned()),
            member: Some(member.to_owned()),
            ..Self::empty(MessageKind::MethodCall)
        }
    }

    /// Construct a signal.
    pub fn signal(path: &ObjectPath, interface: &str, member: &str) -> Self {
        Self {
            path: Some(path.to_owned()),
            interface: Some(interface.to_owned()),
            member: Some(member.to_owned()),
            ..Self::empty(MessageKind::Signal)
        }
    }

    /// Construct a method return replying to `reply_serial`.
    pub fn method_return(reply_serial: NonZeroU32) -> Self {
        Self {
            reply_serial: Some(reply_serial),
            ..Self::empty(MessageKind::MethodReturn)
        }
    }

    /// Construct an error reply.
    pub fn error(error_name: &str, reply_serial: NonZeroU32) -> Self {
        Self {
            error_name: Some(error_name.to_owned()),
            reply_serial: Some(reply_serial),
            ..Self::empty(MessageKind::Error)
        }
    }

    /// Modify the byte order the message encodes with.
    ///
    /// This must precede [`with_body()`], which encodes using the byte order
    /// configured at that point.
    ///
    /// [`with_body()`]: Self::with_body
    pub fn with_endianness(self, endianness: Endianness) -> Self {
        Self { endianness, ..self }
    }

    /// Modify the serial of the message.
    pub fn with_serial(self, serial: NonZeroU32) -> Self {
        Self {
            serial: Some(serial),
            ..self
        }
    }

    /// Modify the flags of the message.
    pub fn with_flags(self, flags: Flags) -> Self {
        Self { flags, ..self }
    }

    /// Modify the interface of the message.
    pub fn with_interface(self, interface: &str) -> Self {
        Self {
            interface: Some(interface.to_owned()),
            ..self
        }
    }

    /// Modify the destination of the message.
    pub fn with_destination(self, destination: &str) -> Self {
        Self {
            destination: Some(destination.to_owned()),
            ..self
        }
    }

    /// Modify the sender of the message.
    ///
    /// On a bus this field is owned by the bus; clients sending through a
    /// [`Connection`] have it stripped.
    ///
    /// [`Connection`]: crate::Connection
    pub fn with_sender(self, sender: &str) -> Self {
        Self {
            sender: Some(sender.to_owned()),
            ..self
        }
    }

    /// Drop the sender field.
    pub(crate) fn without_sender(self) -> Self {
        Self {
            sender: None,
            ..self
        }
    }

    /// Encode `value` as the body of this message.
    ///
    /// The body signature is derived from the type before any bytes are
    /// written, so a type too deep to describe fails cleanly here.
    pub fn with_body<T>(self, value: &T) -> Result<Self>
    where
        T: ?Sized + Store,
    {
        let signature = body::signature_of::<T>()?;

        let mut buf = BodyBuf::with_endianness(self.endianness);
        value.store_to(&mut buf)?;
        let (bytes, fds) = buf.into_parts();

        Ok(Self {
            signature,
            body: bytes,
            fds,
            ..self
        })
    }

    /// Encode an argument list as the body of this message.
    ///
    /// Unlike [`with_body()`], the tuple elements concatenate without a
    /// struct frame, which is the layout of method arguments and return
    /// values.
    ///
    /// [`with_body()`]: Self::with_body
    pub fn with_args<T>(self, value: &T) -> Result<Self>
    where
        T: StoreArgs,
    {
        let signature = body::args_signature_of::<T>()?;

        let mut buf = BodyBuf::with_endianness(self.endianness);
        value.store_args(&mut buf)?;
        let (bytes, fds) = buf.into_parts();

        Ok(Self {
            signature,
            body: bytes,
            fds,
            ..self
        })
    }

    /// Use raw, already encoded bytes as the body of this message.
    pub fn with_raw_body(self, signature: SignatureBuf, body: Vec<u8>, fds: Vec<OwnedFd>) -> Self {
        Self {
            signature,
            body,
            fds,
            ..self
        }
    }

    /// The kind of the message.
    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The serial of the message, if it has been assigned one.
    #[inline]
    pub fn serial(&self) -> Option<NonZeroU32> {
        self.serial
    }

    /// The flags of the message.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The path header field.
    #[inline]
    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_deref()
    }

    /// The interface header field.
    #[inline]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The member header field.
    #[inline]
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// The error name header field.
    #[inline]
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    /// The serial this message replies to.
    #[inline]
    pub fn reply_serial(&self) -> Option<NonZeroU32> {
        self.reply_serial
    }

    /// The destination header field.
    #[inline]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The sender header field.
    #[inline]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The signature of the body.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Header fields this implementation does not interpret, preserved for
    /// round-tripping.
    #[inline]
    pub fn unknown_fields(&self) -> &[(u8, Variant)] {
        &self.unknown_fields
    }

    /// The byte order the body is encoded with.
    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// A reader over the message body.
    #[inline]
    pub fn body(&self) -> ReadBuf<'_> {
        ReadBuf::new(&self.body, self.endianness).with_fds(&self.fds)
    }

    /// The raw body bytes.
    #[inline]
    pub(crate) fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// The file descriptors travelling with this message.
    #[inline]
    pub(crate) fn fds(&self) -> &[OwnedFd] {
        &self.fds
    }

    #[inline]
    pub(crate) fn take_fds(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.fds)
    }

    /// Decode the body as `T`, which must match the body signature exactly.
    pub fn parse_body<'de, T>(&'de self) -> Result<T>
    where
        T: Load<'de>,
    {
        let expected = body::signature_of::<T>()?;

        if *self.signature.as_signature() != *expected.as_signature() {
            return Err(Error::new(ErrorKind::TypeMismatch {
                expected,
                actual: self.signature.clone(),
            }));
        }

        let mut buf = self.body();
        T::load_from(&mut buf)
    }

    /// Decode the body as the argument list `T`, which must match the body
    /// signature exactly.
    pub fn parse_args<'de, T>(&'de self) -> Result<T>
    where
        T: LoadArgs<'de>,
    {
        let expected = body::args_signature_of::<T>()?;

        if *self.signature.as_signature() != *expected.as_signature() {
            return Err(Error::new(ErrorKind::TypeMismatch {
                expected,
                actual: self.signature.clone(),
            }));
        }

        let mut buf = self.body();
        T::load_args(&mut buf)
    }

    pub(crate) fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::MethodCall => MessageType::METHOD_CALL,
            MessageKind::MethodReturn => MessageType::METHOD_RETURN,
            MessageKind::Error => MessageType::ERROR,
            MessageKind::Signal => MessageType::SIGNAL,
        }
    }

    /// Enforce the header invariants of this message's kind.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            MessageKind::MethodCall => {
                if self.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }

                if self.interface.is_none() {
                    return Err(Error::new(ErrorKind::MissingInterface));
                }

                if self.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }

                if self.destination.is_none() {
                    return Err(Error::new(ErrorKind::MissingDestination));
                }
            }
            MessageKind::Signal => {
                if self.path.is_none() {
                    return Err(Error::new(ErrorKind::MissingPath));
                }

                if self.interface.is_none() {
                    return Err(Error::new(ErrorKind::MissingInterface));
                }

                if self.member.is_none() {
                    return Err(Error::new(ErrorKind::MissingMember));
                }
            }
            MessageKind::MethodReturn => {
                if self.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
            }
            MessageKind::Error => {
                if self.error_name.is_none() {
                    return Err(Error::new(ErrorKind::MissingErrorName));
                }

                if self.reply_serial.is_none() {
                    return Err(Error::new(ErrorKind::MissingReplySerial));
                }
            }
        }

        Ok(())
    }

    /// Encode the full wire image of this message.
    ///
    /// The serial must have been assigned and the header must validate.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let Some(serial) = self.serial else {
            return Err(Error::new(ErrorKind::ZeroSerial));
        };

        let Ok(body_length) = u32::try_from(self.body.len()) else {
            return Err(Error::new(ErrorKind::BodyTooLong(u32::MAX)));
        };

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }

        let mut buf = BodyBuf::with_endianness(self.endianness);
        buf.store_u8(self.endianness.0);
        buf.store_u8(self.message_type().0);
        buf.store_u8(self.flags.0);
        buf.store_u8(proto::VERSION);
        buf.store_u32(body_length);
        buf.store_u32(serial.get());

        let mut fields = buf.write_array(8);

        if let Some(path) = &self.path {
            fields.write_struct();
            fields.store_u8(Field::PATH.0);
            fields.write_signature(Signature::OBJECT_PATH);
            fields.write_object_path(path);
        }

        if let Some(interface) = &self.interface {
            fields.write_struct();
            fields.store_u8(Field::INTERFACE.0);
            fields.write_signature(Signature::STRING);
            fields.write_str(interface);
        }

        if let Some(member) = &self.member {
            fields.write_struct();
            fields.store_u8(Field::MEMBER.0);
            fields.write_signature(Signature::STRING);
            fields.write_str(member);
        }

        if let Some(error_name) = &self.error_name {
            fields.write_struct();
            fields.store_u8(Field::ERROR_NAME.0);
            fields.write_signature(Signature::STRING);
            fields.write_str(error_name);
        }

        if let Some(reply_serial) = self.reply_serial {
            fields.write_struct();
            fields.store_u8(Field::REPLY_SERIAL.0);
            fields.write_signature(Signature::UINT32);
            fields.store_u32(reply_serial.get());
        }

        if let Some(destination) = &self.destination {
            fields.write_struct();
            fields.store_u8(Field::DESTINATION.0);
            fields.write_signature(Signature::STRING);
            fields.write_str(destination);
        }

        if let Some(sender) = &self.sender {
            fields.write_struct();
            fields.store_u8(Field::SENDER.0);
            fields.write_signature(Signature::STRING);
            fields.write_str(sender);
        }

        if !self.signature.is_empty() {
            fields.write_struct();
            fields.store_u8(Field::SIGNATURE.0);
            fields.write_signature(Signature::SIGNATURE);
            fields.write_signature(&self.signature);
        }

        if !self.fds.is_empty() {
            fields.write_struct();
            fields.store_u8(Field::UNIX_FDS.0);
            fields.write_signature(Signature::UINT32);
            fields.store_u32(self.fds.len() as u32);
        }

        for (code, variant) in &self.unknown_fields {
            fields.write_struct();
            fields.store_u8(*code);
            variant.store_to(&mut fields)?;
        }

        fields.finish()?;

        buf.align(8);
        buf.extend_from_slice(&self.body);

        Ok(buf.into_parts().0)
    }

    /// Decode a complete wire frame, taking the descriptors the frame's
    /// `UNIX_FDS` header claims from the front of `fds`.
    pub fn decode(bytes: &[u8], fds: &mut VecDeque<OwnedFd>) -> Result<Message> {
        let Some(&mark) = bytes.first() else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        let endianness = Endianness::new(mark);

        if !endianness.is_valid() {
            return Err(Error::new(ErrorKind::InvalidEndianness(mark)));
        }

        let mut read = ReadBuf::new(bytes, endianness);
        read.load_u8()?;
        let message_type = MessageType::new(read.load_u8()?);
        let flags = Flags(read.load_u8()?);
        let version = read.load_u8()?;

        if version != proto::VERSION {
            return Err(Error::new(ErrorKind::InvalidProtocolVersion(version)));
        }

        let body_length = read.load_u32()?;

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }

        let serial = read.load_u32()?;

        let Some(serial) = NonZeroU32::new(serial) else {
            return Err(Error::new(ErrorKind::ZeroSerial));
        };

        let mut path = None;
        let mut interface = None;
        let mut member = None;
        let mut error_name = None;
        let mut reply_serial = None;
        let mut destination = None;
        let mut sender = None;
        let mut signature = SignatureBuf::empty();
        let mut unknown_fields = Vec::new();
        let mut unix_fds = 0u32;

        let mut entries = read.read_array(8)?;

        while !entries.is_empty() {
            entries.read_struct()?;
            let code = entries.load_u8()?;
            let sig = entries.read_signature()?;

            match (Field::new(code), sig.as_bytes()) {
                (Field::PATH, b"o") => {
                    path = Some(entries.read_object_path()?.to_owned());
                }
                (Field::INTERFACE, b"s") => {
                    interface = Some(entries.read_str()?.to_owned());
                }
                (Field::MEMBER, b"s") => {
                    member = Some(entries.read_str()?.to_owned());
                }
                (Field::ERROR_NAME, b"s") => {
                    error_name = Some(entries.read_str()?.to_owned());
                }
                (Field::REPLY_SERIAL, b"u") => {
                    let number = entries.load_u32()?;

                    let Some(number) = NonZeroU32::new(number) else {
                        return Err(Error::new(ErrorKind::MissingReplySerial));
                    };

                    reply_serial = Some(number);
                }
                (Field::DESTINATION, b"s") => {
                    destination = Some(entries.read_str()?.to_owned());
                }
                (Field::SENDER, b"s") => {
                    sender = Some(entries.read_str()?.to_owned());
                }
                (Field::SIGNATURE, b"g") => {
                    signature = entries.read_signature()?.to_owned();
                }
                (Field::UNIX_FDS, b"u") => {
                    unix_fds = entries.load_u32()?;
                }
                (_, _) => {
                    let value = Value::load(sig, &mut entries)?;
                    unknown_fields.push((code, Variant::from_parts(sig.to_owned(), value)));
                }
            }
        }

        read.align(8)?;
        let body = read.load_slice(body_length as usize)?;

        if !read.is_empty() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        if fds.len() < unix_fds as usize {
            return Err(Error::new(ErrorKind::MissingFd(unix_fds)));
        }

        let fds = fds.drain(..unix_fds as usize).collect();

        let kind = match message_type {
            MessageType::METHOD_CALL => MessageKind::MethodCall,
            MessageType::METHOD_RETURN => MessageKind::MethodReturn,
            MessageType::ERROR => MessageKind::Error,
            MessageType::SIGNAL => MessageKind::Signal,
            MessageType(other) => {
                return Err(Error::new(ErrorKind::InvalidMessageType(other)));
            }
        };

        let message = Message {
            kind,
            serial: Some(serial),
            flags,
            path,
            interface,
            member,
            error_name,
            reply_serial,
            destination,
            sender,
            signature,
            unknown_fields,
            endianness,
            body: body.to_vec(),
            fds,
        };

        message.validate()?;
        Ok(message)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("serial", &self.serial)
            .field("flags", &self.flags)
            .field("path", &self.path)
            .field("interface", &self.interface)
            .field("member", &self.member)
            .field("error_name", &self.error_name)
            .field("reply_serial", &self.reply_serial)
            .field("destination", &self.destination)
            .field("sender", &self.sender)
            .field("signature", &self.signature)
            .field("body", &self.body.len())
            .field("fds", &self.fds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::num::NonZeroU32;

    use crate::error::ErrorKind;
    use crate::object_path::ObjectPath;
    use crate::proto::Endianness;
    use crate::value::{Value, Variant};

    use super::{Message, MessageKind};

    fn serial(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[rustfmt::skip]
    const RETURN_BLOB: [u8; 36] = [
        // Byte order mark, METHOD_RETURN, no flags, protocol version 1.
        b'l', 2, 0, 1,
        // Body length 4.
        4, 0, 0, 0,
        // Serial 0x12345678.
        0x78, 0x56, 0x34, 0x12,
        // Header field array, 15 bytes.
        15, 0, 0, 0,
        // REPLY_SERIAL, signature "u", 0xabcdef12.
        5, 1, b'u', 0, 0x12, 0xef, 0xcd, 0xab,
        // SIGNATURE, signature "g", body signature "u".
        8, 1, b'g', 0, 1, b'u', 0,
        // Padding to the 8-aligned body.
        0,
        // Body: 0xdeadbeef.
        0xef, 0xbe, 0xad, 0xde,
    ];

    #[test]
    fn encode_method_return_blob() {
        let message = Message::method_return(serial(0xabcdef12))
            .with_serial(serial(0x12345678))
            .with_endianness(Endianness::LITTLE)
            .with_body(&0xdeadbeefu32)
            .unwrap();

        assert_eq!(message.encode().unwrap(), RETURN_BLOB);
    }

    #[test]
    fn decode_method_return_blob() {
        let message = Message::decode(&RETURN_BLOB, &mut VecDeque::new()).unwrap();

        assert_eq!(message.kind(), MessageKind::MethodReturn);
        assert_eq!(message.serial(), Some(serial(0x12345678)));
        assert_eq!(message.reply_serial(), Some(serial(0xabcdef12)));
        assert_eq!(message.signature().as_str(), "u");
        assert_eq!(message.parse_body::<u32>().unwrap(), 0xdeadbeef);
    }

    #[test]
    fn encode_decode_method_call() {
        let message = Message::method_call(ObjectPath::new("/org/freedesktop/DBus").unwrap(), "Hello")
            .with_interface("org.freedesktop.DBus")
            .with_destination("org.freedesktop.DBus")
            .with_serial(serial(1));

        let bytes = message.encode().unwrap();
        let back = Message::decode(&bytes, &mut VecDeque::new()).unwrap();

        assert_eq!(back.kind(), MessageKind::MethodCall);
        assert_eq!(back.path().unwrap().as_str(), "/org/freedesktop/DBus");
        assert_eq!(back.member(), Some("Hello"));
        assert_eq!(back.interface(), Some("org.freedesktop.DBus"));
        assert_eq!(back.destination(), Some("org.freedesktop.DBus"));
        assert!(back.signature().is_empty());
    }

    #[test]
    fn unknown_fields_round_trip() {
        let mut message = Message::signal(
            ObjectPath::new("/org/example").unwrap(),
            "org.example.Iface",
            "Changed",
        )
        .with_serial(serial(2));

        message
            .unknown_fields
            .push((200, Variant::new(Value::UInt32(7)).unwrap()));

        let bytes = message.encode().unwrap();
        let back = Message::decode(&bytes, &mut VecDeque::new()).unwrap();

        assert_eq!(back.unknown_fields().len(), 1);
        assert_eq!(back.unknown_fields()[0].0, 200);
        assert_eq!(*back.unknown_fields()[0].1.value(), Value::UInt32(7));

        // A second round keeps the field intact.
        let again = Message::decode(&back.encode().unwrap(), &mut VecDeque::new()).unwrap();
        assert_eq!(again.unknown_fields(), back.unknown_fields());
    }

    #[test]
    fn validation_requirements() {
        let message = Message::method_call(ObjectPath::ROOT, "Ping").with_serial(serial(1));
        assert!(matches!(
            message.validate().unwrap_err().kind(),
            ErrorKind::MissingInterface
        ));

        let message = message.with_interface("org.example");
        assert!(matches!(
            message.validate().unwrap_err().kind(),
            ErrorKind::MissingDestination
        ));

        let message = message.with_destination("org.example");
        assert!(message.validate().is_ok());
    }

    #[test]
    fn missing_serial_is_rejected() {
        let message = Message::method_return(serial(1));
        assert!(matches!(
            message.encode().unwrap_err().kind(),
            ErrorKind::ZeroSerial
        ));
    }

    #[test]
    fn big_endian_round_trip() {
        let message = Message::signal(
            ObjectPath::new("/org/example").unwrap(),
            "org.example.Iface",
            "Changed",
        )
        .with_serial(serial(9))
        .with_endianness(Endianness::BIG)
        .with_body(&(1u32, String::from("x")))
        .unwrap();
        let bytes = message.encode().unwrap();

        assert_eq!(bytes[0], b'B');

        let back = Message::decode(&bytes, &mut VecDeque::new()).unwrap();
        assert_eq!(back.parse_body::<(u32, String)>().unwrap(), (1, String::from("x")));
    }

    #[test]
    fn zero_serial_is_rejected_on_decode() {
        let mut bytes = RETURN_BLOB.to_vec();
        bytes[8..12].copy_from_slice(&[0, 0, 0, 0]);

        assert!(matches!(
            Message::decode(&bytes, &mut VecDeque::new()).unwrap_err().kind(),
            ErrorKind::ZeroSerial
        ));
    }
}
