use std::collections::{BTreeMap, HashMap};

use crate::buf::{BodyBuf, ReadBuf};
use crate::proto::Endianness;
use crate::value::Variant;
use crate::vardict;

use super::{signature_of, Load, Store};

fn round_trip<T>(value: T)
where
    T: Store + for<'de> Load<'de> + PartialEq + std::fmt::Debug,
{
    for endianness in [Endianness::LITTLE, Endianness::BIG] {
        let mut buf = BodyBuf::with_endianness(endianness);
        value.store_to(&mut buf).unwrap();

        let mut read = ReadBuf::new(buf.as_bytes(), endianness);
        let back = T::load_from(&mut read).unwrap();

        assert_eq!(back, value);
        assert!(read.is_empty());
    }
}

#[test]
fn primitive_round_trips() {
    round_trip(0x12u8);
    round_trip(true);
    round_trip(-2i16);
    round_trip(0x1234u16);
    round_trip(-70000i32);
    round_trip(0xdeadbeefu32);
    round_trip(-5_000_000_000i64);
    round_trip(0x0102030405060708u64);
    round_trip(-4.2f64);
    round_trip(String::from("hello world"));
}

#[test]
fn container_round_trips() {
    round_trip(vec![1u32, 2, 3]);
    round_trip(vec![String::from("a"), String::from("bc")]);
    round_trip(Vec::<u64>::new());
    round_trip((1u8, String::from("x"), 2u64));
    round_trip(vec![(1u32, String::from("a")), (2, String::from("b"))]);

    let mut map = BTreeMap::new();
    map.insert(String::from("k"), 1u32);
    map.insert(String::from("l"), 2u32);
    round_trip(map);
}

#[test]
fn signatures() {
    assert_eq!(signature_of::<u32>().unwrap().as_str(), "u");
    assert_eq!(signature_of::<Vec<String>>().unwrap().as_str(), "as");
    assert_eq!(
        signature_of::<(u8, Vec<(i32, String)>)>().unwrap().as_str(),
        "(ya(is))"
    );
    assert_eq!(
        signature_of::<BTreeMap<String, Variant>>().unwrap().as_str(),
        "a{sv}"
    );
    assert_eq!(signature_of::<()>().unwrap().as_str(), "");
}

#[test]
fn signature_depends_only_on_type() {
    let a = signature_of::<(u32, Vec<String>)>().unwrap();
    let b = signature_of::<(u32, Vec<String>)>().unwrap();
    assert_eq!(a, b);
}

#[test]
fn map_encoding_is_canonical() {
    // The same entries inserted in opposite orders must produce identical
    // bytes.
    let mut a = HashMap::new();
    a.insert(String::from("b"), 2u32);
    a.insert(String::from("a"), 1u32);

    let mut b = HashMap::new();
    b.insert(String::from("a"), 1u32);
    b.insert(String::from("b"), 2u32);

    let mut buf_a = BodyBuf::new();
    a.store_to(&mut buf_a).unwrap();

    let mut buf_b = BodyBuf::new();
    b.store_to(&mut buf_b).unwrap();

    assert_eq!(buf_a.as_bytes(), buf_b.as_bytes());

    // And a sorted map with the same contents agrees byte for byte.
    let sorted = a.iter().map(|(k, v)| (k.clone(), *v)).collect::<BTreeMap<_, _>>();
    let mut buf_c = BodyBuf::new();
    sorted.store_to(&mut buf_c).unwrap();

    assert_eq!(buf_a.as_bytes(), buf_c.as_bytes());
}

#[test]
fn map_decode_keeps_last_duplicate() {
    // Hand-build a{yu} with the key 1 occurring twice.
    let mut buf = BodyBuf::with_endianness(Endianness::LITTLE);
    let mut array = buf.write_array(8);
    array.write_struct();
    array.store_u8(1);
    array.store_u32(10);
    array.write_struct();
    array.store_u8(1);
    array.store_u32(20);
    array.finish().unwrap();

    let mut read = ReadBuf::new(buf.as_bytes(), Endianness::LITTLE);
    let map = BTreeMap::<u8, u32>::load_from(&mut read).unwrap();

    assert_eq!(map.len(), 1);
    assert_eq!(map[&1], 20);
}

vardict! {
    /// A weather report with extensible details.
    struct Weather[u8] {
        fields {
            name: String,
        }
        dict {
            1 => location: String,
            2 => temperature: f64,
        }
        rest extensions;
    }
}

#[test]
fn vardict_decodes_as_plain_struct() {
    let weather = Weather {
        name: String::from("Weather"),
        location: String::from("Helsinki"),
        temperature: -4.2,
        extensions: BTreeMap::new(),
    };

    let mut buf = BodyBuf::with_endianness(Endianness::BIG);
    weather.store_to(&mut buf).unwrap();

    let mut read = ReadBuf::new(buf.as_bytes(), Endianness::BIG);
    let (name, extensions) =
        <(String, BTreeMap<u8, Variant>)>::load_from(&mut read).unwrap();

    assert_eq!(name, "Weather");
    assert_eq!(extensions.len(), 2);
    assert_eq!(extensions[&1], Variant::new("Helsinki").unwrap());
    assert_eq!(extensions[&2], Variant::new(-4.2f64).unwrap());
}

#[test]
fn vardict_equivalent_to_plain_map() {
    let weather = Weather {
        name: String::from("Weather"),
        location: String::from("Helsinki"),
        temperature: -4.2,
        extensions: {
            let mut map = BTreeMap::new();
            map.insert(9u8, Variant::new(1u32).unwrap());
            map
        },
    };

    let mut a = BodyBuf::new();
    weather.store_to(&mut a).unwrap();

    let mut map = BTreeMap::new();
    map.insert(1u8, Variant::new("Helsinki").unwrap());
    map.insert(2u8, Variant::new(-4.2f64).unwrap());
    map.insert(9u8, Variant::new(1u32).unwrap());

    let mut b = BodyBuf::new();
    (String::from("Weather"), map).store_to(&mut b).unwrap();

    assert_eq!(a.as_bytes(), b.as_bytes());
    assert_eq!(
        signature_of::<Weather>().unwrap(),
        signature_of::<(String, BTreeMap<u8, Variant>)>().unwrap()
    );
}

#[test]
fn vardict_round_trip() {
    let mut extensions = BTreeMap::new();
    extensions.insert(7u8, Variant::new("extra").unwrap());

    let weather = Weather {
        name: String::from("Weather"),
        location: String::from("Turku"),
        temperature: 21.5,
        extensions,
    };

    round_trip(weather);
}

#[test]
fn vardict_skips_zero_fields() {
    let weather = Weather {
        name: String::from("Weather"),
        location: String::new(),
        temperature: 0.0,
        extensions: BTreeMap::new(),
    };

    let mut buf = BodyBuf::new();
    weather.store_to(&mut buf).unwrap();

    let mut read = ReadBuf::new(buf.as_bytes(), buf.endianness());
    let (_, extensions) = <(String, BTreeMap<u8, Variant>)>::load_from(&mut read).unwrap();
    assert!(extensions.is_empty());
}

#[test]
fn vardict_rejects_extra_collision() {
    let mut extensions = BTreeMap::new();
    extensions.insert(1u8, Variant::new("shadow").unwrap());

    let weather = Weather {
        name: String::from("Weather"),
        location: String::from("Helsinki"),
        temperature: 0.0,
        extensions,
    };

    let mut buf = BodyBuf::new();
    let error = weather.store_to(&mut buf).unwrap_err();
    assert!(error.to_string().contains("Duplicate"));
}

#[test]
fn vardict_type_check_on_decode() {
    // Key 2 carries a string, but the field declares a double.
    let mut buf = BodyBuf::new();
    buf.write_struct();
    "Weather".store_to(&mut buf).unwrap();

    let mut map = BTreeMap::new();
    map.insert(2u8, Variant::new("not a number").unwrap());
    map.store_to(&mut buf).unwrap();

    let mut read = ReadBuf::new(buf.as_bytes(), buf.endianness());
    let error = Weather::load_from(&mut read).unwrap_err();
    assert!(error.is_type_error());
}

vardict! {
    struct Tagged[String] {
        dict {
            @ => label: String,
            "explicit-key" => count: u32 [always],
        }
        rest rest;
    }
}

#[test]
fn vardict_string_keys_and_always() {
    let tagged = Tagged {
        label: String::new(),
        count: 0,
        rest: BTreeMap::new(),
    };

    let mut buf = BodyBuf::new();
    tagged.store_to(&mut buf).unwrap();

    let mut read = ReadBuf::new(buf.as_bytes(), buf.endianness());
    let map = BTreeMap::<String, Variant>::load_from(&mut read).unwrap();

    // `label` is zero and skipped; `count` is zero but tagged `[always]`.
    assert_eq!(map.len(), 1);
    assert_eq!(map["explicit-key"], Variant::new(0u32).unwrap());
}

type Wide = (
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
);
type Deep1 = (Wide, Wide, Wide, Wide, Wide, Wide, Wide, Wide);
type Deep2 = (Deep1, Deep1, Deep1, Deep1, Deep1, Deep1, Deep1, Deep1);

#[test]
fn oversized_signature_fails_before_encoding() {
    let error = signature_of::<Deep2>().unwrap_err();
    assert!(error.is_type_error());
}

#[test]
fn fd_index_encoding() {
    use crate::body::Fd;

    // Encode the read end of a pipe-like descriptor; use stdin which is
    // always present in the test environment.
    let fd = Fd::new(0);

    let mut buf = BodyBuf::new();
    fd.store_to(&mut buf).unwrap();

    assert_eq!(buf.fd_count(), 1);

    // The wire carries the index into the out-of-band descriptor list.
    let mut read = ReadBuf::new(buf.as_bytes(), buf.endianness());
    assert_eq!(read.load_u32().unwrap(), 0);
}
