//! Property translation between abstract property lists and backend properties.
//!
//! A single abstract value becomes a scalar backend property whose no-index
//! flag follows the value's [`IndexSetting`]. Two or more values become a
//! backend list, which the backend always indexes. Decoding reverses this,
//! applying the backend property's flag to every element.

use chrono::Utc;
use entitystore::{
    DatastoreError, DatastoreResult, IndexSetting, Property, PropertyMap, PropertyValue,
};

use crate::{
    keys::{decode_key, encode_key},
    native::{NativeEntity, NativeProperty, NativeValue},
};

/// Maps an abstract value onto its native form without checking whether the
/// property codec supports it.
///
/// Query filters use this directly so that values the codec refuses still
/// reach the backend as themselves.
pub(crate) fn native_value(value: &PropertyValue) -> NativeValue {
    match value {
        PropertyValue::Null => NativeValue::Null,
        PropertyValue::Bool(b) => NativeValue::Bool(*b),
        PropertyValue::Int(i) => NativeValue::Int(*i),
        PropertyValue::Float(f) => NativeValue::Float(*f),
        PropertyValue::String(s) => NativeValue::String(s.clone()),
        PropertyValue::Bytes(b) => NativeValue::Bytes(b.clone()),
        PropertyValue::Time(t) => NativeValue::Time(t.fixed_offset()),
        PropertyValue::Key(k) => NativeValue::Key(encode_key(k)),
        PropertyValue::GeoPoint(gp) => NativeValue::GeoPoint { lat: gp.lat, lng: gp.lng },
        PropertyValue::BlobKey(bk) => NativeValue::BlobKey(bk.0.clone()),
    }
}

/// Encodes one abstract value.
///
/// `index` is the value's position in its property list and is reported on failure.
///
/// # Errors
///
/// Returns [`DatastoreError::UnsupportedPropertyType`] for geographic points
/// and blob-store references, which have no backend counterpart here.
pub(crate) fn encode_value(index: usize, value: &PropertyValue) -> DatastoreResult<NativeValue> {
    if matches!(value, PropertyValue::GeoPoint(_) | PropertyValue::BlobKey(_)) {
        return Err(DatastoreError::UnsupportedPropertyType {
            index,
            type_name: value.property_type().to_string(),
        });
    }
    Ok(native_value(value))
}

/// Encodes a named property list.
///
/// # Errors
///
/// Fails on the first unsupported value; nothing is encoded in that case.
pub(crate) fn encode_property(name: &str, values: &[Property]) -> DatastoreResult<NativeProperty> {
    if let [single] = values {
        return Ok(NativeProperty {
            name: name.to_owned(),
            value: encode_value(0, single.value())?,
            no_index: single.index_setting() == IndexSetting::NoIndex,
        });
    }

    let list = values
        .iter()
        .enumerate()
        .map(|(i, p)| encode_value(i, p.value()))
        .collect::<DatastoreResult<Vec<_>>>()?;
    Ok(NativeProperty { name: name.to_owned(), value: NativeValue::List(list), no_index: false })
}

fn decode_value(app_id: &str, index: usize, value: NativeValue) -> DatastoreResult<PropertyValue> {
    let decoded = match value {
        NativeValue::Null => PropertyValue::Null,
        NativeValue::Int(i) => PropertyValue::Int(i),
        NativeValue::Bool(b) => PropertyValue::Bool(b),
        NativeValue::String(s) => PropertyValue::String(s),
        NativeValue::Float(f) => PropertyValue::Float(f),
        NativeValue::Bytes(b) => PropertyValue::Bytes(b),
        NativeValue::Time(t) => PropertyValue::Time(t.with_timezone(&Utc)),
        NativeValue::Key(k) => PropertyValue::Key(decode_key(app_id, &k)?),
        other @ (NativeValue::GeoPoint { .. }
        | NativeValue::BlobKey(_)
        | NativeValue::Entity(_)
        | NativeValue::List(_)) => {
            return Err(DatastoreError::UnsupportedNativeType {
                index,
                type_name: other.type_name().to_owned(),
            });
        },
    };
    Ok(decoded)
}

/// Decodes a backend property into its name and value list.
///
/// # Errors
///
/// Returns [`DatastoreError::UnsupportedNativeType`] naming the first element
/// with no abstract counterpart, or a key error from the key codec.
pub(crate) fn decode_property(
    app_id: &str,
    prop: NativeProperty,
) -> DatastoreResult<(String, Vec<Property>)> {
    let index = if prop.no_index { IndexSetting::NoIndex } else { IndexSetting::ShouldIndex };
    let elements = match prop.value {
        NativeValue::List(items) => items,
        scalar => vec![scalar],
    };

    let values = elements
        .into_iter()
        .enumerate()
        .map(|(i, v)| decode_value(app_id, i, v).map(|value| Property::new(value, index)))
        .collect::<DatastoreResult<Vec<_>>>()?;
    Ok((prop.name, values))
}

/// Encodes a property map for storage.
///
/// Meta properties (`$`-prefixed names) are dropped when `strip_meta` is set.
pub(crate) fn save_entity(pmap: &PropertyMap, strip_meta: bool) -> DatastoreResult<NativeEntity> {
    pmap.iter()
        .filter(|(name, _)| !(strip_meta && PropertyMap::is_meta(name)))
        .map(|(name, values)| encode_property(name, values))
        .collect()
}

/// Decodes a stored entity.
///
/// Repeated backend properties of one name are merged in backend order.
pub(crate) fn load_entity(app_id: &str, entity: NativeEntity) -> DatastoreResult<PropertyMap> {
    let mut pmap = PropertyMap::new();
    for prop in entity {
        let (name, values) = decode_property(app_id, prop)?;
        pmap.append(name, values);
    }
    Ok(pmap)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use bytes::Bytes;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use entitystore::{BlobKey, GeoPoint, Key};
    use proptest::prelude::*;

    use super::*;
    use crate::native::NativeKey;

    fn arb_value() -> impl Strategy<Value = PropertyValue> {
        prop_oneof![
            Just(PropertyValue::Null),
            any::<bool>().prop_map(PropertyValue::Bool),
            any::<i64>().prop_map(PropertyValue::Int),
            (-1.0e12..1.0e12f64).prop_map(PropertyValue::Float),
            ".{0,16}".prop_map(PropertyValue::String),
            proptest::collection::vec(any::<u8>(), 0..32)
                .prop_map(|b| PropertyValue::Bytes(Bytes::from(b))),
            (0i64..4_000_000_000).prop_map(|secs| {
                PropertyValue::Time(DateTime::from_timestamp(secs, 0).expect("in range"))
            }),
            ("[A-Z][a-z]{1,6}", 1..i64::MAX).prop_map(|(kind, id)| {
                PropertyValue::Key(Key::new("app", "", kind, "", id, None).expect("valid key"))
            }),
        ]
    }

    fn arb_index() -> impl Strategy<Value = IndexSetting> {
        prop_oneof![Just(IndexSetting::ShouldIndex), Just(IndexSetting::NoIndex)]
    }

    proptest! {
        /// A scalar property keeps its value and its index setting.
        #[test]
        fn scalar_round_trip(value in arb_value(), index in arb_index()) {
            let props = vec![Property::new(value, index)];
            let native = encode_property("p", &props).expect("supported type");
            let (name, decoded) = decode_property("app", native).expect("decodable");
            prop_assert_eq!(name, "p");
            prop_assert_eq!(decoded, props);
        }

        /// Indexed multi-valued properties keep every value, in order.
        #[test]
        fn list_round_trip(values in proptest::collection::vec(arb_value(), 2..8)) {
            let props: Vec<Property> = values.into_iter().map(Property::indexed).collect();
            let native = encode_property("p", &props).expect("supported type");
            let (_, decoded) = decode_property("app", native).expect("decodable");
            prop_assert_eq!(decoded, props);
        }

        /// A list never opts out of indexing, whatever its values ask for.
        #[test]
        fn list_is_always_indexed(values in proptest::collection::vec(arb_value(), 2..8)) {
            let props: Vec<Property> = values.into_iter().map(Property::unindexed).collect();
            let native = encode_property("p", &props).expect("supported type");
            prop_assert!(!native.no_index);
            let (_, decoded) = decode_property("app", native).expect("decodable");
            prop_assert!(decoded.iter().all(|p| p.index_setting() == IndexSetting::ShouldIndex));
        }
    }

    #[test]
    fn test_unsupported_type_reports_index() {
        let props = vec![
            Property::indexed(1i64),
            Property::indexed(2i64),
            Property::indexed(GeoPoint { lat: 1.0, lng: 2.0 }),
        ];
        match encode_property("p", &props) {
            Err(DatastoreError::UnsupportedPropertyType { index, type_name }) => {
                assert_eq!(index, 2);
                assert_eq!(type_name, "geo point");
            },
            other => panic!("unexpected result: {other:?}"),
        }

        let blob = vec![Property::indexed(BlobKey("b".into()))];
        assert!(matches!(
            encode_property("p", &blob),
            Err(DatastoreError::UnsupportedPropertyType { index: 0, .. })
        ));
    }

    #[test]
    fn test_decode_normalizes_timestamps_to_utc() {
        let offset = FixedOffset::east_opt(5 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let prop = NativeProperty { name: "t".into(), value: NativeValue::Time(local), no_index: false };

        let (_, values) = decode_property("app", prop).unwrap();
        match values[0].value() {
            PropertyValue::Time(t) => {
                assert_eq!(*t, Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap());
            },
            other => panic!("expected time, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_nested_values() {
        let prop = NativeProperty {
            name: "p".into(),
            value: NativeValue::List(vec![
                NativeValue::Int(1),
                NativeValue::GeoPoint { lat: 0.0, lng: 0.0 },
            ]),
            no_index: false,
        };
        match decode_property("app", prop) {
            Err(DatastoreError::UnsupportedNativeType { index, type_name }) => {
                assert_eq!(index, 1);
                assert_eq!(type_name, "geo point");
            },
            other => panic!("unexpected result: {other:?}"),
        }

        let entity = NativeProperty { name: "e".into(), value: NativeValue::Entity(vec![]), no_index: true };
        assert!(matches!(
            decode_property("app", entity),
            Err(DatastoreError::UnsupportedNativeType { index: 0, .. })
        ));
    }

    #[test]
    fn test_decode_key_value_uses_app_id() {
        let prop = NativeProperty {
            name: "ref".into(),
            value: NativeValue::Key(NativeKey::new("Kind", "k", 0, None, "ns")),
            no_index: false,
        };
        let (_, values) = decode_property("my-app", prop).unwrap();
        match values[0].value() {
            PropertyValue::Key(k) => {
                assert_eq!(k.app_id(), "my-app");
                assert_eq!(k.namespace(), "ns");
                assert_eq!(k.string_id(), "k");
            },
            other => panic!("expected key, got {other:?}"),
        }
    }

    #[test]
    fn test_save_entity_strips_meta_properties() {
        let mut pmap = PropertyMap::new();
        pmap.set("$kind", Property::indexed("Thing"));
        pmap.set("name", Property::indexed("x"));

        let stripped = save_entity(&pmap, true).unwrap();
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].name, "name");

        assert_eq!(save_entity(&pmap, false).unwrap().len(), 2);
    }

    #[test]
    fn test_load_entity_merges_repeated_names() {
        let entity = vec![
            NativeProperty { name: "tag".into(), value: NativeValue::String("a".into()), no_index: false },
            NativeProperty { name: "empty".into(), value: NativeValue::List(vec![]), no_index: false },
            NativeProperty { name: "tag".into(), value: NativeValue::String("b".into()), no_index: false },
        ];
        let pmap = load_entity("app", entity).unwrap();

        let tags: Vec<_> = pmap.get("tag").unwrap().iter().map(|p| p.value().clone()).collect();
        assert_eq!(tags, vec![PropertyValue::from("a"), PropertyValue::from("b")]);
        assert_eq!(pmap.get("empty"), Some(&[][..]));
    }
}
