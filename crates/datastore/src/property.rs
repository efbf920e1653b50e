//! Typed property values and property maps.
//!
//! A [`Property`] is a [`PropertyValue`] paired with an [`IndexSetting`]. A
//! [`PropertyMap`] maps property names to ordered value lists: a one-element
//! list is a scalar property, a longer list is a multi-valued property.
//! Multi-valued properties are always indexed by the backend, whatever the
//! per-value setting says.

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::key::Key;

/// Whether the backend should index a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexSetting {
    /// The value participates in indexes and can be queried.
    #[default]
    ShouldIndex,
    /// The value is stored but not indexed.
    NoIndex,
}

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    /// Latitude in `[-90, 90]`.
    pub lat: f64,
    /// Longitude in `[-180, 180]`.
    pub lng: f64,
}

impl GeoPoint {
    /// Returns `true` if both coordinates are in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// An opaque reference into a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey(pub String);

/// The value half of a [`Property`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte string.
    Bytes(Bytes),
    /// Timestamp, always in UTC.
    Time(DateTime<Utc>),
    /// Geographic point.
    GeoPoint(GeoPoint),
    /// Reference to another entity.
    Key(Key),
    /// Blob-store reference.
    BlobKey(BlobKey),
}

impl PropertyValue {
    /// Returns the type tag of this value.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Null => PropertyType::Null,
            Self::Bool(_) => PropertyType::Bool,
            Self::Int(_) => PropertyType::Int,
            Self::Float(_) => PropertyType::Float,
            Self::String(_) => PropertyType::String,
            Self::Bytes(_) => PropertyType::Bytes,
            Self::Time(_) => PropertyType::Time,
            Self::GeoPoint(_) => PropertyType::GeoPoint,
            Self::Key(_) => PropertyType::Key,
            Self::BlobKey(_) => PropertyType::BlobKey,
        }
    }
}

/// Type tag of a [`PropertyValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// [`PropertyValue::Null`].
    Null,
    /// [`PropertyValue::Bool`].
    Bool,
    /// [`PropertyValue::Int`].
    Int,
    /// [`PropertyValue::Float`].
    Float,
    /// [`PropertyValue::String`].
    String,
    /// [`PropertyValue::Bytes`].
    Bytes,
    /// [`PropertyValue::Time`].
    Time,
    /// [`PropertyValue::GeoPoint`].
    GeoPoint,
    /// [`PropertyValue::Key`].
    Key,
    /// [`PropertyValue::BlobKey`].
    BlobKey,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Time => "time",
            Self::GeoPoint => "geo point",
            Self::Key => "key",
            Self::BlobKey => "blob key",
        };
        f.write_str(name)
    }
}

/// A single typed value with its index setting.
///
/// # Example
///
/// ```
/// use entitystore::{IndexSetting, Property, PropertyValue};
///
/// let p = Property::unindexed("large text");
/// assert_eq!(p.value(), &PropertyValue::String("large text".into()));
/// assert_eq!(p.index_setting(), IndexSetting::NoIndex);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    value: PropertyValue,
    index: IndexSetting,
}

impl Property {
    /// Creates a property with an explicit index setting.
    pub fn new(value: impl Into<PropertyValue>, index: IndexSetting) -> Self {
        Self { value: value.into(), index }
    }

    /// Creates an indexed property.
    pub fn indexed(value: impl Into<PropertyValue>) -> Self {
        Self::new(value, IndexSetting::ShouldIndex)
    }

    /// Creates an unindexed property.
    pub fn unindexed(value: impl Into<PropertyValue>) -> Self {
        Self::new(value, IndexSetting::NoIndex)
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Consumes the property, returning its value.
    #[must_use]
    pub fn into_value(self) -> PropertyValue {
        self.value
    }

    /// Returns the index setting.
    #[must_use]
    pub fn index_setting(&self) -> IndexSetting {
        self.index
    }

    /// Returns the value's type tag.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_value!(
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    String => String,
    &str => String,
    Bytes => Bytes,
    Vec<u8> => Bytes,
    DateTime<Utc> => Time,
    GeoPoint => GeoPoint,
    Key => Key,
    BlobKey => BlobKey,
);

/// Named, ordered property lists of an entity.
///
/// Names beginning with `$` are meta properties: they describe the entity to
/// the caller and are never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyMap(BTreeMap<String, Vec<Property>>);

impl PropertyMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `name` denotes a meta property.
    #[must_use]
    pub fn is_meta(name: &str) -> bool {
        name.starts_with('$')
    }

    /// Replaces the value list stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Property>) -> Option<Vec<Property>> {
        self.0.insert(name.into(), values)
    }

    /// Sets a scalar property.
    pub fn set(&mut self, name: impl Into<String>, value: Property) {
        self.0.insert(name.into(), vec![value]);
    }

    /// Appends values to the list stored under `name`, creating it if needed.
    pub fn append(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = Property>) {
        self.0.entry(name.into()).or_default().extend(values);
    }

    /// Returns the value list stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Property]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// Returns the single value stored under `name`, if it is a scalar.
    #[must_use]
    pub fn get_scalar(&self, name: &str) -> Option<&Property> {
        match self.0.get(name).map(Vec::as_slice) {
            Some([single]) => Some(single),
            _ => None,
        }
    }

    /// Removes and returns the list stored under `name`.
    pub fn remove(&mut self, name: &str) -> Option<Vec<Property>> {
        self.0.remove(name)
    }

    /// Returns `true` if `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns the number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the map has no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates name/value-list pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Property])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl FromIterator<(String, Vec<Property>)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Property>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PropertyMap {
    type Item = (String, Vec<Property>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<Property>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions_pick_variant() {
        assert_eq!(PropertyValue::from(3i32), PropertyValue::Int(3));
        assert_eq!(PropertyValue::from("s"), PropertyValue::String("s".into()));
        assert_eq!(PropertyValue::from(vec![1u8, 2]), PropertyValue::Bytes(Bytes::from_static(&[1, 2])));
        assert_eq!(PropertyValue::from(true).property_type(), PropertyType::Bool);
    }

    #[test]
    fn test_append_builds_multi_valued_property() {
        let mut pmap = PropertyMap::new();
        pmap.append("tags", [Property::indexed("a")]);
        pmap.append("tags", [Property::indexed("b"), Property::indexed("c")]);

        let tags = pmap.get("tags").unwrap();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[1].value(), &PropertyValue::String("b".into()));
        assert!(pmap.get_scalar("tags").is_none());
    }

    #[test]
    fn test_get_scalar() {
        let mut pmap = PropertyMap::new();
        pmap.set("count", Property::indexed(7i64));
        assert_eq!(pmap.get_scalar("count").unwrap().value(), &PropertyValue::Int(7));
        assert!(pmap.get_scalar("missing").is_none());
    }

    #[test]
    fn test_meta_names() {
        assert!(PropertyMap::is_meta("$id"));
        assert!(!PropertyMap::is_meta("id"));
    }

    #[test]
    fn test_geo_point_validity() {
        assert!(GeoPoint { lat: 45.0, lng: -120.0 }.is_valid());
        assert!(!GeoPoint { lat: 95.0, lng: 0.0 }.is_valid());
    }

    #[test]
    fn test_property_type_display() {
        assert_eq!(PropertyType::GeoPoint.to_string(), "geo point");
        assert_eq!(PropertyType::BlobKey.to_string(), "blob key");
    }
}
