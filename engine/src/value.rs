//! The value model.
//!
//! Every storable field holds a [`Value`]. Values are plain data: pointers
//! carry identities, never the objects they point at, so a value graph can
//! never form an ownership cycle.

use crate::{error::Result, ClassName, Error, LocalId, ObjectId};
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{ser, Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

/// Reserved key carrying the wire type tag of structured values.
pub const TYPE_KEY: &str = "__type";

/// Reserved key identifying an unsaved object inside a pointer.
pub const INTERNAL_ID_KEY: &str = "__internalId";

/// Discriminant of a [`Value`], used by field schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Map,
    Date,
    Bytes,
    GeoPoint,
    Pointer,
    Relation,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Null => "Null",
            ValueKind::Bool => "Bool",
            ValueKind::Number => "Number",
            ValueKind::String => "String",
            ValueKind::Array => "Array",
            ValueKind::Map => "Map",
            ValueKind::Date => "Date",
            ValueKind::Bytes => "Bytes",
            ValueKind::GeoPoint => "GeoPoint",
            ValueKind::Pointer => "Pointer",
            ValueKind::Relation => "Relation",
        };
        f.write_str(name)
    }
}

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point, rejecting coordinates outside [-90, 90] x [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidGeoPoint {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    fn to_json(self) -> JsonValue {
        json!({
            TYPE_KEY: "GeoPoint",
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }
}

/// A reference to an object. Owns no data.
///
/// Every pointer names its target by server identifier, by the local identity
/// of the live object it was taken from, or both.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    class_name: ClassName,
    object_id: Option<ObjectId>,
    local_id: Option<LocalId>,
}

impl Pointer {
    /// Pointer to an object known only by its server identifier.
    pub fn remote(class_name: impl Into<ClassName>, object_id: impl Into<ObjectId>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: Some(object_id.into()),
            local_id: None,
        }
    }

    /// Pointer taken from a live object.
    pub(crate) fn live(
        class_name: impl Into<ClassName>,
        object_id: Option<ObjectId>,
        local_id: LocalId,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            object_id,
            local_id: Some(local_id),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Server identifier of the target, if it had one when the pointer was taken.
    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Local identity of the live object the pointer was taken from.
    pub fn local_id(&self) -> Option<LocalId> {
        self.local_id
    }

    /// Wire form. Unsaved targets are sent by internal identifier.
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        map.insert(TYPE_KEY.into(), json!("Pointer"));
        map.insert("className".into(), json!(self.class_name));
        match (&self.object_id, self.local_id) {
            (Some(id), _) => {
                map.insert("objectId".into(), json!(id));
            }
            (None, Some(local)) => {
                map.insert(INTERNAL_ID_KEY.into(), json!(local.to_string()));
            }
            (None, None) => {}
        }
        JsonValue::Object(map)
    }
}

// Two pointers are equal when they name the same object: same server
// identifier, or same live object in this process. A pointer taken before its
// target was saved still equals one taken after.
impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        if self.class_name != other.class_name {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.object_id, &other.object_id) {
            return a == b;
        }
        matches!((self.local_id, other.local_id), (Some(a), Some(b)) if a == b)
    }
}

/// A to-many relation. Membership lives on the server; `members` only tracks
/// objects related in this process so they can be walked when saving.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    /// Class of the related objects, fixed by the first member.
    pub class_name: Option<ClassName>,
    pub members: Vec<Pointer>,
}

impl Relation {
    pub fn new(class_name: impl Into<ClassName>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            members: Vec::new(),
        }
    }

    pub fn contains(&self, pointer: &Pointer) -> bool {
        self.members.iter().any(|m| m == pointer)
    }

    pub(crate) fn insert(&mut self, pointer: Pointer) {
        if self.class_name.is_none() {
            self.class_name = Some(pointer.class_name.clone());
        }
        if !self.contains(&pointer) {
            self.members.push(pointer);
        }
    }

    pub(crate) fn remove(&mut self, pointer: &Pointer) {
        self.members.retain(|m| m != pointer);
    }
}

/// Every storable data kind.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    GeoPoint(GeoPoint),
    Pointer(Pointer),
    Relation(Relation),
}

// Structural equality. NaN equals NaN so the relation stays reflexive.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::GeoPoint(a), Value::GeoPoint(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Relation(a), Value::Relation(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Map(_) => ValueKind::Map,
            Value::Date(_) => ValueKind::Date,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::GeoPoint(_) => ValueKind::GeoPoint,
            Value::Pointer(_) => ValueKind::Pointer,
            Value::Relation(_) => ValueKind::Relation,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Value::Relation(r) => Some(r),
            _ => None,
        }
    }

    /// Wrap raw bytes.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    /// Push every pointer reachable inside this value, including relation members.
    pub fn collect_pointers<'a>(&'a self, out: &mut Vec<&'a Pointer>) {
        match self {
            Value::Pointer(p) => out.push(p),
            Value::Relation(r) => out.extend(r.members.iter()),
            Value::Array(items) => items.iter().for_each(|v| v.collect_pointers(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_pointers(out)),
            _ => {}
        }
    }

    /// Wire projection of this value.
    pub fn to_json(&self) -> JsonValue {
        match self.encode(&mut |p: &Pointer| Ok::<_, Infallible>(p.to_json())) {
            Ok(json) => json,
            Err(never) => match never {},
        }
    }

    /// Wire projection with a caller-supplied encoding for pointers.
    ///
    /// Fails with [`Error::UnsupportedNativeType`] on NaN or infinite numbers,
    /// which [`Value::to_json`] would write as `null`.
    pub fn to_json_with<F>(&self, pointer: &mut F) -> Result<JsonValue>
    where
        F: FnMut(&Pointer) -> Result<JsonValue>,
    {
        self.ensure_finite()?;
        self.encode(pointer)
    }

    /// Reject NaN and infinite numbers anywhere inside this value.
    pub fn ensure_finite(&self) -> Result<()> {
        match self {
            Value::Number(n) if !n.is_finite() => Err(Error::UnsupportedNativeType(format!(
                "non-finite number {n}"
            ))),
            Value::Array(items) => items.iter().try_for_each(Value::ensure_finite),
            Value::Map(map) => map.values().try_for_each(Value::ensure_finite),
            _ => Ok(()),
        }
    }

    fn encode<E, F>(&self, pointer: &mut F) -> std::result::Result<JsonValue, E>
    where
        F: FnMut(&Pointer) -> std::result::Result<JsonValue, E>,
    {
        Ok(match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| v.encode(pointer))
                    .collect::<std::result::Result<_, E>>()?,
            ),
            Value::Map(map) => {
                let mut out = JsonMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.encode(pointer)?);
                }
                JsonValue::Object(out)
            }
            Value::Date(date) => json!({
                TYPE_KEY: "Date",
                "iso": date.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
            Value::Bytes(data) => json!({
                TYPE_KEY: "Bytes",
                "base64": base64::engine::general_purpose::STANDARD.encode(data),
            }),
            Value::GeoPoint(point) => point.to_json(),
            Value::Pointer(p) => pointer(p)?,
            Value::Relation(r) => {
                let mut out = JsonMap::new();
                out.insert(TYPE_KEY.into(), json!("Relation"));
                if let Some(class_name) = &r.class_name {
                    out.insert("className".into(), json!(class_name));
                }
                JsonValue::Object(out)
            }
        })
    }

    /// Decode a wire document into a value.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().ok_or_else(|| {
                Error::UnsupportedNativeType(format!("number {n} is not representable"))
            })?),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(map) => match map.get(TYPE_KEY) {
                Some(JsonValue::String(tag)) => decode_tagged(tag, map)?,
                Some(other) => {
                    return Err(Error::InvalidDocument(format!(
                        "{TYPE_KEY} must be a string, got {other}"
                    )))
                }
                None => Value::Map(
                    map.iter()
                        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
                        .collect::<Result<BTreeMap<_, _>>>()?,
                ),
            },
        })
    }
}

fn number_to_json(n: f64) -> JsonValue {
    // Integral values go out as integers so `17` is not sent as `17.0`.
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return JsonValue::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn str_field<'a>(map: &'a JsonMap<String, JsonValue>, tag: &str, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::InvalidDocument(format!("{tag} is missing string field '{key}'")))
}

fn f64_field(map: &JsonMap<String, JsonValue>, tag: &str, key: &str) -> Result<f64> {
    map.get(key)
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| Error::InvalidDocument(format!("{tag} is missing number field '{key}'")))
}

/// Parse an ISO-8601 timestamp as sent by the backend.
pub fn parse_date(iso: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::InvalidDocument(format!("invalid date '{iso}': {e}")))
}

fn decode_tagged(tag: &str, map: &JsonMap<String, JsonValue>) -> Result<Value> {
    match tag {
        "Date" => Ok(Value::Date(parse_date(str_field(map, tag, "iso")?)?)),
        "Bytes" => {
            let encoded = str_field(map, tag, "base64")?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(Value::Bytes)
                .map_err(|e| Error::InvalidDocument(format!("invalid base64: {e}")))
        }
        "GeoPoint" => Ok(Value::GeoPoint(GeoPoint::new(
            f64_field(map, tag, "latitude")?,
            f64_field(map, tag, "longitude")?,
        )?)),
        // Included objects arrive as full documents; the field itself is still a pointer.
        "Pointer" | "Object" => Ok(Value::Pointer(Pointer::remote(
            str_field(map, tag, "className")?,
            str_field(map, tag, "objectId")?,
        ))),
        "Relation" => Ok(Value::Relation(Relation {
            class_name: map
                .get("className")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            members: Vec::new(),
        })),
        other => Err(Error::UnsupportedNativeType(format!(
            "unknown {TYPE_KEY} '{other}'"
        ))),
    }
}

/// Convert any serde-serializable native value.
///
/// Natives whose serialization has no JSON counterpart (maps with non-string
/// keys, NaN or infinite floats) fail with [`Error::UnsupportedNativeType`].
pub fn to_value<T: Serialize + ?Sized>(native: &T) -> Result<Value> {
    // serde_json turns non-finite floats into null, so look for them first.
    native.serialize(FiniteCheck)?;
    let json =
        serde_json::to_value(native).map_err(|e| Error::UnsupportedNativeType(e.to_string()))?;
    Value::from_json(&json)
}

/// Serializer that produces nothing and fails on the first non-finite float.
#[derive(Clone, Copy)]
struct FiniteCheck;

fn check_float(n: f64) -> Result<()> {
    Value::Number(n).ensure_finite()
}

macro_rules! accept_scalars {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _: $ty) -> Result<()> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept_scalars!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
        serialize_unit_struct(&'static str),
    );

    fn serialize_f32(self, v: f32) -> Result<()> {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<()> {
        check_float(v)
    }

    fn serialize_none(self) -> Result<()> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<()> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<()> {
        value.serialize(self)
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple(self, _: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self> {
        Ok(self)
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self> {
        Ok(self)
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _: &'static str, value: &T) -> Result<()> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

// `Vec<u8>` converts element-wise into an array like any other vector; use
// `Value::bytes` for binary data.
impl_from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Value::Date(date)
    }
}

impl From<GeoPoint> for Value {
    fn from(point: GeoPoint) -> Self {
        Value::GeoPoint(point)
    }
}

impl From<Pointer> for Value {
    fn from(pointer: Pointer) -> Self {
        Value::Pointer(pointer)
    }
}

impl From<Relation> for Value {
    fn from(relation: Relation) -> Self {
        Value::Relation(relation)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(map: HashMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
