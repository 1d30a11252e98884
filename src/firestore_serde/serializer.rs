use crate::errors::FirestoreSerializationError;
use crate::firestore_serde::tagged_types::{
    FIRESTORE_LATLNG_TYPE_TAG, FIRESTORE_REFERENCE_TYPE_TAG, FIRESTORE_TS_TYPE_TAG,
};
use crate::{FirestoreError, FirestoreValue};
use chrono::prelude::*;
use gcloud_sdk::google::firestore::v1::{value, ArrayValue, MapValue, Value};
use serde::Serialize;
use std::collections::HashMap;

pub struct FirestoreValueSerializer {
    pub none_as_null: bool,
}

impl FirestoreValueSerializer {
    pub fn new() -> Self {
        Self {
            none_as_null: false,
        }
    }

    pub fn with_none_as_null(none_as_null: bool) -> Self {
        Self { none_as_null }
    }
}

fn serialize_err<S: AsRef<str>>(message: S) -> FirestoreError {
    FirestoreError::SerializeError(FirestoreSerializationError::from_message(message))
}

fn value_of(value_type: value::ValueType) -> FirestoreValue {
    FirestoreValue::from(Value {
        value_type: Some(value_type),
    })
}

fn absent_value() -> FirestoreValue {
    FirestoreValue::from(Value { value_type: None })
}

pub struct SerializeVec {
    none_as_null: bool,
    vec: Vec<Value>,
}

pub struct SerializeTupleVariant {
    none_as_null: bool,
    name: String,
    vec: Vec<Value>,
}

pub struct SerializeMap {
    none_as_null: bool,
    fields: HashMap<String, Value>,
    next_key: Option<String>,
}

pub struct SerializeStructVariant {
    none_as_null: bool,
    name: String,
    fields: HashMap<String, Value>,
}

impl serde::Serializer for FirestoreValueSerializer {
    type Ok = FirestoreValue;
    type Error = FirestoreError;
    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeMap;
    type SerializeStruct = SerializeMap;
    type SerializeStructVariant = SerializeStructVariant;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::BooleanValue(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::IntegerValue(v)))
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        self.serialize_i64(v.into())
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        i64::try_from(v)
            .map(|v| value_of(value::ValueType::IntegerValue(v)))
            .map_err(|_| serialize_err(format!("Integer value is out of int64 range: {v}")))
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        self.serialize_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::DoubleValue(v)))
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::StringValue(v.to_string())))
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::StringValue(v.to_string())))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::BytesValue(v.to_vec())))
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        if self.none_as_null {
            Ok(value_of(value::ValueType::NullValue(0)))
        } else {
            Ok(absent_value())
        }
    }

    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::NullValue(0)))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        match name {
            FIRESTORE_TS_TYPE_TAG => {
                let inner = value.serialize(FirestoreValueSerializer::with_none_as_null(
                    self.none_as_null,
                ))?;
                tagged_timestamp(inner)
            }
            FIRESTORE_REFERENCE_TYPE_TAG => {
                let inner = value.serialize(FirestoreValueSerializer::with_none_as_null(
                    self.none_as_null,
                ))?;
                tagged_reference(inner)
            }
            FIRESTORE_LATLNG_TYPE_TAG => {
                let inner = value.serialize(FirestoreValueSerializer::with_none_as_null(
                    self.none_as_null,
                ))?;
                tagged_latlng(inner)
            }
            _ => value.serialize(self),
        }
    }

    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Self::Ok, Self::Error>
    where
        T: Serialize,
    {
        let inner =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        let mut fields = HashMap::with_capacity(1);
        if inner.value.value_type.is_some() {
            fields.insert(variant.to_string(), inner.value);
        }
        Ok(value_of(value::ValueType::MapValue(MapValue { fields })))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SerializeVec {
            none_as_null: self.none_as_null,
            vec: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(SerializeTupleVariant {
            none_as_null: self.none_as_null,
            name: variant.to_string(),
            vec: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(SerializeMap {
            none_as_null: self.none_as_null,
            fields: HashMap::with_capacity(len.unwrap_or(0)),
            next_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(SerializeStructVariant {
            none_as_null: self.none_as_null,
            name: variant.to_string(),
            fields: HashMap::with_capacity(len),
        })
    }
}

fn tagged_timestamp(inner: FirestoreValue) -> Result<FirestoreValue, FirestoreError> {
    match inner.value.value_type {
        Some(value::ValueType::StringValue(s)) => {
            let dt = s.parse::<DateTime<Utc>>()?;
            Ok(value_of(value::ValueType::TimestampValue(
                crate::timestamp_utils::to_timestamp(dt),
            )))
        }
        Some(value::ValueType::TimestampValue(ts)) => {
            Ok(value_of(value::ValueType::TimestampValue(ts)))
        }
        None => Ok(absent_value()),
        Some(value::ValueType::NullValue(v)) => Ok(value_of(value::ValueType::NullValue(v))),
        other => Err(serialize_err(format!(
            "Timestamp fields must serialize as RFC 3339 strings, got: {other:?}"
        ))),
    }
}

fn tagged_reference(inner: FirestoreValue) -> Result<FirestoreValue, FirestoreError> {
    match inner.value.value_type {
        Some(value::ValueType::StringValue(s)) => {
            Ok(value_of(value::ValueType::ReferenceValue(s)))
        }
        None => Ok(absent_value()),
        Some(value::ValueType::NullValue(v)) => Ok(value_of(value::ValueType::NullValue(v))),
        other => Err(serialize_err(format!(
            "Reference fields must serialize as document path strings, got: {other:?}"
        ))),
    }
}

fn tagged_latlng(inner: FirestoreValue) -> Result<FirestoreValue, FirestoreError> {
    match inner.value.value_type {
        Some(value::ValueType::MapValue(map_value)) => {
            let latitude = double_field(&map_value.fields, "latitude");
            let longitude = double_field(&map_value.fields, "longitude");
            match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => {
                    Ok(value_of(value::ValueType::GeoPointValue(
                        gcloud_sdk::google::r#type::LatLng {
                            latitude,
                            longitude,
                        },
                    )))
                }
                _ => Err(serialize_err(
                    "LatLng fields must carry numeric latitude and longitude",
                )),
            }
        }
        None => Ok(absent_value()),
        Some(value::ValueType::NullValue(v)) => Ok(value_of(value::ValueType::NullValue(v))),
        other => Err(serialize_err(format!(
            "LatLng fields must serialize as structures, got: {other:?}"
        ))),
    }
}

fn double_field(fields: &HashMap<String, Value>, name: &str) -> Option<f64> {
    match fields.get(name).and_then(|v| v.value_type.as_ref()) {
        Some(value::ValueType::DoubleValue(v)) => Some(*v),
        Some(value::ValueType::IntegerValue(v)) => Some(*v as f64),
        _ => None,
    }
}

impl serde::ser::SerializeSeq for SerializeVec {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let serialized =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        // Absent markers inside arrays still occupy a position
        self.vec.push(match serialized.value.value_type {
            Some(_) => serialized.value,
            None => Value {
                value_type: Some(value::ValueType::NullValue(0)),
            },
        });
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::ArrayValue(ArrayValue {
            values: self.vec,
        })))
    }
}

impl serde::ser::SerializeTuple for SerializeVec {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_element<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        serde::ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        serde::ser::SerializeSeq::end(self)
    }
}

impl serde::ser::SerializeTupleStruct for SerializeVec {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        serde::ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        serde::ser::SerializeSeq::end(self)
    }
}

impl serde::ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_field<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let serialized =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        self.vec.push(match serialized.value.value_type {
            Some(_) => serialized.value,
            None => Value {
                value_type: Some(value::ValueType::NullValue(0)),
            },
        });
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        let mut fields = HashMap::with_capacity(1);
        fields.insert(
            self.name,
            Value {
                value_type: Some(value::ValueType::ArrayValue(ArrayValue { values: self.vec })),
            },
        );
        Ok(value_of(value::ValueType::MapValue(MapValue { fields })))
    }
}

impl serde::ser::SerializeMap for SerializeMap {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_key<T: ?Sized>(&mut self, key: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let serialized =
            key.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        match serialized.value.value_type {
            Some(value::ValueType::StringValue(s)) => {
                self.next_key = Some(s);
                Ok(())
            }
            other => Err(serialize_err(format!(
                "Map keys must be strings, got: {other:?}"
            ))),
        }
    }

    fn serialize_value<T: ?Sized>(&mut self, value: &T) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let key = self.next_key.take().ok_or_else(|| {
            serialize_err("Map value serialized without a preceding key")
        })?;
        let serialized =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        if serialized.value.value_type.is_some() {
            self.fields.insert(key, serialized.value);
        }
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::MapValue(MapValue {
            fields: self.fields,
        })))
    }
}

impl serde::ser::SerializeStruct for SerializeMap {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let serialized =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        if serialized.value.value_type.is_some() {
            self.fields.insert(key.to_string(), serialized.value);
        }
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(value_of(value::ValueType::MapValue(MapValue {
            fields: self.fields,
        })))
    }
}

impl serde::ser::SerializeStructVariant for SerializeStructVariant {
    type Ok = FirestoreValue;
    type Error = FirestoreError;

    fn serialize_field<T: ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Self::Error>
    where
        T: Serialize,
    {
        let serialized =
            value.serialize(FirestoreValueSerializer::with_none_as_null(self.none_as_null))?;
        if serialized.value.value_type.is_some() {
            self.fields.insert(key.to_string(), serialized.value);
        }
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        let mut fields = HashMap::with_capacity(1);
        fields.insert(
            self.name,
            Value {
                value_type: Some(value::ValueType::MapValue(MapValue {
                    fields: self.fields,
                })),
            },
        );
        Ok(value_of(value::ValueType::MapValue(MapValue { fields })))
    }
}
