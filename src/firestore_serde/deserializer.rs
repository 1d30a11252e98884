use crate::errors::FirestoreSerializationError;
use crate::timestamp_utils::from_timestamp;
use crate::FirestoreError;
use chrono::SecondsFormat;
use gcloud_sdk::google::firestore::v1::{value, Value};
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{DeserializeSeed, EnumAccess, IntoDeserializer, VariantAccess, Visitor};
use serde::forward_to_deserialize_any;

/// Drives `serde::Deserialize` from an owned wire value.
pub struct FirestoreValueDeserializer {
    value: Value,
}

impl FirestoreValueDeserializer {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

fn deserialize_err<S: AsRef<str>>(message: S) -> FirestoreError {
    FirestoreError::DeserializeError(FirestoreSerializationError::from_message(message))
}

impl<'de> serde::Deserializer<'de> for FirestoreValueDeserializer {
    type Error = FirestoreError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value.value_type {
            None | Some(value::ValueType::NullValue(_)) => visitor.visit_unit(),
            Some(value::ValueType::BooleanValue(v)) => visitor.visit_bool(v),
            Some(value::ValueType::IntegerValue(v)) => visitor.visit_i64(v),
            Some(value::ValueType::DoubleValue(v)) => visitor.visit_f64(v),
            Some(value::ValueType::TimestampValue(ts)) => visitor.visit_string(
                from_timestamp(ts)?.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            Some(value::ValueType::StringValue(s)) => visitor.visit_string(s),
            Some(value::ValueType::BytesValue(b)) => visitor.visit_byte_buf(b),
            Some(value::ValueType::ReferenceValue(r)) => visitor.visit_string(r),
            Some(value::ValueType::GeoPointValue(latlng)) => visitor.visit_map(
                MapDeserializer::new(
                    [
                        ("latitude", latlng.latitude),
                        ("longitude", latlng.longitude),
                    ]
                    .into_iter(),
                ),
            ),
            Some(value::ValueType::ArrayValue(array)) => visitor.visit_seq(SeqDeserializer::new(
                array.values.into_iter().map(FirestoreValueDeserializer::new),
            )),
            Some(value::ValueType::MapValue(map)) => visitor.visit_map(MapDeserializer::new(
                map.fields
                    .into_iter()
                    .map(|(name, value)| (name, FirestoreValueDeserializer::new(value))),
            )),
            other => Err(deserialize_err(format!(
                "Unsupported Firestore value type: {other:?}"
            ))),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value.value_type {
            None | Some(value::ValueType::NullValue(_)) => visitor.visit_none(),
            Some(_) => visitor.visit_some(self),
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.value.value_type {
            Some(value::ValueType::StringValue(s)) => {
                visitor.visit_enum(s.into_deserializer())
            }
            Some(value::ValueType::MapValue(map)) if map.fields.len() == 1 => {
                let (variant, value) = map
                    .fields
                    .into_iter()
                    .next()
                    .expect("single-entry map has an entry");
                visitor.visit_enum(FirestoreEnumDeserializer { variant, value })
            }
            other => Err(deserialize_err(format!(
                "Enums decode from strings or single-entry maps, got: {other:?}"
            ))),
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

impl<'de> IntoDeserializer<'de, FirestoreError> for FirestoreValueDeserializer {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

struct FirestoreEnumDeserializer {
    variant: String,
    value: Value,
}

impl<'de> EnumAccess<'de> for FirestoreEnumDeserializer {
    type Error = FirestoreError;
    type Variant = FirestoreVariantDeserializer;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant), Self::Error>
    where
        V: DeserializeSeed<'de>,
    {
        let variant =
            seed.deserialize(IntoDeserializer::<FirestoreError>::into_deserializer(
                self.variant,
            ))?;
        Ok((variant, FirestoreVariantDeserializer { value: self.value }))
    }
}

struct FirestoreVariantDeserializer {
    value: Value,
}

impl<'de> VariantAccess<'de> for FirestoreVariantDeserializer {
    type Error = FirestoreError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value, Self::Error>
    where
        T: DeserializeSeed<'de>,
    {
        seed.deserialize(FirestoreValueDeserializer::new(self.value))
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        serde::Deserializer::deserialize_any(FirestoreValueDeserializer::new(self.value), visitor)
    }

    fn struct_variant<V>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        serde::Deserializer::deserialize_any(FirestoreValueDeserializer::new(self.value), visitor)
    }
}
