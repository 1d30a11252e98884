use crate::firestore_serde::FirestoreValueSerializer;
use gcloud_sdk::google::firestore::v1::{value, Value};
use serde::Serialize;
use std::cmp::Ordering;

/// A thin wrapper around the wire `Value` sum type. Host values convert in
/// through the crate serializer, so `42.into()` or `"abc".into()` produce
/// the right wire variants.
#[derive(Debug, PartialEq, Clone)]
pub struct FirestoreValue {
    pub value: Value,
}

impl FirestoreValue {
    pub fn from(value: Value) -> Self {
        Self { value }
    }

    /// Compares two values in Firestore's canonical cross-type order:
    /// null < bool < number (NaN first) < timestamp < string < bytes <
    /// reference < geopoint < array < map.
    pub fn canonical_cmp(&self, other: &FirestoreValue) -> Ordering {
        compare_values(&self.value, &other.value)
    }
}

impl<T> std::convert::From<T> for FirestoreValue
where
    T: Serialize,
{
    fn from(value: T) -> Self {
        let serializer = FirestoreValueSerializer::new();
        value
            .serialize(serializer)
            .unwrap_or_else(|_| FirestoreValue::from(Value { value_type: None }))
    }
}

fn type_order(value: &Value) -> u8 {
    match value.value_type {
        Some(value::ValueType::NullValue(_)) | None => 0,
        Some(value::ValueType::BooleanValue(_)) => 1,
        Some(value::ValueType::IntegerValue(_)) | Some(value::ValueType::DoubleValue(_)) => 2,
        Some(value::ValueType::TimestampValue(_)) => 3,
        Some(value::ValueType::StringValue(_)) => 4,
        Some(value::ValueType::BytesValue(_)) => 5,
        Some(value::ValueType::ReferenceValue(_)) => 6,
        Some(value::ValueType::GeoPointValue(_)) => 7,
        Some(value::ValueType::ArrayValue(_)) => 8,
        Some(value::ValueType::MapValue(_)) => 9,
        Some(value::ValueType::FieldReferenceValue(_))
        | Some(value::ValueType::FunctionValue(_))
        | Some(value::ValueType::PipelineValue(_)) => 10,
    }
}

pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    let left_order = type_order(left);
    let right_order = type_order(right);
    if left_order != right_order {
        return left_order.cmp(&right_order);
    }

    use value::ValueType::*;
    match (&left.value_type, &right.value_type) {
        (Some(NullValue(_)), Some(NullValue(_))) | (None, None) => Ordering::Equal,
        (Some(BooleanValue(a)), Some(BooleanValue(b))) => a.cmp(b),
        (Some(TimestampValue(a)), Some(TimestampValue(b))) => {
            (a.seconds, a.nanos).cmp(&(b.seconds, b.nanos))
        }
        (Some(StringValue(a)), Some(StringValue(b))) => a.cmp(b),
        (Some(BytesValue(a)), Some(BytesValue(b))) => a.cmp(b),
        (Some(ReferenceValue(a)), Some(ReferenceValue(b))) => {
            // Resource paths order segment-wise, not by the raw string
            a.split('/').cmp(b.split('/'))
        }
        (Some(GeoPointValue(a)), Some(GeoPointValue(b))) => compare_doubles(a.latitude, b.latitude)
            .then_with(|| compare_doubles(a.longitude, b.longitude)),
        (Some(ArrayValue(a)), Some(ArrayValue(b))) => {
            for (av, bv) in a.values.iter().zip(b.values.iter()) {
                let cmp = compare_values(av, bv);
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            a.values.len().cmp(&b.values.len())
        }
        (Some(MapValue(a)), Some(MapValue(b))) => {
            let mut a_entries: Vec<_> = a.fields.iter().collect();
            let mut b_entries: Vec<_> = b.fields.iter().collect();
            a_entries.sort_by(|(ka, _), (kb, _)| ka.cmp(kb));
            b_entries.sort_by(|(ka, _), (kb, _)| ka.cmp(kb));
            for ((ak, av), (bk, bv)) in a_entries.iter().zip(b_entries.iter()) {
                let key_cmp = ak.cmp(bk);
                if key_cmp != Ordering::Equal {
                    return key_cmp;
                }
                let value_cmp = compare_values(av, bv);
                if value_cmp != Ordering::Equal {
                    return value_cmp;
                }
            }
            a_entries.len().cmp(&b_entries.len())
        }
        (a, b) => {
            let left_num = numeric_value(a);
            let right_num = numeric_value(b);
            match (left_num, right_num) {
                (Some(a), Some(b)) => compare_doubles(a, b),
                _ => Ordering::Equal,
            }
        }
    }
}

fn numeric_value(value_type: &Option<value::ValueType>) -> Option<f64> {
    match value_type {
        Some(value::ValueType::IntegerValue(v)) => Some(*v as f64),
        Some(value::ValueType::DoubleValue(v)) => Some(*v),
        _ => None,
    }
}

// NaN sorts before every other number
fn compare_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcloud_sdk::google::firestore::v1::ArrayValue;

    fn val(value_type: value::ValueType) -> Value {
        Value {
            value_type: Some(value_type),
        }
    }

    #[test]
    fn test_cross_type_rank() {
        let ordered = vec![
            val(value::ValueType::NullValue(0)),
            val(value::ValueType::BooleanValue(true)),
            val(value::ValueType::DoubleValue(f64::NAN)),
            val(value::ValueType::IntegerValue(1)),
            val(value::ValueType::TimestampValue(
                gcloud_sdk::prost_types::Timestamp {
                    seconds: 1,
                    nanos: 0,
                },
            )),
            val(value::ValueType::StringValue("a".into())),
            val(value::ValueType::BytesValue(vec![0u8])),
            val(value::ValueType::ReferenceValue("p/d".into())),
            val(value::ValueType::GeoPointValue(
                gcloud_sdk::google::r#type::LatLng {
                    latitude: 0.0,
                    longitude: 0.0,
                },
            )),
            val(value::ValueType::ArrayValue(ArrayValue { values: vec![] })),
            val(value::ValueType::MapValue(
                gcloud_sdk::google::firestore::v1::MapValue {
                    fields: Default::default(),
                },
            )),
        ];

        for window in ordered.windows(2) {
            assert_eq!(
                compare_values(&window[0], &window[1]),
                Ordering::Less,
                "{:?} should sort before {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_integer_double_unified_order() {
        let int_two = val(value::ValueType::IntegerValue(2));
        let double_one_five = val(value::ValueType::DoubleValue(1.5));
        assert_eq!(compare_values(&double_one_five, &int_two), Ordering::Less);
    }

    #[test]
    fn test_reference_segment_order() {
        let a = val(value::ValueType::ReferenceValue("col/a/sub/x".into()));
        let b = val(value::ValueType::ReferenceValue("col/a!b".into()));
        // "a" is a shorter segment prefix than "a!b" so the nested path wins
        assert_eq!(compare_values(&a, &b), Ordering::Less);
    }
}
