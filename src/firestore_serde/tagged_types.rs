use chrono::prelude::*;
use serde::{Deserialize, Serialize};

pub(crate) const FIRESTORE_TS_TYPE_TAG: &str = "FirestoreTimestamp";
pub(crate) const FIRESTORE_LATLNG_TYPE_TAG: &str = "FirestoreLatLng";
pub(crate) const FIRESTORE_REFERENCE_TYPE_TAG: &str = "FirestoreReference";

/// Wraps a timestamp so it serializes to the wire `timestampValue` variant.
/// The struct name doubles as the serde tag the serializer recognizes.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, PartialOrd)]
pub struct FirestoreTimestamp(pub DateTime<Utc>);

impl From<DateTime<Utc>> for FirestoreTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        FirestoreTimestamp(dt)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct FirestoreGeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct FirestoreLatLng(pub FirestoreGeoPoint);

/// Wraps a fully qualified document path so it serializes to the wire
/// `referenceValue` variant.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct FirestoreReference(pub String);

pub mod serialize_as_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_newtype_struct(super::FIRESTORE_TS_TYPE_TAG, &date)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        DateTime::<Utc>::deserialize(deserializer)
    }
}

pub mod serialize_as_optional_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(v) => serializer.serialize_newtype_struct(super::FIRESTORE_TS_TYPE_TAG, v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<DateTime<Utc>>::deserialize(deserializer)
    }
}

pub mod serialize_as_reference {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(path: &String, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_newtype_struct(super::FIRESTORE_REFERENCE_TYPE_TAG, &path)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)
    }
}
