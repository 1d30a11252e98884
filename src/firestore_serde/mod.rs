//! Serde bridge between host structures and the wire `Value`/`Document`
//! types. Encoding goes through [`FirestoreValueSerializer`], decoding through
//! a deserializer over wire values. Timestamps, geo points and document
//! references ride through serde as tagged newtypes so they land on the right
//! wire variants instead of plain strings.

mod serializer;
pub use serializer::*;

mod deserializer;
pub use deserializer::*;

mod tagged_types;
pub use tagged_types::*;

use crate::{FirestoreError, FirestoreResult};
use gcloud_sdk::google::firestore::v1::{value, Document, Value};
use serde::{Deserialize, Serialize};

pub fn firestore_document_from_serializable<S, T>(
    document_path: S,
    object: &T,
) -> FirestoreResult<Document>
where
    S: AsRef<str>,
    T: Serialize,
{
    let serialized = object.serialize(FirestoreValueSerializer::new())?;

    match serialized.value.value_type {
        Some(value::ValueType::MapValue(map_value)) => Ok(Document {
            name: document_path.as_ref().to_string(),
            fields: map_value.fields,
            create_time: None,
            update_time: None,
        }),
        _ => Err(FirestoreError::SerializeError(
            crate::errors::FirestoreSerializationError::from_message(
                "Document root must serialize to a map of fields",
            ),
        )),
    }
}

pub fn firestore_document_from_map<S, I, IS>(
    document_path: S,
    fields: I,
) -> FirestoreResult<Document>
where
    S: AsRef<str>,
    I: IntoIterator<Item = (IS, crate::FirestoreValue)>,
    IS: AsRef<str>,
{
    Ok(Document {
        name: document_path.as_ref().to_string(),
        fields: fields
            .into_iter()
            .filter(|(_, value)| value.value.value_type.is_some())
            .map(|(name, value)| (name.as_ref().to_string(), value.value))
            .collect(),
        create_time: None,
        update_time: None,
    })
}

pub fn firestore_document_to_serializable<T>(document: &Document) -> FirestoreResult<T>
where
    for<'de> T: Deserialize<'de>,
{
    let root = Value {
        value_type: Some(value::ValueType::MapValue(
            gcloud_sdk::google::firestore::v1::MapValue {
                fields: document.fields.clone(),
            },
        )),
    };
    T::deserialize(FirestoreValueDeserializer::new(root))
}
