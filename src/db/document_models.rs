use crate::db::safe_document_path;
use crate::timestamp_utils::from_timestamp;
use crate::*;
use chrono::prelude::*;
use gcloud_sdk::google::firestore::v1::*;
use rsb_derive::Builder;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// A read document (or its absence) together with the time it was read.
/// `exists` holds exactly when fields are present.
#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreDocumentSnapshot {
    pub document_path: String,
    pub document: Option<Document>,
    pub read_time: Option<DateTime<Utc>>,
}

impl FirestoreDocumentSnapshot {
    pub fn from_found(document: Document, read_time: Option<DateTime<Utc>>) -> Self {
        Self {
            document_path: document.name.clone(),
            document: Some(document),
            read_time,
        }
    }

    pub fn from_missing<S: Into<String>>(
        document_path: S,
        read_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            document_path: document_path.into(),
            document: None,
            read_time,
        }
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.document.is_some()
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        crate::db::split_document_path(self.document_path.as_str()).1
    }

    pub fn create_time(&self) -> FirestoreResult<Option<DateTime<Utc>>> {
        self.document
            .as_ref()
            .and_then(|doc| doc.create_time.clone())
            .map(from_timestamp)
            .transpose()
    }

    pub fn update_time(&self) -> FirestoreResult<Option<DateTime<Utc>>> {
        self.document
            .as_ref()
            .and_then(|doc| doc.update_time.clone())
            .map(from_timestamp)
            .transpose()
    }

    /// Field access by dotted path.
    pub fn get_field(&self, field_path: &str) -> Option<FirestoreValue> {
        let document = self.document.as_ref()?;
        let mut segments = field_path.split('.');
        let mut current = document.fields.get(segments.next()?)?.clone();
        for segment in segments {
            match current.value_type {
                Some(value::ValueType::MapValue(map_value)) => {
                    current = map_value.fields.get(segment)?.clone();
                }
                _ => return None,
            }
        }
        Some(FirestoreValue::from(current))
    }

    pub fn obj<T>(&self) -> FirestoreResult<Option<T>>
    where
        for<'de> T: serde::Deserialize<'de>,
    {
        self.document
            .as_ref()
            .map(|doc| FirestoreDb::deserialize_doc_to(doc))
            .transpose()
    }

    pub fn obj_with<C>(&self, converter: &C) -> FirestoreResult<Option<C::Item>>
    where
        C: FirestoreDocumentConverter,
    {
        self.document
            .as_ref()
            .map(|doc| converter.from_document(doc))
            .transpose()
    }
}

/// User-supplied mapping between documents and a host type. The serde-based
/// [`FirestoreSerdeConverter`] is the usual implementation; a custom one can
/// rename fields or derive values the stored form does not carry.
pub trait FirestoreDocumentConverter {
    type Item;

    fn from_document(&self, document: &Document) -> FirestoreResult<Self::Item>;

    fn to_fields(&self, item: &Self::Item) -> FirestoreResult<FirestoreFields>;
}

pub struct FirestoreSerdeConverter<T> {
    _marker: PhantomData<T>,
}

impl<T> FirestoreSerdeConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> FirestoreDocumentConverter for FirestoreSerdeConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    type Item = T;

    fn from_document(&self, document: &Document) -> FirestoreResult<T> {
        FirestoreDb::deserialize_doc_to(document)
    }

    fn to_fields(&self, item: &T) -> FirestoreResult<FirestoreFields> {
        firestore_fields_from_serializable(item)
    }
}

impl FirestoreDb {
    /// Reads one document as a snapshot, carrying the server read time and
    /// existence information instead of failing on a missing document.
    pub async fn get_doc_snapshot<S>(
        &self,
        collection_id: &str,
        document_id: S,
    ) -> FirestoreResult<FirestoreDocumentSnapshot>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        let mut snapshots = self.batch_get_doc_snapshots(vec![document_path]).await?;
        snapshots.pop().ok_or_else(|| {
            crate::errors::invalid_argument("document_id", "Empty batch get response")
        })
    }

    /// Reads many documents as snapshots in the server's response order.
    pub async fn batch_get_doc_snapshots(
        &self,
        full_doc_paths: Vec<String>,
    ) -> FirestoreResult<Vec<FirestoreDocumentSnapshot>> {
        use futures::TryStreamExt;

        let request = gcloud_sdk::tonic::Request::new(BatchGetDocumentsRequest {
            database: self.get_database_path().clone(),
            documents: full_doc_paths,
            consistency_selector: self
                .get_session_params()
                .consistency_selector
                .as_ref()
                .map(|selector| selector.try_into())
                .transpose()?,
            mask: None,
        });

        let responses: Vec<BatchGetDocumentsResponse> = self
            .client()
            .get()
            .batch_get_documents(request)
            .await
            .map_err(FirestoreError::from)?
            .into_inner()
            .map_err(FirestoreError::from)
            .try_collect()
            .await?;

        let mut snapshots = Vec::with_capacity(responses.len());
        for response in responses {
            let read_time = response.read_time.map(from_timestamp).transpose()?;
            match response.result {
                Some(batch_get_documents_response::Result::Found(document)) => {
                    snapshots.push(FirestoreDocumentSnapshot::from_found(document, read_time));
                }
                Some(batch_get_documents_response::Result::Missing(full_doc_id)) => {
                    snapshots.push(FirestoreDocumentSnapshot::from_missing(
                        full_doc_id,
                        read_time,
                    ));
                }
                None => {}
            }
        }

        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn city_doc() -> Document {
        let mut address_fields = HashMap::new();
        address_fields.insert(
            "city".to_string(),
            Value {
                value_type: Some(value::ValueType::StringValue("SF".to_string())),
            },
        );
        let mut fields = HashMap::new();
        fields.insert(
            "address".to_string(),
            Value {
                value_type: Some(value::ValueType::MapValue(MapValue {
                    fields: address_fields,
                })),
            },
        );
        Document {
            name: "projects/p/databases/(default)/documents/cities/SF".to_string(),
            fields,
            create_time: None,
            update_time: None,
        }
    }

    #[test]
    fn test_snapshot_exists_iff_document_present() {
        let found = FirestoreDocumentSnapshot::from_found(city_doc(), None);
        assert!(found.exists());
        assert_eq!(found.id(), "SF");

        let missing = FirestoreDocumentSnapshot::from_missing(
            "projects/p/databases/(default)/documents/cities/LA",
            None,
        );
        assert!(!missing.exists());
        assert_eq!(missing.id(), "LA");
        assert!(missing.get_field("address").is_none());
    }

    #[test]
    fn test_serde_converter_roundtrip() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Address {
            city: String,
        }
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct City {
            address: Address,
        }

        let converter = FirestoreSerdeConverter::<City>::new();
        let snapshot = FirestoreDocumentSnapshot::from_found(city_doc(), None);
        let city = snapshot.obj_with(&converter).unwrap().unwrap();
        assert_eq!(city.address.city, "SF");

        let fields = converter.to_fields(&city).unwrap();
        assert!(fields.contains_key("address"));
    }

    #[test]
    fn test_snapshot_dotted_field_access() {
        let snapshot = FirestoreDocumentSnapshot::from_found(city_doc(), None);
        let city = snapshot.get_field("address.city").unwrap();
        assert!(matches!(
            city.value.value_type,
            Some(value::ValueType::StringValue(ref s)) if s == "SF"
        ));
        assert!(snapshot.get_field("address.missing").is_none());
    }
}
