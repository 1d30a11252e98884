use crate::errors::*;
use crate::FirestoreValue;
use rsb_derive::Builder;

/// Server-side field effect applied at commit time alongside a write.
#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreFieldTransform {
    pub field: String,
    pub transform_type: FirestoreFieldTransformType,
}

impl FirestoreFieldTransform {
    pub fn server_timestamp<S: AsRef<str>>(field: S) -> Self {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::SetToServerValue(
                FirestoreTransformServerValue::RequestTime,
            ),
        )
    }

    pub fn increment<S, V>(field: S, value: V) -> Self
    where
        S: AsRef<str>,
        V: Into<FirestoreValue>,
    {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::Increment(value.into()),
        )
    }

    pub fn maximum<S, V>(field: S, value: V) -> Self
    where
        S: AsRef<str>,
        V: Into<FirestoreValue>,
    {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::Maximum(value.into()),
        )
    }

    pub fn minimum<S, V>(field: S, value: V) -> Self
    where
        S: AsRef<str>,
        V: Into<FirestoreValue>,
    {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::Minimum(value.into()),
        )
    }

    pub fn array_union<S, I, V>(field: S, values: I) -> Self
    where
        S: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::AppendMissingElements(
                values.into_iter().map(|v| v.into()).collect(),
            ),
        )
    }

    pub fn array_remove<S, I, V>(field: S, values: I) -> Self
    where
        S: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<FirestoreValue>,
    {
        Self::new(
            field.as_ref().to_string(),
            FirestoreFieldTransformType::RemoveAllFromArray(
                values.into_iter().map(|v| v.into()).collect(),
            ),
        )
    }
}

impl TryInto<gcloud_sdk::google::firestore::v1::document_transform::FieldTransform>
    for FirestoreFieldTransform
{
    type Error = FirestoreError;

    fn try_into(
        self,
    ) -> Result<gcloud_sdk::google::firestore::v1::document_transform::FieldTransform, Self::Error>
    {
        Ok(
            gcloud_sdk::google::firestore::v1::document_transform::FieldTransform {
                field_path: self.field,
                transform_type: Some(self.transform_type.try_into()?),
            },
        )
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreFieldTransformType {
    SetToServerValue(FirestoreTransformServerValue),
    Increment(FirestoreValue),
    Maximum(FirestoreValue),
    Minimum(FirestoreValue),
    AppendMissingElements(Vec<FirestoreValue>),
    RemoveAllFromArray(Vec<FirestoreValue>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreTransformServerValue {
    Unspecified,
    RequestTime,
}

impl TryInto<gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType>
    for FirestoreFieldTransformType
{
    type Error = FirestoreError;

    fn try_into(
        self,
    ) -> Result<
        gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType,
        Self::Error,
    > {
        Ok(match self {
            FirestoreFieldTransformType::SetToServerValue(FirestoreTransformServerValue::Unspecified) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::SetToServerValue(
                    gcloud_sdk::google::firestore::v1::document_transform::field_transform::ServerValue::Unspecified as i32
                )
            },
            FirestoreFieldTransformType::SetToServerValue(FirestoreTransformServerValue::RequestTime) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::SetToServerValue(
                    gcloud_sdk::google::firestore::v1::document_transform::field_transform::ServerValue::RequestTime as i32
                )
            },
            FirestoreFieldTransformType::Increment(value) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::Increment(
                    value.value
                )
            },
            FirestoreFieldTransformType::Maximum(value) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::Maximum(
                    value.value
                )
            },
            FirestoreFieldTransformType::Minimum(value) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::Minimum(
                    value.value
                )
            },
            FirestoreFieldTransformType::AppendMissingElements(values) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::AppendMissingElements(
                    gcloud_sdk::google::firestore::v1::ArrayValue {
                        values: values.into_iter().map(|s| s.value).collect()
                    }
                )
            },
            FirestoreFieldTransformType::RemoveAllFromArray(values) => {
                gcloud_sdk::google::firestore::v1::document_transform::field_transform::TransformType::RemoveAllFromArray(
                    gcloud_sdk::google::firestore::v1::ArrayValue {
                        values: values.into_iter().map(|s| s.value).collect()
                    }
                )
            },
        })
    }
}
