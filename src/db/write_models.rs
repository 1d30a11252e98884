use crate::errors::invalid_argument;
use crate::resource_path::escape_field_segment;
use crate::timestamp_utils::from_timestamp;
use crate::{
    FirestoreError, FirestoreFieldPath, FirestoreFieldTransform, FirestoreFieldTransformType,
    FirestoreResult, FirestoreValue, FirestoreWritePrecondition,
};
use chrono::prelude::*;
use gcloud_sdk::google::firestore::v1::{value, Document, DocumentMask, MapValue, Value, Write};
use rsb_derive::Builder;
use serde::Serialize;
use std::collections::HashMap;

pub type FirestoreFields = HashMap<String, Value>;

/// Serializes a host structure into a wire field map, ready to be attached to
/// a write operation.
pub fn firestore_fields_from_serializable<T>(object: &T) -> FirestoreResult<FirestoreFields>
where
    T: Serialize,
{
    let doc = crate::firestore_serde::firestore_document_from_serializable("", object)?;
    Ok(doc.fields)
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreWriteResult {
    pub update_time: Option<DateTime<Utc>>,
    pub transform_results: Vec<FirestoreValue>,
}

impl TryInto<FirestoreWriteResult> for gcloud_sdk::google::firestore::v1::WriteResult {
    type Error = FirestoreError;

    fn try_into(self) -> Result<FirestoreWriteResult, Self::Error> {
        Ok(FirestoreWriteResult::new(
            self.transform_results
                .into_iter()
                .map(FirestoreValue::from)
                .collect(),
        )
        .opt_update_time(self.update_time.map(from_timestamp).transpose()?))
    }
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreCommitResponse {
    pub write_results: Vec<FirestoreWriteResult>,
    pub commit_time: Option<DateTime<Utc>>,
}

impl TryFrom<gcloud_sdk::google::firestore::v1::CommitResponse> for FirestoreCommitResponse {
    type Error = FirestoreError;

    fn try_from(
        response: gcloud_sdk::google::firestore::v1::CommitResponse,
    ) -> Result<Self, Self::Error> {
        Ok(FirestoreCommitResponse::new(
            response
                .write_results
                .into_iter()
                .map(|s| s.try_into())
                .collect::<FirestoreResult<Vec<FirestoreWriteResult>>>()?,
        )
        .opt_commit_time(response.commit_time.map(from_timestamp).transpose()?))
    }
}

/// How a `Set` treats fields already present on the server.
#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreSetMode {
    /// Replace the whole document.
    Replace,
    /// Merge every field present in the input; everything else survives.
    Merge,
    /// Merge only the named paths; other input fields are dropped.
    MergeFields(Vec<FirestoreFieldPath>),
}

/// One entry of an update map: a concrete value, a server-side transform, or
/// the delete-field sentinel.
#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreUpdateValue {
    Value(FirestoreValue),
    Transform(FirestoreFieldTransformType),
    Delete,
}

impl FirestoreUpdateValue {
    pub fn value<V>(value: V) -> Self
    where
        V: Into<FirestoreValue>,
    {
        FirestoreUpdateValue::Value(value.into())
    }
}

/// The write sum type. Encoding to the wire `Write` follows the commit
/// protocol: `Create` guards on non-existence, merges compute their masks
/// from the typed input, update maps may carry transforms and delete
/// sentinels, deletes are bare.
#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreWrite {
    Create {
        document_path: String,
        fields: FirestoreFields,
        transforms: Vec<FirestoreFieldTransform>,
    },
    Set {
        document_path: String,
        fields: FirestoreFields,
        mode: FirestoreSetMode,
        transforms: Vec<FirestoreFieldTransform>,
    },
    Update {
        document_path: String,
        field_values: Vec<(FirestoreFieldPath, FirestoreUpdateValue)>,
        precondition: Option<FirestoreWritePrecondition>,
    },
    Delete {
        document_path: String,
        precondition: Option<FirestoreWritePrecondition>,
    },
}

impl FirestoreWrite {
    pub fn document_path(&self) -> &str {
        match self {
            FirestoreWrite::Create { document_path, .. } => document_path,
            FirestoreWrite::Set { document_path, .. } => document_path,
            FirestoreWrite::Update { document_path, .. } => document_path,
            FirestoreWrite::Delete { document_path, .. } => document_path,
        }
    }
}

impl TryInto<Write> for FirestoreWrite {
    type Error = FirestoreError;

    fn try_into(self) -> Result<Write, Self::Error> {
        match self {
            FirestoreWrite::Create {
                document_path,
                fields,
                transforms,
            } => Ok(Write {
                update_mask: None,
                update_transforms: encode_transforms(transforms)?,
                current_document: Some(FirestoreWritePrecondition::Exists(false).try_into()?),
                operation: Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(
                    document_of(document_path, fields),
                )),
            }),
            FirestoreWrite::Set {
                document_path,
                fields,
                mode,
                transforms,
            } => match mode {
                FirestoreSetMode::Replace => Ok(Write {
                    update_mask: None,
                    update_transforms: encode_transforms(transforms)?,
                    current_document: None,
                    operation: Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(
                        document_of(document_path, fields),
                    )),
                }),
                FirestoreSetMode::Merge => {
                    let mask = leaf_field_paths(&fields);
                    Ok(Write {
                        update_mask: Some(DocumentMask { field_paths: mask }),
                        update_transforms: encode_transforms(transforms)?,
                        current_document: None,
                        operation: Some(
                            gcloud_sdk::google::firestore::v1::write::Operation::Update(
                                document_of(document_path, fields),
                            ),
                        ),
                    })
                }
                FirestoreSetMode::MergeFields(merge_paths) => {
                    let pruned = prune_fields(&fields, &merge_paths)?;
                    let retained_transforms: Vec<FirestoreFieldTransform> = transforms
                        .into_iter()
                        .filter(|t| {
                            merge_paths.iter().any(|p| path_covers(p, t.field.as_str()))
                        })
                        .collect();
                    let mut mask: Vec<String> =
                        merge_paths.iter().map(|p| p.encoded()).collect();
                    mask.sort();
                    Ok(Write {
                        update_mask: Some(DocumentMask { field_paths: mask }),
                        update_transforms: encode_transforms(retained_transforms)?,
                        current_document: None,
                        operation: Some(
                            gcloud_sdk::google::firestore::v1::write::Operation::Update(
                                document_of(document_path, pruned),
                            ),
                        ),
                    })
                }
            },
            FirestoreWrite::Update {
                document_path,
                field_values,
                precondition,
            } => {
                let mut mask: Vec<String> = Vec::with_capacity(field_values.len());
                let mut transforms: Vec<
                    gcloud_sdk::google::firestore::v1::document_transform::FieldTransform,
                > = Vec::new();
                let mut value_entries: Vec<(FirestoreFieldPath, Value)> = Vec::new();

                for (path, update_value) in field_values {
                    mask.push(path.encoded());
                    match update_value {
                        FirestoreUpdateValue::Value(value) => {
                            value_entries.push((path, value.value));
                        }
                        FirestoreUpdateValue::Transform(transform_type) => {
                            transforms.push(
                                FirestoreFieldTransform::new(path.encoded(), transform_type)
                                    .try_into()?,
                            );
                        }
                        // The delete sentinel lives in the mask only
                        FirestoreUpdateValue::Delete => {}
                    }
                }

                let fields = expand_field_entries(value_entries);

                Ok(Write {
                    update_mask: Some(DocumentMask { field_paths: mask }),
                    update_transforms: transforms,
                    current_document: Some(
                        precondition
                            .unwrap_or(FirestoreWritePrecondition::Exists(true))
                            .try_into()?,
                    ),
                    operation: Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(
                        document_of(document_path, fields),
                    )),
                })
            }
            FirestoreWrite::Delete {
                document_path,
                precondition,
            } => Ok(Write {
                update_mask: None,
                update_transforms: vec![],
                current_document: precondition.map(|cond| cond.try_into()).transpose()?,
                operation: Some(gcloud_sdk::google::firestore::v1::write::Operation::Delete(
                    document_path,
                )),
            }),
        }
    }
}

fn document_of(document_path: String, fields: FirestoreFields) -> Document {
    Document {
        name: document_path,
        fields,
        create_time: None,
        update_time: None,
    }
}

fn encode_transforms(
    transforms: Vec<FirestoreFieldTransform>,
) -> FirestoreResult<Vec<gcloud_sdk::google::firestore::v1::document_transform::FieldTransform>> {
    transforms.into_iter().map(|t| t.try_into()).collect()
}

/// Every leaf path of a field map, deterministically ordered. A nested map
/// with entries recurses; an empty map is itself a leaf.
pub(crate) fn leaf_field_paths(fields: &FirestoreFields) -> Vec<String> {
    let mut paths = Vec::new();
    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();
    for name in names {
        collect_leaf_paths(escape_field_segment(name), &fields[name], &mut paths);
    }
    paths
}

fn collect_leaf_paths(prefix: String, value: &Value, out: &mut Vec<String>) {
    match value.value_type {
        Some(value::ValueType::MapValue(ref map_value)) if !map_value.fields.is_empty() => {
            let mut names: Vec<&String> = map_value.fields.keys().collect();
            names.sort();
            for name in names {
                collect_leaf_paths(
                    format!("{prefix}.{}", escape_field_segment(name)),
                    &map_value.fields[name],
                    out,
                );
            }
        }
        _ => out.push(prefix),
    }
}

fn path_covers(mask_path: &FirestoreFieldPath, target_field: &str) -> bool {
    let encoded = mask_path.encoded();
    target_field == encoded || target_field.starts_with(&format!("{encoded}."))
}

/// Copies only the values addressed by `paths` out of `fields`, rebuilding
/// the nested structure. A path absent from the input is a validation error.
fn prune_fields(
    fields: &FirestoreFields,
    paths: &[FirestoreFieldPath],
) -> FirestoreResult<FirestoreFields> {
    let mut pruned: FirestoreFields = HashMap::new();
    for path in paths {
        let value = lookup_field(fields, path.segments()).ok_or_else(|| {
            invalid_argument(
                "merge_fields",
                format!("Field path {path} is not present in the provided data"),
            )
        })?;
        insert_nested(&mut pruned, path.segments(), value.clone());
    }
    Ok(pruned)
}

fn lookup_field<'a>(fields: &'a FirestoreFields, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let value = fields.get(first)?;
    if rest.is_empty() {
        Some(value)
    } else {
        match value.value_type {
            Some(value::ValueType::MapValue(ref map_value)) => {
                lookup_field(&map_value.fields, rest)
            }
            _ => None,
        }
    }
}

fn expand_field_entries(entries: Vec<(FirestoreFieldPath, Value)>) -> FirestoreFields {
    let mut fields: FirestoreFields = HashMap::new();
    for (path, value) in entries {
        insert_nested(&mut fields, path.segments(), value);
    }
    fields
}

fn insert_nested(fields: &mut FirestoreFields, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            fields.insert(leaf.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = fields.entry(first.clone()).or_insert_with(|| Value {
                value_type: Some(value::ValueType::MapValue(MapValue {
                    fields: HashMap::new(),
                })),
            });
            if !matches!(entry.value_type, Some(value::ValueType::MapValue(_))) {
                *entry = Value {
                    value_type: Some(value::ValueType::MapValue(MapValue {
                        fields: HashMap::new(),
                    })),
                };
            }
            if let Some(value::ValueType::MapValue(ref mut map_value)) = entry.value_type {
                insert_nested(&mut map_value.fields, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcloud_sdk::google::firestore::v1::precondition::ConditionType;
    use serde::Serialize;

    fn fields_of<T: Serialize>(obj: &T) -> FirestoreFields {
        firestore_fields_from_serializable(obj).expect("serializable fields")
    }

    #[derive(Serialize)]
    struct City {
        name: String,
        population: i64,
    }

    #[test]
    fn test_create_sets_exists_false_precondition() {
        let write: Write = FirestoreWrite::Create {
            document_path: "docs/cities/SF".to_string(),
            fields: fields_of(&City {
                name: "SF".into(),
                population: 1,
            }),
            transforms: vec![],
        }
        .try_into()
        .unwrap();

        assert_eq!(
            write.current_document.and_then(|p| p.condition_type),
            Some(ConditionType::Exists(false))
        );
        assert_eq!(write.update_mask, None);
    }

    #[test]
    fn test_set_replace_has_no_mask_and_no_precondition() {
        let write: Write = FirestoreWrite::Set {
            document_path: "docs/cities/SF".to_string(),
            fields: fields_of(&City {
                name: "SF".into(),
                population: 1,
            }),
            mode: FirestoreSetMode::Replace,
            transforms: vec![],
        }
        .try_into()
        .unwrap();

        assert_eq!(write.update_mask, None);
        assert_eq!(write.current_document, None);
    }

    #[derive(Serialize)]
    struct Nested {
        top: i64,
        address: Address,
        tags: HashMap<String, String>,
    }

    #[derive(Serialize)]
    struct Address {
        city: String,
        zip: String,
    }

    #[test]
    fn test_set_merge_mask_is_leaf_paths() {
        let write: Write = FirestoreWrite::Set {
            document_path: "docs/cities/SF".to_string(),
            fields: fields_of(&Nested {
                top: 1,
                address: Address {
                    city: "SF".into(),
                    zip: "94107".into(),
                },
                tags: HashMap::new(),
            }),
            mode: FirestoreSetMode::Merge,
            transforms: vec![],
        }
        .try_into()
        .unwrap();

        let mask = write.update_mask.unwrap().field_paths;
        assert_eq!(
            mask,
            vec![
                "address.city".to_string(),
                "address.zip".to_string(),
                "tags".to_string(),
                "top".to_string(),
            ]
        );
        assert_eq!(write.current_document, None);
    }

    #[test]
    fn test_set_merge_fields_drops_unnamed_fields() {
        #[derive(Serialize)]
        struct Data {
            foo: String,
            baz: String,
        }

        let write: Write = FirestoreWrite::Set {
            document_path: "docs/cities/SF".to_string(),
            fields: fields_of(&Data {
                foo: "ignored".into(),
                baz: "qux".into(),
            }),
            mode: FirestoreSetMode::MergeFields(vec![FirestoreFieldPath::parse("baz").unwrap()]),
            transforms: vec![],
        }
        .try_into()
        .unwrap();

        assert_eq!(write.update_mask.unwrap().field_paths, vec!["baz"]);
        let doc = match write.operation {
            Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(doc)) => doc,
            other => panic!("Unexpected operation: {other:?}"),
        };
        assert!(doc.fields.contains_key("baz"));
        assert!(!doc.fields.contains_key("foo"));
    }

    #[test]
    fn test_set_merge_fields_requires_named_path() {
        let result: FirestoreResult<Write> = FirestoreWrite::Set {
            document_path: "docs/cities/SF".to_string(),
            fields: HashMap::new(),
            mode: FirestoreSetMode::MergeFields(vec![
                FirestoreFieldPath::parse("missing").unwrap()
            ]),
            transforms: vec![],
        }
        .try_into();

        assert!(matches!(
            result,
            Err(FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_update_mask_includes_deletes_but_fields_do_not() {
        let write: Write = FirestoreWrite::Update {
            document_path: "docs/cities/SF".to_string(),
            field_values: vec![
                (
                    FirestoreFieldPath::parse("population").unwrap(),
                    FirestoreUpdateValue::value(42),
                ),
                (
                    FirestoreFieldPath::parse("obsolete").unwrap(),
                    FirestoreUpdateValue::Delete,
                ),
                (
                    FirestoreFieldPath::parse("visits").unwrap(),
                    FirestoreUpdateValue::Transform(FirestoreFieldTransformType::Increment(
                        1.into(),
                    )),
                ),
            ],
            precondition: None,
        }
        .try_into()
        .unwrap();

        let mask = write.update_mask.clone().unwrap().field_paths;
        assert_eq!(mask, vec!["population", "obsolete", "visits"]);

        let doc = match write.operation {
            Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(doc)) => doc,
            other => panic!("Unexpected operation: {other:?}"),
        };
        assert!(doc.fields.contains_key("population"));
        assert!(!doc.fields.contains_key("obsolete"));
        assert!(!doc.fields.contains_key("visits"));
        assert_eq!(write.update_transforms.len(), 1);

        // Update defaults to guarding on document existence
        assert_eq!(
            write.current_document.and_then(|p| p.condition_type),
            Some(ConditionType::Exists(true))
        );
    }

    #[test]
    fn test_update_expands_dotted_paths() {
        let write: Write = FirestoreWrite::Update {
            document_path: "docs/cities/SF".to_string(),
            field_values: vec![(
                FirestoreFieldPath::parse("address.city").unwrap(),
                FirestoreUpdateValue::value("SF"),
            )],
            precondition: None,
        }
        .try_into()
        .unwrap();

        let doc = match write.operation {
            Some(gcloud_sdk::google::firestore::v1::write::Operation::Update(doc)) => doc,
            other => panic!("Unexpected operation: {other:?}"),
        };
        let address = doc.fields.get("address").unwrap();
        match address.value_type {
            Some(value::ValueType::MapValue(ref map_value)) => {
                assert!(map_value.fields.contains_key("city"));
            }
            ref other => panic!("Unexpected address value: {other:?}"),
        }
    }

    #[test]
    fn test_delete_carries_optional_precondition() {
        let write: Write = FirestoreWrite::Delete {
            document_path: "docs/cities/SF".to_string(),
            precondition: None,
        }
        .try_into()
        .unwrap();
        assert_eq!(write.current_document, None);
        assert!(matches!(
            write.operation,
            Some(gcloud_sdk::google::firestore::v1::write::Operation::Delete(_))
        ));
    }
}
