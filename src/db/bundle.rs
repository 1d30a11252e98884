use crate::errors::invalid_argument;
use crate::*;
use base64::Engine;
use chrono::prelude::*;
use chrono::SecondsFormat;
use gcloud_sdk::google::firestore::v1::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Builds the length-prefixed client hydration artifact: a metadata record
/// followed by bundled documents and named queries, each record encoded as
/// `<decimal-length><json-element>`.
pub struct FirestoreBundleBuilder {
    bundle_id: String,
    documents: BTreeMap<String, BundledDocumentEntry>,
    named_queries: BTreeMap<String, BundledNamedQuery>,
}

struct BundledDocumentEntry {
    snapshot: FirestoreDocumentSnapshot,
    query_names: BTreeSet<String>,
}

struct BundledNamedQuery {
    parent: String,
    structured_query: StructuredQuery,
    limit_type: FirestoreQueryLimitType,
    read_time: Option<DateTime<Utc>>,
}

impl FirestoreBundleBuilder {
    pub fn new<S: Into<String>>(bundle_id: S) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            documents: BTreeMap::new(),
            named_queries: BTreeMap::new(),
        }
    }

    /// Adds a document snapshot. Adding the same document again merges the
    /// query-name attribution instead of duplicating the document.
    pub fn add_document(
        &mut self,
        snapshot: FirestoreDocumentSnapshot,
    ) -> FirestoreResult<&mut Self> {
        self.register_document(snapshot, None)
    }

    /// Adds a named query together with the snapshots it matched. Every
    /// document is registered under the query's name; duplicate query names
    /// are rejected. `parent` is the documents path the query ran under.
    pub fn add_named_query<S, P>(
        &mut self,
        name: S,
        parent: P,
        params: FirestoreQueryParams,
        snapshots: Vec<FirestoreDocumentSnapshot>,
        read_time: Option<DateTime<Utc>>,
    ) -> FirestoreResult<&mut Self>
    where
        S: Into<String>,
        P: Into<String>,
    {
        let name = name.into();
        if self.named_queries.contains_key(&name) {
            return Err(invalid_argument(
                "query_name",
                format!("A query named {name:?} has already been added to the bundle"),
            ));
        }

        let parent = params.parent.clone().unwrap_or_else(|| parent.into());
        let limit_type = params.limit_type.clone();
        let structured_query = params.to_structured_query()?;

        self.named_queries.insert(
            name.clone(),
            BundledNamedQuery {
                parent,
                structured_query,
                limit_type,
                read_time,
            },
        );

        for snapshot in snapshots {
            self.register_document(snapshot, Some(name.clone()))?;
        }

        Ok(self)
    }

    fn register_document(
        &mut self,
        snapshot: FirestoreDocumentSnapshot,
        query_name: Option<String>,
    ) -> FirestoreResult<&mut Self> {
        let resource_path = FirestoreResourcePath::parse(snapshot.document_path.as_str())?;
        if !resource_path.is_document_path() {
            return Err(invalid_argument(
                "document",
                format!(
                    "Bundled entries must address documents, got: {}",
                    snapshot.document_path
                ),
            ));
        }

        let entry = self
            .documents
            .entry(snapshot.document_path.clone())
            .or_insert_with(|| BundledDocumentEntry {
                snapshot,
                query_names: BTreeSet::new(),
            });
        if let Some(name) = query_name {
            entry.query_names.insert(name);
        }
        Ok(self)
    }

    /// Serializes the bundle. `totalBytes` counts the concatenated element
    /// payloads excluding the leading metadata record.
    pub fn build(self) -> FirestoreResult<Vec<u8>> {
        let mut elements: Vec<String> = Vec::new();
        let mut latest_read_time: Option<DateTime<Utc>> = None;

        for (document_path, entry) in &self.documents {
            let read_time = entry.snapshot.read_time;
            if read_time > latest_read_time {
                latest_read_time = read_time;
            }

            elements.push(
                json!({
                    "documentMetadata": {
                        "name": document_path,
                        "readTime": timestamp_json(read_time),
                        "exists": entry.snapshot.exists(),
                        "queries": entry.query_names.iter().collect::<Vec<_>>(),
                    }
                })
                .to_string(),
            );

            if let Some(ref document) = entry.snapshot.document {
                elements.push(json!({ "document": document_to_json(document) }).to_string());
            }
        }

        for (name, named_query) in &self.named_queries {
            if named_query.read_time > latest_read_time {
                latest_read_time = named_query.read_time;
            }

            elements.push(
                json!({
                    "namedQuery": {
                        "name": name,
                        "bundledQuery": {
                            "parent": named_query.parent,
                            "structuredQuery":
                                structured_query_to_json(&named_query.structured_query),
                            "limitType": match named_query.limit_type {
                                FirestoreQueryLimitType::First => "FIRST",
                                FirestoreQueryLimitType::Last => "LAST",
                            },
                        },
                        "readTime": timestamp_json(named_query.read_time),
                    }
                })
                .to_string(),
            );
        }

        let total_bytes: usize = elements.iter().map(|element| element.len()).sum();
        let create_time = latest_read_time.unwrap_or_else(Utc::now);

        let metadata = json!({
            "metadata": {
                "id": self.bundle_id,
                "createTime": timestamp_json(Some(create_time)),
                "version": 1,
                "totalDocuments": self.documents.len(),
                "totalBytes": total_bytes.to_string(),
            }
        })
        .to_string();

        let mut buffer = Vec::with_capacity(metadata.len() + total_bytes + 64);
        push_element(&mut buffer, &metadata);
        for element in &elements {
            push_element(&mut buffer, element);
        }

        Ok(buffer)
    }
}

fn push_element(buffer: &mut Vec<u8>, element: &str) {
    buffer.extend_from_slice(element.len().to_string().as_bytes());
    buffer.extend_from_slice(element.as_bytes());
}

fn timestamp_json(ts: Option<DateTime<Utc>>) -> serde_json::Value {
    match ts {
        Some(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        None => serde_json::Value::Null,
    }
}

fn proto_timestamp_json(ts: &gcloud_sdk::prost_types::Timestamp) -> serde_json::Value {
    match crate::timestamp_utils::from_timestamp(ts.clone()) {
        Ok(dt) => json!(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Err(_) => serde_json::Value::Null,
    }
}

/// The Firestore REST JSON rendering of a wire value.
pub(crate) fn value_to_json(value: &Value) -> serde_json::Value {
    match value.value_type {
        None | Some(value::ValueType::NullValue(_)) => json!({ "nullValue": null }),
        Some(value::ValueType::BooleanValue(v)) => json!({ "booleanValue": v }),
        // Wire integers are decimal strings in REST JSON
        Some(value::ValueType::IntegerValue(v)) => json!({ "integerValue": v.to_string() }),
        Some(value::ValueType::DoubleValue(v)) => {
            if v.is_nan() {
                json!({ "doubleValue": "NaN" })
            } else if v.is_infinite() {
                json!({ "doubleValue": if v > 0.0 { "Infinity" } else { "-Infinity" } })
            } else {
                json!({ "doubleValue": v })
            }
        }
        Some(value::ValueType::TimestampValue(ref ts)) => {
            json!({ "timestampValue": proto_timestamp_json(ts) })
        }
        Some(value::ValueType::StringValue(ref s)) => json!({ "stringValue": s }),
        Some(value::ValueType::BytesValue(ref b)) => {
            json!({ "bytesValue": base64::engine::general_purpose::STANDARD.encode(b) })
        }
        Some(value::ValueType::ReferenceValue(ref r)) => json!({ "referenceValue": r }),
        Some(value::ValueType::GeoPointValue(ref geo)) => json!({
            "geoPointValue": { "latitude": geo.latitude, "longitude": geo.longitude }
        }),
        Some(value::ValueType::ArrayValue(ref array)) => json!({
            "arrayValue": {
                "values": array.values.iter().map(value_to_json).collect::<Vec<_>>()
            }
        }),
        Some(value::ValueType::MapValue(ref map)) => json!({
            "mapValue": {
                "fields": map
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_json(v)))
                    .collect::<serde_json::Map<String, serde_json::Value>>()
            }
        }),
        Some(value::ValueType::FieldReferenceValue(_))
        | Some(value::ValueType::FunctionValue(_))
        | Some(value::ValueType::PipelineValue(_)) => json!({ "nullValue": null }),
    }
}

pub(crate) fn document_to_json(document: &Document) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("name".to_string(), json!(document.name));
    object.insert(
        "fields".to_string(),
        serde_json::Value::Object(
            document
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    );
    if let Some(ref create_time) = document.create_time {
        object.insert("createTime".to_string(), proto_timestamp_json(create_time));
    }
    if let Some(ref update_time) = document.update_time {
        object.insert("updateTime".to_string(), proto_timestamp_json(update_time));
    }
    serde_json::Value::Object(object)
}

fn direction_json(direction: i32) -> serde_json::Value {
    match structured_query::Direction::try_from(direction) {
        Ok(structured_query::Direction::Descending) => json!("DESCENDING"),
        _ => json!("ASCENDING"),
    }
}

fn field_filter_op_json(op: i32) -> serde_json::Value {
    use structured_query::field_filter::Operator;
    match Operator::try_from(op) {
        Ok(Operator::LessThan) => json!("LESS_THAN"),
        Ok(Operator::LessThanOrEqual) => json!("LESS_THAN_OR_EQUAL"),
        Ok(Operator::GreaterThan) => json!("GREATER_THAN"),
        Ok(Operator::GreaterThanOrEqual) => json!("GREATER_THAN_OR_EQUAL"),
        Ok(Operator::Equal) => json!("EQUAL"),
        Ok(Operator::NotEqual) => json!("NOT_EQUAL"),
        Ok(Operator::ArrayContains) => json!("ARRAY_CONTAINS"),
        Ok(Operator::In) => json!("IN"),
        Ok(Operator::ArrayContainsAny) => json!("ARRAY_CONTAINS_ANY"),
        Ok(Operator::NotIn) => json!("NOT_IN"),
        _ => json!("OPERATOR_UNSPECIFIED"),
    }
}

fn unary_filter_op_json(op: i32) -> serde_json::Value {
    use structured_query::unary_filter::Operator;
    match Operator::try_from(op) {
        Ok(Operator::IsNan) => json!("IS_NAN"),
        Ok(Operator::IsNull) => json!("IS_NULL"),
        Ok(Operator::IsNotNan) => json!("IS_NOT_NAN"),
        Ok(Operator::IsNotNull) => json!("IS_NOT_NULL"),
        _ => json!("OPERATOR_UNSPECIFIED"),
    }
}

fn filter_to_json(filter: &structured_query::Filter) -> serde_json::Value {
    match filter.filter_type {
        Some(structured_query::filter::FilterType::FieldFilter(ref field_filter)) => json!({
            "fieldFilter": {
                "field": {
                    "fieldPath": field_filter
                        .field
                        .as_ref()
                        .map(|f| f.field_path.clone())
                        .unwrap_or_default()
                },
                "op": field_filter_op_json(field_filter.op),
                "value": field_filter.value.as_ref().map(value_to_json),
            }
        }),
        Some(structured_query::filter::FilterType::CompositeFilter(ref composite)) => json!({
            "compositeFilter": {
                "op": "AND",
                "filters": composite.filters.iter().map(filter_to_json).collect::<Vec<_>>(),
            }
        }),
        Some(structured_query::filter::FilterType::UnaryFilter(ref unary)) => json!({
            "unaryFilter": {
                "op": unary_filter_op_json(unary.op),
                "field": {
                    "fieldPath": match unary.operand_type {
                        Some(structured_query::unary_filter::OperandType::Field(ref field)) => {
                            field.field_path.clone()
                        }
                        None => String::new(),
                    }
                },
            }
        }),
        None => serde_json::Value::Null,
    }
}

fn cursor_to_json(cursor: &Cursor) -> serde_json::Value {
    json!({
        "values": cursor.values.iter().map(value_to_json).collect::<Vec<_>>(),
        "before": cursor.before,
    })
}

pub(crate) fn structured_query_to_json(query: &StructuredQuery) -> serde_json::Value {
    let mut object = serde_json::Map::new();

    object.insert(
        "from".to_string(),
        json!(query
            .from
            .iter()
            .map(|selector| json!({
                "collectionId": selector.collection_id,
                "allDescendants": selector.all_descendants,
            }))
            .collect::<Vec<_>>()),
    );

    if let Some(ref select) = query.select {
        object.insert(
            "select".to_string(),
            json!({
                "fields": select
                    .fields
                    .iter()
                    .map(|f| json!({ "fieldPath": f.field_path }))
                    .collect::<Vec<_>>()
            }),
        );
    }

    if let Some(ref filter) = query.r#where {
        object.insert("where".to_string(), filter_to_json(filter));
    }

    if !query.order_by.is_empty() {
        object.insert(
            "orderBy".to_string(),
            json!(query
                .order_by
                .iter()
                .map(|order| json!({
                    "field": {
                        "fieldPath": order
                            .field
                            .as_ref()
                            .map(|f| f.field_path.clone())
                            .unwrap_or_default()
                    },
                    "direction": direction_json(order.direction),
                }))
                .collect::<Vec<_>>()),
        );
    }

    if let Some(ref start_at) = query.start_at {
        object.insert("startAt".to_string(), cursor_to_json(start_at));
    }
    if let Some(ref end_at) = query.end_at {
        object.insert("endAt".to_string(), cursor_to_json(end_at));
    }
    if let Some(limit) = query.limit {
        object.insert("limit".to_string(), json!(limit));
    }
    if query.offset != 0 {
        object.insert("offset".to_string(), json!(query.offset));
    }

    serde_json::Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn city_snapshot(id: &str, population: i64) -> FirestoreDocumentSnapshot {
        let mut fields = HashMap::new();
        fields.insert(
            "population".to_string(),
            Value {
                value_type: Some(value::ValueType::IntegerValue(population)),
            },
        );
        FirestoreDocumentSnapshot::from_found(
            Document {
                name: format!("projects/p/databases/(default)/documents/cities/{id}"),
                fields,
                create_time: None,
                update_time: None,
            },
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        )
    }

    fn parse_bundle_elements(bytes: &[u8]) -> Vec<serde_json::Value> {
        let mut elements = Vec::new();
        let mut rest = std::str::from_utf8(bytes).expect("bundle is utf-8");
        while !rest.is_empty() {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .expect("length prefix");
            let length: usize = rest[..digits_end].parse().expect("decimal length");
            let payload = &rest[digits_end..digits_end + length];
            elements.push(serde_json::from_str(payload).expect("json element"));
            rest = &rest[digits_end + length..];
        }
        elements
    }

    #[test]
    fn test_bundle_format_and_totals() {
        let mut builder = FirestoreBundleBuilder::new("test-bundle");
        builder.add_document(city_snapshot("SF", 100)).unwrap();
        builder.add_document(city_snapshot("LA", 200)).unwrap();

        let bytes = builder.build().unwrap();
        let elements = parse_bundle_elements(&bytes);

        // Metadata first, then a metadata+document pair per bundled doc
        assert_eq!(elements.len(), 5);
        let metadata = &elements[0]["metadata"];
        assert_eq!(metadata["id"], "test-bundle");
        assert_eq!(metadata["version"], 1);
        assert_eq!(metadata["totalDocuments"], 2);

        let expected_bytes: usize = elements[1..]
            .iter()
            .map(|e| e.to_string().len())
            .sum();
        assert_eq!(
            metadata["totalBytes"],
            serde_json::Value::String(expected_bytes.to_string())
        );

        assert!(elements[1]["documentMetadata"]["exists"].as_bool().unwrap());
        assert_eq!(
            elements[2]["document"]["fields"]["population"]["integerValue"],
            "200"
        );
    }

    #[test]
    fn test_duplicate_documents_accumulate_query_names() {
        let mut builder = FirestoreBundleBuilder::new("test-bundle");

        let params = FirestoreQueryParams::new("cities".into());
        builder
            .register_document(city_snapshot("SF", 100), Some("by-pop".to_string()))
            .unwrap();
        builder
            .register_document(city_snapshot("SF", 100), Some("all".to_string()))
            .unwrap();

        let bytes = builder.build().unwrap();
        let elements = parse_bundle_elements(&bytes);

        assert_eq!(elements[0]["metadata"]["totalDocuments"], 1);
        let queries = elements[1]["documentMetadata"]["queries"]
            .as_array()
            .unwrap();
        // Sorted on emission
        assert_eq!(queries[0], "all");
        assert_eq!(queries[1], "by-pop");
        let _ = params;
    }

    #[test]
    fn test_named_query_element_shape() {
        let mut builder = FirestoreBundleBuilder::new("test-bundle");
        let params = FirestoreQueryParams::new("cities".into())
            .with_order_by(vec![FirestoreQueryOrder::new(
                "population".to_string(),
                FirestoreQueryDirection::Descending,
            )])
            .with_limit(10);

        builder
            .add_named_query(
                "top-cities",
                "projects/p/databases/(default)/documents",
                params,
                vec![],
                Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            )
            .unwrap();

        let bytes = builder.build().unwrap();
        let elements = parse_bundle_elements(&bytes);
        let named_query = &elements[1]["namedQuery"];

        assert_eq!(named_query["name"], "top-cities");
        assert_eq!(named_query["bundledQuery"]["limitType"], "FIRST");
        let sq = &named_query["bundledQuery"]["structuredQuery"];
        assert_eq!(sq["from"][0]["collectionId"], "cities");
        assert_eq!(sq["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(sq["limit"], 10);
    }

    #[test]
    fn test_duplicate_query_name_rejected() {
        let mut builder = FirestoreBundleBuilder::new("test-bundle");
        let parent = "projects/p/databases/(default)/documents";
        builder
            .add_named_query(
                "dup",
                parent,
                FirestoreQueryParams::new("cities".into()),
                vec![],
                None,
            )
            .unwrap();
        let result = builder.add_named_query(
            "dup",
            parent,
            FirestoreQueryParams::new("cities".into()),
            vec![],
            None,
        );
        assert!(matches!(
            result,
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_value_json_rendering() {
        let nan = Value {
            value_type: Some(value::ValueType::DoubleValue(f64::NAN)),
        };
        assert_eq!(value_to_json(&nan), json!({ "doubleValue": "NaN" }));

        let bytes = Value {
            value_type: Some(value::ValueType::BytesValue(vec![1, 2, 3])),
        };
        assert_eq!(value_to_json(&bytes), json!({ "bytesValue": "AQID" }));

        let int = Value {
            value_type: Some(value::ValueType::IntegerValue(42)),
        };
        assert_eq!(value_to_json(&int), json!({ "integerValue": "42" }));
    }
}
