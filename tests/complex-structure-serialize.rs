use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use firestore_admin::*;
use gcloud_sdk::google::firestore::v1::value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct Test1(pub u8);

#[derive(Debug, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct Test2 {
    some_id: String,
    some_bool: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum TestEnum {
    TestChoice,
    TestWithParam(String),
    TestWithMultipleParams(String, String),
    TestWithStruct(Test2),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
struct MyTestStructure {
    some_id: String,
    some_string: String,
    some_num: u64,
    #[serde(with = "firestore_admin::serialize_as_timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    #[serde(with = "firestore_admin::serialize_as_optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(with = "firestore_admin::serialize_as_reference")]
    home_ref: String,
    location: FirestoreLatLng,
    test1: Test1,
    test11: Option<Test1>,
    test2: Option<Test2>,
    test3: Vec<Test2>,
    test4: TestEnum,
    test6: TestEnum,
    test7: TestEnum,
}

fn test_structure() -> MyTestStructure {
    MyTestStructure {
        some_id: "test-1".to_string(),
        some_string: "Test".to_string(),
        some_num: 41,
        created_at: Utc.with_ymd_and_hms(2023, 5, 11, 17, 3, 21).unwrap(),
        updated_at: None,
        home_ref: "projects/p/databases/(default)/documents/homes/h1".to_string(),
        location: FirestoreLatLng(FirestoreGeoPoint {
            latitude: 37.7,
            longitude: -122.4,
        }),
        test1: Test1(1),
        test11: Some(Test1(1)),
        test2: Some(Test2 {
            some_id: "test-1".to_string(),
            some_bool: Some(true),
        }),
        test3: vec![
            Test2 {
                some_id: "test-2".to_string(),
                some_bool: Some(false),
            },
            Test2 {
                some_id: "test-3".to_string(),
                some_bool: None,
            },
        ],
        test4: TestEnum::TestChoice,
        test6: TestEnum::TestWithMultipleParams("ss".to_string(), "tt".to_string()),
        test7: TestEnum::TestWithStruct(Test2 {
            some_id: "test-2".to_string(),
            some_bool: Some(true),
        }),
    }
}

#[test]
fn serialize_complex_structure_roundtrip() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let my_struct = test_structure();

    let doc = FirestoreDb::serialize_to_doc("test-docs/test-1", &my_struct)?;
    let deserialized: MyTestStructure = FirestoreDb::deserialize_doc_to(&doc)?;

    assert_eq!(deserialized, my_struct);
    Ok(())
}

#[test]
fn tagged_types_map_to_wire_variants() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let my_struct = test_structure();
    let doc = FirestoreDb::serialize_to_doc("test-docs/test-1", &my_struct)?;

    assert!(matches!(
        doc.fields.get("created_at").and_then(|v| v.value_type.as_ref()),
        Some(value::ValueType::TimestampValue(_))
    ));
    assert!(matches!(
        doc.fields.get("home_ref").and_then(|v| v.value_type.as_ref()),
        Some(value::ValueType::ReferenceValue(_))
    ));
    assert!(matches!(
        doc.fields.get("location").and_then(|v| v.value_type.as_ref()),
        Some(value::ValueType::GeoPointValue(_))
    ));

    // Absent optional timestamps are omitted from the encoded fields
    assert!(!doc.fields.contains_key("updated_at"));

    Ok(())
}

#[test]
fn serialize_floats_roundtrip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
    struct MyFloatStructure {
        some_f32: f32,
        some_f64: f64,
    }

    let my_struct = MyFloatStructure {
        some_f32: 42.5,
        some_f64: 3.14159,
    };

    let doc = FirestoreDb::serialize_to_doc("test-docs/floats", &my_struct)?;
    let deserialized: MyFloatStructure = FirestoreDb::deserialize_doc_to(&doc)?;

    assert_relative_eq!(deserialized.some_f32, my_struct.some_f32);
    assert_relative_eq!(deserialized.some_f64, my_struct.some_f64);
    Ok(())
}

#[test]
fn empty_maps_encode_as_present_maps() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
    struct WithMap {
        tags: std::collections::HashMap<String, String>,
    }

    let doc = FirestoreDb::serialize_to_doc("test-docs/empty-map", &WithMap::default())?;
    assert!(matches!(
        doc.fields.get("tags").and_then(|v| v.value_type.as_ref()),
        Some(value::ValueType::MapValue(map)) if map.fields.is_empty()
    ));

    let decoded: WithMap = FirestoreDb::deserialize_doc_to(&doc)?;
    assert!(decoded.tags.is_empty());
    Ok(())
}

#[test]
fn null_entries_survive_map_roundtrip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    #[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
    struct WithNullable {
        entries: std::collections::HashMap<String, Option<i64>>,
    }

    let mut entries = std::collections::HashMap::new();
    entries.insert("present".to_string(), Some(7));
    let my_struct = WithNullable { entries };

    let doc = FirestoreDb::serialize_to_doc("test-docs/nullable", &my_struct)?;
    let decoded: WithNullable = FirestoreDb::deserialize_doc_to(&doc)?;
    assert_eq!(decoded, my_struct);
    Ok(())
}
