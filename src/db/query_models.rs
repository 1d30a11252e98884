#![allow(clippy::derive_partial_eq_without_eq)] // Proto-derived members don't implement Eq

use crate::errors::invalid_argument;
use crate::resource_path::FIRESTORE_DOCUMENT_ID_FIELD;
use crate::{FirestoreResult, FirestoreValue};
use gcloud_sdk::google::firestore::v1::*;
use rsb_derive::Builder;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreQueryCollection {
    Single(String),
    Group(Vec<String>),
}

impl std::fmt::Display for FirestoreQueryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirestoreQueryCollection::Single(single) => write!(f, "{single}"),
            FirestoreQueryCollection::Group(group) => write!(f, "{}", group.join(",")),
        }
    }
}

impl From<&str> for FirestoreQueryCollection {
    fn from(collection_id_str: &str) -> Self {
        FirestoreQueryCollection::Single(collection_id_str.to_string())
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreQueryDirection {
    Ascending,
    Descending,
}

impl FirestoreQueryDirection {
    pub fn reversed(&self) -> Self {
        match self {
            FirestoreQueryDirection::Ascending => FirestoreQueryDirection::Descending,
            FirestoreQueryDirection::Descending => FirestoreQueryDirection::Ascending,
        }
    }
}

impl std::fmt::Display for FirestoreQueryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FirestoreQueryDirection::Ascending => write!(f, "asc"),
            FirestoreQueryDirection::Descending => write!(f, "desc"),
        }
    }
}

/// Whether `limit` keeps the first or the last N results of the ordered
/// result space. `Last` queries are rewritten at wire time and re-reversed on
/// the client.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreQueryLimitType {
    First,
    Last,
}

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreQueryOrder {
    pub field_name: String,
    pub direction: FirestoreQueryDirection,
}

impl FirestoreQueryOrder {
    pub fn reversed(&self) -> Self {
        Self::new(self.field_name.clone(), self.direction.reversed())
    }

    pub fn to_structured_query_order(&self) -> structured_query::Order {
        structured_query::Order {
            field: Some(structured_query::FieldReference {
                field_path: self.field_name.clone(),
            }),
            direction: (match self.direction {
                FirestoreQueryDirection::Ascending => structured_query::Direction::Ascending.into(),
                FirestoreQueryDirection::Descending => {
                    structured_query::Direction::Descending.into()
                }
            }),
        }
    }
}

impl<S> From<(S, FirestoreQueryDirection)> for FirestoreQueryOrder
where
    S: AsRef<str>,
{
    fn from(field_order: (S, FirestoreQueryDirection)) -> Self {
        FirestoreQueryOrder::new(field_order.0.as_ref().to_string(), field_order.1)
    }
}

impl From<&FirestoreQueryOrder> for structured_query::Order {
    fn from(order: &FirestoreQueryOrder) -> Self {
        order.to_structured_query_order()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreQueryFilter {
    Composite(FirestoreQueryFilterComposite),
    Unary(FirestoreQueryFilterUnary),
    Compare(Option<FirestoreQueryFilterCompare>),
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreQueryFilterComposite {
    pub for_all_filters: Vec<FirestoreQueryFilter>,
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreQueryFilterUnary {
    IsNan(String),
    IsNull(String),
    IsNotNan(String),
    IsNotNull(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreQueryFilterCompare {
    LessThan(String, FirestoreValue),
    LessThanOrEqual(String, FirestoreValue),
    GreaterThan(String, FirestoreValue),
    GreaterThanOrEqual(String, FirestoreValue),
    Equal(String, FirestoreValue),
    NotEqual(String, FirestoreValue),
    ArrayContains(String, FirestoreValue),
    In(String, Vec<FirestoreValue>),
    ArrayContainsAny(String, Vec<FirestoreValue>),
    NotIn(String, Vec<FirestoreValue>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreQueryCursor {
    BeforeValue(Vec<FirestoreValue>),
    AfterValue(Vec<FirestoreValue>),
}

impl FirestoreQueryCursor {
    /// Inverts the `before` flag keeping the values.
    pub fn inverted(self) -> Self {
        match self {
            FirestoreQueryCursor::BeforeValue(values) => {
                FirestoreQueryCursor::AfterValue(values)
            }
            FirestoreQueryCursor::AfterValue(values) => {
                FirestoreQueryCursor::BeforeValue(values)
            }
        }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        match self {
            FirestoreQueryCursor::BeforeValue(values) => values,
            FirestoreQueryCursor::AfterValue(values) => values,
        }
    }
}

impl From<&FirestoreQueryCursor> for gcloud_sdk::google::firestore::v1::Cursor {
    fn from(cursor: &FirestoreQueryCursor) -> Self {
        match cursor {
            FirestoreQueryCursor::BeforeValue(values) => {
                gcloud_sdk::google::firestore::v1::Cursor {
                    values: values.iter().map(|value| value.value.clone()).collect(),
                    before: true,
                }
            }
            FirestoreQueryCursor::AfterValue(values) => gcloud_sdk::google::firestore::v1::Cursor {
                values: values.iter().map(|value| value.value.clone()).collect(),
                before: false,
            },
        }
    }
}

impl From<gcloud_sdk::google::firestore::v1::Cursor> for FirestoreQueryCursor {
    fn from(cursor: gcloud_sdk::google::firestore::v1::Cursor) -> Self {
        let firestore_values = cursor
            .values
            .into_iter()
            .map(FirestoreValue::from)
            .collect();
        if cursor.before {
            FirestoreQueryCursor::BeforeValue(firestore_values)
        } else {
            FirestoreQueryCursor::AfterValue(firestore_values)
        }
    }
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreQueryParams {
    pub collection_id: FirestoreQueryCollection,
    pub parent: Option<String>,
    pub limit: Option<u32>,

    #[default = "FirestoreQueryLimitType::First"]
    pub limit_type: FirestoreQueryLimitType,

    pub offset: Option<u32>,
    pub order_by: Option<Vec<FirestoreQueryOrder>>,
    pub filter: Option<FirestoreQueryFilter>,
    pub all_descendants: Option<bool>,
    pub return_only_fields: Option<Vec<String>>,
    pub start_at: Option<FirestoreQueryCursor>,
    pub end_at: Option<FirestoreQueryCursor>,
}

impl FirestoreQueryParams {
    fn has_cursor(&self) -> bool {
        self.start_at.is_some() || self.end_at.is_some()
    }

    /// Adds a filter clause, AND-combined with any existing filter. Rejected
    /// once a cursor has been set, since the cursor values are positional in
    /// the filter/order space already fixed.
    pub fn add_filter(self, filter: FirestoreQueryFilter) -> FirestoreResult<Self> {
        if self.has_cursor() {
            return Err(invalid_argument(
                "filter",
                "Filters cannot be added after a query cursor has been set",
            ));
        }
        validate_filter(&filter)?;
        let combined = match self.filter.clone() {
            Some(existing) => FirestoreQueryFilter::Composite(
                FirestoreQueryFilterComposite::new(vec![existing, filter]),
            ),
            None => filter,
        };
        Ok(self.with_filter(combined))
    }

    /// Appends orderings. Rejected once a cursor has been set.
    pub fn add_order_by<I>(self, orders: I) -> FirestoreResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<FirestoreQueryOrder>,
    {
        if self.has_cursor() {
            return Err(invalid_argument(
                "order_by",
                "Orderings cannot be added after a query cursor has been set",
            ));
        }
        let mut existing = self.order_by.clone().unwrap_or_default();
        existing.extend(orders.into_iter().map(|o| o.into()));
        Ok(self.with_order_by(existing))
    }

    /// The first inequality filter's field, used for the implicit ordering.
    fn first_inequality_field(&self) -> Option<String> {
        fn walk(filter: &FirestoreQueryFilter) -> Option<String> {
            match filter {
                FirestoreQueryFilter::Compare(Some(cmp)) => match cmp {
                    FirestoreQueryFilterCompare::LessThan(field, _)
                    | FirestoreQueryFilterCompare::LessThanOrEqual(field, _)
                    | FirestoreQueryFilterCompare::GreaterThan(field, _)
                    | FirestoreQueryFilterCompare::GreaterThanOrEqual(field, _)
                    | FirestoreQueryFilterCompare::NotEqual(field, _)
                    | FirestoreQueryFilterCompare::NotIn(field, _) => Some(field.clone()),
                    _ => None,
                },
                FirestoreQueryFilter::Composite(composite) => {
                    composite.for_all_filters.iter().find_map(walk)
                }
                _ => None,
            }
        }
        self.filter.as_ref().and_then(walk)
    }

    /// Ordering rules applied before a cursor is derived from a snapshot:
    /// the first inequality field becomes the first ordering when none is
    /// set, and `__name__` is appended with the last ordering's direction.
    pub fn with_implicit_order_for_cursor(self) -> Self {
        let mut orders = self.order_by.clone().unwrap_or_default();
        if orders.is_empty() {
            if let Some(field) = self.first_inequality_field() {
                orders.push(FirestoreQueryOrder::new(
                    field,
                    FirestoreQueryDirection::Ascending,
                ));
            }
        }
        if !orders
            .iter()
            .any(|o| o.field_name == FIRESTORE_DOCUMENT_ID_FIELD)
        {
            let direction = orders
                .last()
                .map(|o| o.direction.clone())
                .unwrap_or(FirestoreQueryDirection::Ascending);
            orders.push(FirestoreQueryOrder::new(
                FIRESTORE_DOCUMENT_ID_FIELD.to_string(),
                direction,
            ));
        }
        self.with_order_by(orders)
    }

    /// Derives cursor values for this query's orderings from a document the
    /// caller has already read.
    pub fn cursor_values_from_doc(
        &self,
        document: &Document,
    ) -> FirestoreResult<Vec<FirestoreValue>> {
        let orders = self.order_by.clone().unwrap_or_default();
        if orders.is_empty() {
            return Err(invalid_argument(
                "order_by",
                "Deriving a cursor from a document requires orderings; apply the implicit ordering first",
            ));
        }
        orders
            .iter()
            .map(|order| {
                if order.field_name == FIRESTORE_DOCUMENT_ID_FIELD {
                    Ok(FirestoreValue::from(Value {
                        value_type: Some(value::ValueType::ReferenceValue(document.name.clone())),
                    }))
                } else {
                    lookup_doc_field(document, order.field_name.as_str())
                        .map(FirestoreValue::from)
                        .ok_or_else(|| {
                            invalid_argument(
                                "cursor",
                                format!(
                                    "Field {} is missing in the document {} used as a cursor",
                                    order.field_name, document.name
                                ),
                            )
                        })
                }
            })
            .collect()
    }

    pub fn start_at_doc(self, document: &Document) -> FirestoreResult<Self> {
        let params = self.with_implicit_order_for_cursor();
        let values = params.cursor_values_from_doc(document)?;
        Ok(params.with_start_at(FirestoreQueryCursor::BeforeValue(values)))
    }

    pub fn start_after_doc(self, document: &Document) -> FirestoreResult<Self> {
        let params = self.with_implicit_order_for_cursor();
        let values = params.cursor_values_from_doc(document)?;
        Ok(params.with_start_at(FirestoreQueryCursor::AfterValue(values)))
    }

    pub fn end_at_doc(self, document: &Document) -> FirestoreResult<Self> {
        let params = self.with_implicit_order_for_cursor();
        let values = params.cursor_values_from_doc(document)?;
        Ok(params.with_end_at(FirestoreQueryCursor::AfterValue(values)))
    }

    pub fn end_before_doc(self, document: &Document) -> FirestoreResult<Self> {
        let params = self.with_implicit_order_for_cursor();
        let values = params.cursor_values_from_doc(document)?;
        Ok(params.with_end_at(FirestoreQueryCursor::BeforeValue(values)))
    }

    pub(crate) fn validate(&self) -> FirestoreResult<()> {
        if self.limit_type == FirestoreQueryLimitType::Last
            && self.order_by.as_ref().map_or(true, |o| o.is_empty())
        {
            return Err(invalid_argument(
                "limit_to_last",
                "A limit-to-last query requires at least one explicit ordering",
            ));
        }

        if let Some(ref filter) = self.filter {
            validate_filter(filter)?;
        }

        if let Some(ref orders) = self.order_by {
            for (position, order) in orders.iter().enumerate() {
                if order.field_name == FIRESTORE_DOCUMENT_ID_FIELD {
                    for cursor in [self.start_at.as_ref(), self.end_at.as_ref()]
                        .into_iter()
                        .flatten()
                    {
                        if let Some(v) = cursor.values().get(position) {
                            if !matches!(
                                v.value.value_type,
                                Some(value::ValueType::ReferenceValue(_))
                            ) {
                                return Err(invalid_argument(
                                    "cursor",
                                    "Cursor values for the document key ordering must be document references",
                                ));
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Produces the wire query. A limit-to-last query is rewritten here:
    /// orderings reverse and cursors swap with inverted `before` flags; the
    /// reader restores the user-visible order after consuming the stream.
    pub fn to_structured_query(self) -> FirestoreResult<StructuredQuery> {
        self.validate()?;

        let (order_by, start_at, end_at) = match self.limit_type {
            FirestoreQueryLimitType::First => (self.order_by, self.start_at, self.end_at),
            FirestoreQueryLimitType::Last => (
                self.order_by
                    .map(|orders| orders.iter().map(|o| o.reversed()).collect()),
                self.end_at.map(|c| c.inverted()),
                self.start_at.map(|c| c.inverted()),
            ),
        };

        Ok(StructuredQuery {
            select: self.return_only_fields.as_ref().map(|select_only_fields| {
                structured_query::Projection {
                    fields: select_only_fields
                        .iter()
                        .map(|field_name| structured_query::FieldReference {
                            field_path: field_name.clone(),
                        })
                        .collect(),
                }
            }),
            start_at: start_at.as_ref().map(|cursor| cursor.into()),
            end_at: end_at.as_ref().map(|cursor| cursor.into()),
            limit: self.limit.map(|x| x as i32),
            offset: self.offset.map(|x| x as i32).unwrap_or(0),
            order_by: order_by
                .as_ref()
                .map(|po| po.iter().map(|fo| fo.to_structured_query_order()).collect())
                .unwrap_or_else(Vec::new),
            from: match self.collection_id {
                FirestoreQueryCollection::Single(ref collection_id) => {
                    vec![structured_query::CollectionSelector {
                        collection_id: collection_id.clone(),
                        all_descendants: self.all_descendants.unwrap_or(false),
                    }]
                }
                FirestoreQueryCollection::Group(ref collection_ids) => collection_ids
                    .iter()
                    .map(|collection_id| structured_query::CollectionSelector {
                        collection_id: collection_id.clone(),
                        all_descendants: self.all_descendants.unwrap_or(false),
                    })
                    .collect(),
            },
            r#where: self.filter.map(|f| f.into()),
            ..Default::default()
        })
    }
}

fn lookup_doc_field(document: &Document, field_path: &str) -> Option<Value> {
    let mut segments = field_path.split('.');
    let first = segments.next()?;
    let mut current = document.fields.get(first)?.clone();
    for segment in segments {
        match current.value_type {
            Some(value::ValueType::MapValue(map_value)) => {
                current = map_value.fields.get(segment)?.clone();
            }
            _ => return None,
        }
    }
    Some(current)
}

fn validate_filter(filter: &FirestoreQueryFilter) -> FirestoreResult<()> {
    match filter {
        FirestoreQueryFilter::Compare(Some(FirestoreQueryFilterCompare::In(field, values)))
        | FirestoreQueryFilter::Compare(Some(FirestoreQueryFilterCompare::NotIn(field, values)))
        | FirestoreQueryFilter::Compare(Some(FirestoreQueryFilterCompare::ArrayContainsAny(
            field,
            values,
        ))) => {
            if values.is_empty() {
                Err(invalid_argument(
                    field.clone(),
                    "A disjunctive filter requires a non-empty list of values",
                ))
            } else {
                Ok(())
            }
        }
        FirestoreQueryFilter::Composite(composite) => composite
            .for_all_filters
            .iter()
            .try_for_each(validate_filter),
        _ => Ok(()),
    }
}

impl From<FirestoreQueryFilter> for structured_query::Filter {
    fn from(filter: FirestoreQueryFilter) -> Self {
        let filter_type = match filter {
            FirestoreQueryFilter::Compare(comp) => {
                comp.map(|cmp| {
                    structured_query::filter::FilterType::FieldFilter(match cmp {
                        FirestoreQueryFilterCompare::Equal(field_name, fvalue) => field_filter(
                            field_name,
                            structured_query::field_filter::Operator::Equal,
                            fvalue.value,
                        ),
                        FirestoreQueryFilterCompare::NotEqual(field_name, fvalue) => field_filter(
                            field_name,
                            structured_query::field_filter::Operator::NotEqual,
                            fvalue.value,
                        ),
                        FirestoreQueryFilterCompare::LessThan(field_name, fvalue) => field_filter(
                            field_name,
                            structured_query::field_filter::Operator::LessThan,
                            fvalue.value,
                        ),
                        FirestoreQueryFilterCompare::LessThanOrEqual(field_name, fvalue) => {
                            field_filter(
                                field_name,
                                structured_query::field_filter::Operator::LessThanOrEqual,
                                fvalue.value,
                            )
                        }
                        FirestoreQueryFilterCompare::GreaterThan(field_name, fvalue) => {
                            field_filter(
                                field_name,
                                structured_query::field_filter::Operator::GreaterThan,
                                fvalue.value,
                            )
                        }
                        FirestoreQueryFilterCompare::GreaterThanOrEqual(field_name, fvalue) => {
                            field_filter(
                                field_name,
                                structured_query::field_filter::Operator::GreaterThanOrEqual,
                                fvalue.value,
                            )
                        }
                        FirestoreQueryFilterCompare::ArrayContains(field_name, fvalue) => {
                            field_filter(
                                field_name,
                                structured_query::field_filter::Operator::ArrayContains,
                                fvalue.value,
                            )
                        }
                        FirestoreQueryFilterCompare::In(field_name, fvalues) => field_filter(
                            field_name,
                            structured_query::field_filter::Operator::In,
                            array_of(fvalues),
                        ),
                        FirestoreQueryFilterCompare::NotIn(field_name, fvalues) => field_filter(
                            field_name,
                            structured_query::field_filter::Operator::NotIn,
                            array_of(fvalues),
                        ),
                        FirestoreQueryFilterCompare::ArrayContainsAny(field_name, fvalues) => {
                            field_filter(
                                field_name,
                                structured_query::field_filter::Operator::ArrayContainsAny,
                                array_of(fvalues),
                            )
                        }
                    })
                })
            }
            FirestoreQueryFilter::Composite(composite) => {
                Some(structured_query::filter::FilterType::CompositeFilter(
                    structured_query::CompositeFilter {
                        op: structured_query::composite_filter::Operator::And.into(),
                        filters: composite
                            .for_all_filters
                            .into_iter()
                            .map(structured_query::Filter::from)
                            .filter(|filter| filter.filter_type.is_some())
                            .collect(),
                    },
                ))
            }
            FirestoreQueryFilter::Unary(unary) => {
                let (op, field_name) = match unary {
                    FirestoreQueryFilterUnary::IsNan(field_name) => {
                        (structured_query::unary_filter::Operator::IsNan, field_name)
                    }
                    FirestoreQueryFilterUnary::IsNull(field_name) => {
                        (structured_query::unary_filter::Operator::IsNull, field_name)
                    }
                    FirestoreQueryFilterUnary::IsNotNan(field_name) => (
                        structured_query::unary_filter::Operator::IsNotNan,
                        field_name,
                    ),
                    FirestoreQueryFilterUnary::IsNotNull(field_name) => (
                        structured_query::unary_filter::Operator::IsNotNull,
                        field_name,
                    ),
                };
                Some(structured_query::filter::FilterType::UnaryFilter(
                    structured_query::UnaryFilter {
                        op: op.into(),
                        operand_type: Some(structured_query::unary_filter::OperandType::Field(
                            structured_query::FieldReference {
                                field_path: field_name,
                            },
                        )),
                    },
                ))
            }
        };

        structured_query::Filter { filter_type }
    }
}

fn field_filter(
    field_name: String,
    op: structured_query::field_filter::Operator,
    value: Value,
) -> structured_query::FieldFilter {
    structured_query::FieldFilter {
        field: Some(structured_query::FieldReference {
            field_path: field_name,
        }),
        op: op.into(),
        value: Some(value),
    }
}

fn array_of(values: Vec<FirestoreValue>) -> Value {
    Value {
        value_type: Some(value::ValueType::ArrayValue(ArrayValue {
            values: values.into_iter().map(|v| v.value).collect(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_params() -> FirestoreQueryParams {
        FirestoreQueryParams::new("cities".into())
    }

    fn doc(name: &str, fields: Vec<(&str, i64)>) -> Document {
        Document {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        Value {
                            value_type: Some(value::ValueType::IntegerValue(v)),
                        },
                    )
                })
                .collect::<HashMap<String, Value>>(),
            create_time: None,
            update_time: None,
        }
    }

    #[test]
    fn test_filter_rejected_after_cursor() {
        let params = test_params()
            .with_start_at(FirestoreQueryCursor::BeforeValue(vec![1.into()]));

        let result = params.add_filter(FirestoreQueryFilter::Compare(Some(
            FirestoreQueryFilterCompare::Equal("population".into(), 1.into()),
        )));
        assert!(matches!(
            result,
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_order_by_rejected_after_cursor() {
        let params = test_params()
            .with_end_at(FirestoreQueryCursor::AfterValue(vec![1.into()]));

        let result = params.add_order_by(vec![(
            "population",
            FirestoreQueryDirection::Ascending,
        )]);
        assert!(matches!(
            result,
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_empty_disjunctive_filter_rejected() {
        let result = test_params().add_filter(FirestoreQueryFilter::Compare(Some(
            FirestoreQueryFilterCompare::In("population".into(), vec![]),
        )));
        assert!(matches!(
            result,
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_limit_to_last_requires_ordering() {
        let params = test_params()
            .with_limit(5)
            .with_limit_type(FirestoreQueryLimitType::Last);
        assert!(matches!(
            params.to_structured_query(),
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }

    #[test]
    fn test_limit_to_last_rewrites_orders_and_cursors() {
        let params = test_params()
            .with_order_by(vec![FirestoreQueryOrder::new(
                "population".to_string(),
                FirestoreQueryDirection::Ascending,
            )])
            .with_limit(5)
            .with_limit_type(FirestoreQueryLimitType::Last)
            .with_start_at(FirestoreQueryCursor::BeforeValue(vec![10.into()]))
            .with_end_at(FirestoreQueryCursor::BeforeValue(vec![100.into()]));

        let wire = params.to_structured_query().unwrap();

        assert_eq!(
            wire.order_by[0].direction,
            i32::from(structured_query::Direction::Descending)
        );
        // The old end cursor becomes the start with its before flag flipped
        assert!(!wire.start_at.as_ref().unwrap().before);
        assert!(wire.end_at.as_ref().unwrap().before);
    }

    #[test]
    fn test_implicit_ordering_from_inequality_and_name_append() {
        let params = test_params()
            .add_filter(FirestoreQueryFilter::Compare(Some(
                FirestoreQueryFilterCompare::GreaterThan("population".into(), 10.into()),
            )))
            .unwrap()
            .with_implicit_order_for_cursor();

        let orders = params.order_by.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].field_name, "population");
        assert_eq!(orders[0].direction, FirestoreQueryDirection::Ascending);
        assert_eq!(orders[1].field_name, FIRESTORE_DOCUMENT_ID_FIELD);
        assert_eq!(orders[1].direction, FirestoreQueryDirection::Ascending);
    }

    #[test]
    fn test_implicit_name_ordering_follows_last_direction() {
        let params = test_params()
            .with_order_by(vec![FirestoreQueryOrder::new(
                "population".to_string(),
                FirestoreQueryDirection::Descending,
            )])
            .with_implicit_order_for_cursor();

        let orders = params.order_by.unwrap();
        assert_eq!(orders[1].field_name, FIRESTORE_DOCUMENT_ID_FIELD);
        assert_eq!(orders[1].direction, FirestoreQueryDirection::Descending);
    }

    #[test]
    fn test_cursor_from_doc_uses_reference_for_name() {
        let params = test_params()
            .with_order_by(vec![FirestoreQueryOrder::new(
                "population".to_string(),
                FirestoreQueryDirection::Ascending,
            )])
            .start_after_doc(&doc("p/d/documents/cities/SF", vec![("population", 42)]))
            .unwrap();

        match params.start_at {
            Some(FirestoreQueryCursor::AfterValue(ref values)) => {
                assert_eq!(values.len(), 2);
                assert!(matches!(
                    values[0].value.value_type,
                    Some(value::ValueType::IntegerValue(42))
                ));
                assert!(matches!(
                    values[1].value.value_type,
                    Some(value::ValueType::ReferenceValue(_))
                ));
            }
            ref other => panic!("Unexpected cursor: {other:?}"),
        }
    }

    #[test]
    fn test_cursor_from_doc_missing_field_rejected() {
        let result = test_params()
            .with_order_by(vec![FirestoreQueryOrder::new(
                "population".to_string(),
                FirestoreQueryDirection::Ascending,
            )])
            .start_at_doc(&doc("p/d/documents/cities/SF", vec![("other", 1)]));
        assert!(matches!(
            result,
            Err(crate::FirestoreError::InvalidParametersError(_))
        ));
    }
}
