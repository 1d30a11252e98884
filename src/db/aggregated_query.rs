#![allow(clippy::derive_partial_eq_without_eq)] // Proto-derived members don't implement Eq

use crate::errors::invalid_argument;
use crate::{FirestoreDb, FirestoreError, FirestoreQueryParams, FirestoreResult, FirestoreValue};
use async_trait::async_trait;
use chrono::prelude::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use futures::TryFutureExt;
use futures::TryStreamExt;
use gcloud_sdk::google::firestore::v1::*;
use rand::RngExt;
use rsb_derive::*;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::*;

/// The server caps aggregations per request.
pub const FIRESTORE_MAX_AGGREGATIONS_PER_QUERY: usize = 3;

pub const FIRESTORE_AGGREGATION_COUNT_ALIAS: &str = "count";

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreAggregatedQueryParams {
    pub query_params: FirestoreQueryParams,
    pub aggregations: Vec<FirestoreAggregation>,
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreAggregation {
    pub alias: String,
    pub operator: Option<FirestoreAggregationOperator>,
}

impl FirestoreAggregation {
    /// Counts matching documents under the fixed `count` alias.
    pub fn count() -> Self {
        Self::new(FIRESTORE_AGGREGATION_COUNT_ALIAS.to_string())
            .with_operator(FirestoreAggregationOperator::Count(
                FirestoreAggregationOperatorCount::new(),
            ))
    }

    /// Sums a numeric field under the `sum_<field>` alias.
    pub fn sum<S: AsRef<str>>(field_name: S) -> Self {
        Self::new(format!("sum_{}", field_name.as_ref())).with_operator(
            FirestoreAggregationOperator::Sum(FirestoreAggregationOperatorSum::new(
                field_name.as_ref().to_string(),
            )),
        )
    }

    /// Averages a numeric field under the `avg_<field>` alias.
    pub fn avg<S: AsRef<str>>(field_name: S) -> Self {
        Self::new(format!("avg_{}", field_name.as_ref())).with_operator(
            FirestoreAggregationOperator::Avg(FirestoreAggregationOperatorAvg::new(
                field_name.as_ref().to_string(),
            )),
        )
    }
}

impl From<&FirestoreAggregation> for structured_aggregation_query::Aggregation {
    fn from(aggregation: &FirestoreAggregation) -> Self {
        structured_aggregation_query::Aggregation {
            alias: aggregation.alias.clone(),
            operator: aggregation.operator.as_ref().map(|agg| agg.into()),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum FirestoreAggregationOperator {
    Count(FirestoreAggregationOperatorCount),
    Sum(FirestoreAggregationOperatorSum),
    Avg(FirestoreAggregationOperatorAvg),
}

impl From<&FirestoreAggregationOperator> for structured_aggregation_query::aggregation::Operator {
    fn from(op: &FirestoreAggregationOperator) -> Self {
        match op {
            FirestoreAggregationOperator::Count(opts) => {
                structured_aggregation_query::aggregation::Operator::Count(opts.into())
            }
            FirestoreAggregationOperator::Sum(opts) => {
                structured_aggregation_query::aggregation::Operator::Sum(opts.into())
            }
            FirestoreAggregationOperator::Avg(opts) => {
                structured_aggregation_query::aggregation::Operator::Avg(opts.into())
            }
        }
    }
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreAggregationOperatorCount {
    pub up_to: Option<usize>,
}

impl From<&FirestoreAggregationOperatorCount> for structured_aggregation_query::aggregation::Count {
    fn from(cnt: &FirestoreAggregationOperatorCount) -> Self {
        structured_aggregation_query::aggregation::Count {
            up_to: cnt.up_to.map(|v| v as i64),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreAggregationOperatorSum {
    pub field_name: String,
}

impl From<&FirestoreAggregationOperatorSum> for structured_aggregation_query::aggregation::Sum {
    fn from(operator: &FirestoreAggregationOperatorSum) -> Self {
        structured_aggregation_query::aggregation::Sum {
            field: Some(structured_query::FieldReference {
                field_path: operator.field_name.clone(),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreAggregationOperatorAvg {
    pub field_name: String,
}

impl From<&FirestoreAggregationOperatorAvg> for structured_aggregation_query::aggregation::Avg {
    fn from(operator: &FirestoreAggregationOperatorAvg) -> Self {
        structured_aggregation_query::aggregation::Avg {
            field: Some(structured_query::FieldReference {
                field_path: operator.field_name.clone(),
            }),
        }
    }
}

/// Aggregate values decoded by alias. Integer results widen to `i64`;
/// `as_f64` additionally widens integers to doubles for mixed-type sums.
#[derive(Debug, PartialEq, Clone)]
pub struct FirestoreAggregateResult {
    fields: HashMap<String, FirestoreValue>,
}

impl FirestoreAggregateResult {
    pub(crate) fn from_fields(fields: HashMap<String, Value>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(alias, value)| (alias, FirestoreValue::from(value)))
                .collect(),
        }
    }

    pub fn get(&self, alias: &str) -> Option<&FirestoreValue> {
        self.fields.get(alias)
    }

    pub fn as_i64(&self, alias: &str) -> Option<i64> {
        match self.fields.get(alias).and_then(|v| v.value.value_type.as_ref()) {
            Some(value::ValueType::IntegerValue(v)) => Some(*v),
            Some(value::ValueType::DoubleValue(v)) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self, alias: &str) -> Option<f64> {
        match self.fields.get(alias).and_then(|v| v.value.value_type.as_ref()) {
            Some(value::ValueType::IntegerValue(v)) => Some(*v as f64),
            Some(value::ValueType::DoubleValue(v)) => Some(*v),
            _ => None,
        }
    }
}

#[async_trait]
pub trait FirestoreAggregatedQuerySupport {
    async fn aggregated_query(
        &self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<FirestoreAggregateResult>;

    async fn aggregated_query_obj<T>(
        &self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>;
}

#[async_trait]
impl FirestoreAggregatedQuerySupport for FirestoreDb {
    async fn aggregated_query(
        &self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<FirestoreAggregateResult> {
        let collection_str = params.query_params.collection_id.to_string();

        let span = span!(
            Level::DEBUG,
            "Firestore Aggregated Query",
            "/firestore/collection_name" = collection_str.as_str(),
            "/firestore/response_time" = field::Empty
        );

        let fields = self
            .aggregated_query_fields_with_retries(params, 0, &span)
            .await?;
        Ok(FirestoreAggregateResult::from_fields(fields))
    }

    async fn aggregated_query_obj<T>(
        &self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>,
    {
        let collection_str = params.query_params.collection_id.to_string();

        let span = span!(
            Level::DEBUG,
            "Firestore Aggregated Query",
            "/firestore/collection_name" = collection_str.as_str(),
            "/firestore/response_time" = field::Empty
        );

        let fields = self
            .aggregated_query_fields_with_retries(params, 0, &span)
            .await?;
        let doc = Document {
            name: "".to_string(),
            fields,
            create_time: None,
            update_time: None,
        };
        Self::deserialize_doc_to(&doc)
    }
}

impl FirestoreDb {
    pub(crate) fn create_aggregated_query_request(
        &self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<gcloud_sdk::tonic::Request<RunAggregationQueryRequest>> {
        if params.aggregations.is_empty() {
            return Err(invalid_argument(
                "aggregations",
                "An aggregation query requires at least one aggregation",
            ));
        }
        if params.aggregations.len() > FIRESTORE_MAX_AGGREGATIONS_PER_QUERY {
            return Err(invalid_argument(
                "aggregations",
                format!(
                    "The API supports at most {FIRESTORE_MAX_AGGREGATIONS_PER_QUERY} aggregations per query"
                ),
            ));
        }

        Ok(gcloud_sdk::tonic::Request::new(RunAggregationQueryRequest {
            parent: params
                .query_params
                .parent
                .as_ref()
                .unwrap_or_else(|| self.get_documents_path())
                .clone(),
            consistency_selector: self
                .get_session_params()
                .consistency_selector
                .as_ref()
                .map(|selector| selector.try_into())
                .transpose()?,
            query_type: Some(run_aggregation_query_request::QueryType::StructuredAggregationQuery(
                StructuredAggregationQuery {
                    aggregations: params.aggregations.iter().map(|agg| agg.into()).collect(),
                    query_type: Some(structured_aggregation_query::QueryType::StructuredQuery(
                        params.query_params.to_structured_query()?,
                    )),
                },
            )),
            ..Default::default()
        }))
    }

    fn aggregated_query_fields_with_retries<'a>(
        &'a self,
        params: FirestoreAggregatedQueryParams,
        retries: usize,
        span: &'a Span,
    ) -> BoxFuture<'a, FirestoreResult<HashMap<String, Value>>> {
        async move {
            let query_request = self.create_aggregated_query_request(params.clone())?;
            let begin_query_utc: DateTime<Utc> = Utc::now();

            match self
                .client()
                .get()
                .run_aggregation_query(query_request)
                .map_err(|e| e.into())
                .await
            {
                Ok(query_response) => {
                    let results: Vec<RunAggregationQueryResponse> = query_response
                        .into_inner()
                        .map_err(FirestoreError::from)
                        .try_collect()
                        .await?;

                    let end_query_utc: DateTime<Utc> = Utc::now();
                    let query_duration = end_query_utc.signed_duration_since(begin_query_utc);

                    span.record(
                        "/firestore/response_time",
                        query_duration.num_milliseconds(),
                    );
                    span.in_scope(|| {
                        debug!(
                            collection_id = ?params.query_params.collection_id,
                            duration_milliseconds = query_duration.num_milliseconds(),
                            "Ran aggregation query.",
                        );
                    });

                    Ok(results
                        .into_iter()
                        .find_map(|r| r.result.map(|agg_result| agg_result.aggregate_fields))
                        .unwrap_or_default())
                }
                Err(err) => match err {
                    FirestoreError::DatabaseError(ref db_err)
                        if db_err.retry_possible && retries < self.get_options().max_retries =>
                    {
                        let sleep_duration = tokio::time::Duration::from_millis(
                            rand::rng().random_range(0..2u64.pow(retries as u32) * 1000 + 1),
                        );
                        warn!(
                            err = %db_err,
                            current_retry = retries + 1,
                            max_retries = self.get_options().max_retries,
                            delay = sleep_duration.as_millis(),
                            "Failed to run aggregation query. Retrying up to the specified number of times.",
                        );

                        tokio::time::sleep(sleep_duration).await;

                        self.aggregated_query_fields_with_retries(params, retries + 1, span)
                            .await
                    }
                    _ => Err(err),
                },
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_aliases() {
        assert_eq!(FirestoreAggregation::count().alias, "count");
        assert_eq!(FirestoreAggregation::sum("v").alias, "sum_v");
        assert_eq!(FirestoreAggregation::avg("v").alias, "avg_v");
    }

    #[test]
    fn test_aggregate_result_widening() {
        let mut fields = HashMap::new();
        fields.insert(
            "sum_v".to_string(),
            Value {
                value_type: Some(value::ValueType::IntegerValue(40)),
            },
        );
        fields.insert(
            "avg_v".to_string(),
            Value {
                value_type: Some(value::ValueType::DoubleValue(20.0)),
            },
        );
        let result = FirestoreAggregateResult::from_fields(fields);
        assert_eq!(result.as_i64("sum_v"), Some(40));
        assert_eq!(result.as_f64("sum_v"), Some(40.0));
        assert_eq!(result.as_f64("avg_v"), Some(20.0));
        assert_eq!(result.as_i64("missing"), None);
    }
}
