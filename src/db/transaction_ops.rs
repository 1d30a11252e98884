use crate::*;
use chrono::prelude::*;
use futures::TryStreamExt;
use gcloud_sdk::google::firestore::v1::*;
use std::collections::HashMap;
use tracing::*;

/// Read consistency inside a transaction attempt. Exactly one of the trio
/// travels with each read: an already acquired id, an explicit snapshot time,
/// or a request to open a new transaction whose id comes back in the stream.
#[derive(Debug, Clone)]
pub(crate) enum FirestoreTransactionConsistency {
    Existing(FirestoreTransactionId),
    ReadTime(DateTime<Utc>),
    New(FirestoreTransactionOptions),
}

impl FirestoreTransactionConsistency {
    fn batch_get_selector(
        &self,
    ) -> FirestoreResult<batch_get_documents_request::ConsistencySelector> {
        Ok(match self {
            FirestoreTransactionConsistency::Existing(tid) => {
                batch_get_documents_request::ConsistencySelector::Transaction(tid.clone())
            }
            FirestoreTransactionConsistency::ReadTime(ts) => {
                batch_get_documents_request::ConsistencySelector::ReadTime(
                    crate::timestamp_utils::to_timestamp(*ts),
                )
            }
            FirestoreTransactionConsistency::New(options) => {
                batch_get_documents_request::ConsistencySelector::NewTransaction(
                    options.try_into()?,
                )
            }
        })
    }

    fn run_query_selector(&self) -> FirestoreResult<run_query_request::ConsistencySelector> {
        Ok(match self {
            FirestoreTransactionConsistency::Existing(tid) => {
                run_query_request::ConsistencySelector::Transaction(tid.clone())
            }
            FirestoreTransactionConsistency::ReadTime(ts) => {
                run_query_request::ConsistencySelector::ReadTime(
                    crate::timestamp_utils::to_timestamp(*ts),
                )
            }
            FirestoreTransactionConsistency::New(options) => {
                run_query_request::ConsistencySelector::NewTransaction(options.try_into()?)
            }
        })
    }

    fn run_aggregation_selector(
        &self,
    ) -> FirestoreResult<run_aggregation_query_request::ConsistencySelector> {
        Ok(match self {
            FirestoreTransactionConsistency::Existing(tid) => {
                run_aggregation_query_request::ConsistencySelector::Transaction(tid.clone())
            }
            FirestoreTransactionConsistency::ReadTime(ts) => {
                run_aggregation_query_request::ConsistencySelector::ReadTime(
                    crate::timestamp_utils::to_timestamp(*ts),
                )
            }
            FirestoreTransactionConsistency::New(options) => {
                run_aggregation_query_request::ConsistencySelector::NewTransaction(
                    options.try_into()?,
                )
            }
        })
    }
}

fn captured_transaction_id(raw: Vec<u8>) -> Option<FirestoreTransactionId> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

impl FirestoreDb {
    /// Materialized `BatchGetDocuments` read that also surfaces the
    /// transaction id the server opened for a `New` consistency.
    pub(crate) async fn transactional_batch_get(
        &self,
        full_doc_paths: Vec<String>,
        return_only_fields: Option<Vec<String>>,
        consistency: &FirestoreTransactionConsistency,
    ) -> FirestoreResult<(
        Vec<(String, Option<Document>)>,
        Option<FirestoreTransactionId>,
    )> {
        let span = span!(
            Level::DEBUG,
            "Firestore Transactional Batch Get",
            "/firestore/ids_count" = full_doc_paths.len()
        );

        let request = gcloud_sdk::tonic::Request::new(BatchGetDocumentsRequest {
            database: self.get_database_path().clone(),
            documents: full_doc_paths,
            consistency_selector: Some(consistency.batch_get_selector()?),
            mask: return_only_fields.map(|vf| DocumentMask {
                field_paths: vf.iter().map(|f| f.to_string()).collect(),
            }),
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

        let mut transaction_id: Option<FirestoreTransactionId> = None;
        let mut docs: Vec<(String, Option<Document>)> = Vec::with_capacity(responses.len());

        for response in responses {
            if transaction_id.is_none() {
                transaction_id = captured_transaction_id(response.transaction);
            }
            if let Some(result) = response.result {
                match result {
                    batch_get_documents_response::Result::Found(document) => {
                        let doc_id =
                            crate::db::split_document_path(document.name.as_str()).1.to_string();
                        docs.push((doc_id, Some(document)));
                    }
                    batch_get_documents_response::Result::Missing(full_doc_id) => {
                        let (_, doc_id) = crate::db::split_document_path(full_doc_id.as_str());
                        docs.push((doc_id.to_string(), None));
                    }
                }
            }
        }

        span.in_scope(|| debug!(docs = docs.len(), "Transactional batch get finished."));

        Ok((docs, transaction_id))
    }

    /// Materialized `RunQuery` read capturing the transaction id from the
    /// first stream element carrying one. Limit-to-last queries come back in
    /// user order.
    pub(crate) async fn transactional_query(
        &self,
        params: FirestoreQueryParams,
        consistency: &FirestoreTransactionConsistency,
    ) -> FirestoreResult<(Vec<Document>, Option<FirestoreTransactionId>)> {
        let limit_type = params.limit_type.clone();

        let request = gcloud_sdk::tonic::Request::new(RunQueryRequest {
            parent: params
                .parent
                .as_ref()
                .unwrap_or_else(|| self.get_documents_path())
                .clone(),
            consistency_selector: Some(consistency.run_query_selector()?),
            query_type: Some(run_query_request::QueryType::StructuredQuery(
                params.to_structured_query()?,
            )),
            ..Default::default()
        });

        let responses: Vec<RunQueryResponse> = self
            .client()
            .get()
            .run_query(request)
            .await
            .map_err(FirestoreError::from)?
            .into_inner()
            .map_err(FirestoreError::from)
            .try_collect()
            .await?;

        let mut transaction_id: Option<FirestoreTransactionId> = None;
        let mut docs: Vec<Document> = Vec::with_capacity(responses.len());

        for response in responses {
            if transaction_id.is_none() {
                transaction_id = captured_transaction_id(response.transaction);
            }
            if let Some(document) = response.document {
                docs.push(document);
            }
        }

        if limit_type == FirestoreQueryLimitType::Last {
            docs.reverse();
        }

        Ok((docs, transaction_id))
    }

    /// Materialized `RunAggregationQuery` read with transaction id capture.
    pub(crate) async fn transactional_aggregated_query(
        &self,
        params: FirestoreAggregatedQueryParams,
        consistency: &FirestoreTransactionConsistency,
    ) -> FirestoreResult<(HashMap<String, Value>, Option<FirestoreTransactionId>)> {
        let mut request = self.create_aggregated_query_request(params)?.into_inner();
        request.consistency_selector = Some(consistency.run_aggregation_selector()?);

        let responses: Vec<RunAggregationQueryResponse> = self
            .client()
            .get()
            .run_aggregation_query(gcloud_sdk::tonic::Request::new(request))
            .await
            .map_err(FirestoreError::from)?
            .into_inner()
            .map_err(FirestoreError::from)
            .try_collect()
            .await?;

        let mut transaction_id: Option<FirestoreTransactionId> = None;
        let mut fields: HashMap<String, Value> = HashMap::new();

        for response in responses {
            if transaction_id.is_none() {
                transaction_id = captured_transaction_id(response.transaction);
            }
            if let Some(result) = response.result {
                fields.extend(result.aggregate_fields);
            }
        }

        Ok((fields, transaction_id))
    }

    pub(crate) async fn rollback_transaction(
        &self,
        transaction_id: FirestoreTransactionId,
    ) -> FirestoreResult<()> {
        let request = gcloud_sdk::tonic::Request::new(RollbackRequest {
            database: self.get_database_path().clone(),
            transaction: transaction_id,
        });

        self.client().get().rollback(request).await?;
        Ok(())
    }
}
