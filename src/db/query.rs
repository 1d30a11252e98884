use crate::errors::invalid_argument;
use crate::*;
use async_trait::async_trait;
use chrono::prelude::*;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use futures::TryFutureExt;
use futures::TryStreamExt;
use futures::{future, StreamExt};
use gcloud_sdk::google::firestore::v1::*;
use rand::RngExt;
use serde::Deserialize;
use tracing::*;

#[async_trait]
pub trait FirestoreQuerySupport {
    async fn query_doc(&self, params: FirestoreQueryParams) -> FirestoreResult<Vec<Document>>;

    async fn stream_query_doc<'b>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, Document>>;

    async fn stream_query_doc_with_errors<'b>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<Document>>>;

    async fn query_obj<T>(&self, params: FirestoreQueryParams) -> FirestoreResult<Vec<T>>
    where
        for<'de> T: Deserialize<'de>;

    async fn stream_query_obj<'b, T>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, T>>
    where
        for<'de> T: Deserialize<'de>,
        T: Send + 'b;

    async fn stream_query_obj_with_errors<'b, T>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<T>>>
    where
        for<'de> T: Deserialize<'de>,
        T: Send + 'b;
}

impl FirestoreDb {
    pub(crate) fn create_query_request(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<gcloud_sdk::tonic::Request<RunQueryRequest>> {
        Ok(gcloud_sdk::tonic::Request::new(RunQueryRequest {
            parent: params
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
            query_type: Some(run_query_request::QueryType::StructuredQuery(
                params.to_structured_query()?,
            )),
            ..Default::default()
        }))
    }

    fn stream_query_doc_with_retries<'b>(
        &self,
        params: FirestoreQueryParams,
        retries: usize,
        span: Span,
    ) -> BoxFuture<FirestoreResult<BoxStream<'b, FirestoreResult<Option<Document>>>>> {
        async move {
            let query_request = self.create_query_request(params.clone())?;
            let begin_query_utc: DateTime<Utc> = Utc::now();

            match self
                .client()
                .get()
                .run_query(query_request)
                .map_err(|e| e.into())
                .await
            {
                Ok(query_response) => {
                    let query_stream = query_response
                        .into_inner()
                        .map_ok(|r| r.document)
                        .map_err(|e| e.into())
                        .boxed();

                    let end_query_utc: DateTime<Utc> = Utc::now();
                    let query_duration = end_query_utc.signed_duration_since(begin_query_utc);

                    span.record(
                        "/firestore/response_time",
                        query_duration.num_milliseconds(),
                    );
                    span.in_scope(|| {
                        debug!(
                            collection_id = ?params.collection_id,
                            duration_milliseconds = query_duration.num_milliseconds(),
                            "Queried stream of documents.",
                        );
                    });

                    Ok(query_stream)
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
                            "Failed to stream query. Retrying up to the specified number of times.",
                        );

                        tokio::time::sleep(sleep_duration).await;

                        self.stream_query_doc_with_retries(params, retries + 1, span)
                            .await
                    }
                    _ => Err(err),
                },
            }
        }
        .boxed()
    }

    fn ensure_streamable(params: &FirestoreQueryParams) -> FirestoreResult<()> {
        if params.limit_type == FirestoreQueryLimitType::Last {
            Err(invalid_argument(
                "limit_to_last",
                "Limit-to-last queries must be materialized; use query_doc/query_obj instead of streaming",
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FirestoreQuerySupport for FirestoreDb {
    async fn query_doc(&self, params: FirestoreQueryParams) -> FirestoreResult<Vec<Document>> {
        let limit_type = params.limit_type.clone();

        let collection_str = params.collection_id.to_string();
        let span = span!(
            Level::DEBUG,
            "Firestore Query",
            "/firestore/collection_name" = collection_str.as_str(),
            "/firestore/response_time" = field::Empty
        );

        let doc_stream = self.stream_query_doc_with_retries(params, 0, span).await?;
        let mut docs: Vec<Document> = doc_stream
            .try_filter_map(|maybe_doc| future::ready(Ok(maybe_doc)))
            .try_collect()
            .await?;

        // Wire order is reversed for limit-to-last; restore the user's view
        if limit_type == FirestoreQueryLimitType::Last {
            docs.reverse();
        }

        Ok(docs)
    }

    async fn stream_query_doc<'b>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, Document>> {
        let doc_stream = self.stream_query_doc_with_errors(params).await?;

        Ok(Box::pin(doc_stream.filter_map(|doc_res| {
            future::ready(match doc_res {
                Ok(doc) => Some(doc),
                Err(err) => {
                    error!(%err, "Error occurred while consuming query.");
                    None
                }
            })
        })))
    }

    async fn stream_query_doc_with_errors<'b>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<Document>>> {
        Self::ensure_streamable(&params)?;

        let collection_str = params.collection_id.to_string();

        let span = span!(
            Level::DEBUG,
            "Firestore Streaming Query",
            "/firestore/collection_name" = collection_str.as_str(),
            "/firestore/response_time" = field::Empty
        );

        let doc_stream = self.stream_query_doc_with_retries(params, 0, span).await?;

        Ok(Box::pin(doc_stream.filter_map(|doc_res| {
            future::ready(match doc_res {
                Ok(maybe_doc) => maybe_doc.map(Ok),
                Err(err) => {
                    error!(%err, "Error occurred while consuming query.");
                    Some(Err(err))
                }
            })
        })))
    }

    async fn query_obj<T>(&self, params: FirestoreQueryParams) -> FirestoreResult<Vec<T>>
    where
        for<'de> T: Deserialize<'de>,
    {
        let doc_vec = self.query_doc(params).await?;
        doc_vec
            .iter()
            .map(|doc| Self::deserialize_doc_to(doc))
            .collect()
    }

    async fn stream_query_obj<'b, T>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, T>>
    where
        for<'de> T: Deserialize<'de>,
        T: Send + 'b,
    {
        let doc_stream = self.stream_query_doc(params).await?;
        Ok(Box::pin(doc_stream.filter_map(|doc| async move {
            match Self::deserialize_doc_to::<T>(&doc) {
                Ok(obj) => Some(obj),
                Err(err) => {
                    error!(
                        %err,
                        "Error occurred while converting query document in a stream. Document: {}",
                        doc.name
                    );
                    None
                }
            }
        })))
    }

    async fn stream_query_obj_with_errors<'b, T>(
        &self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<BoxStream<'b, FirestoreResult<T>>>
    where
        for<'de> T: Deserialize<'de>,
        T: Send + 'b,
    {
        let doc_stream = self.stream_query_doc_with_errors(params).await?;
        Ok(Box::pin(doc_stream.and_then(|doc| {
            future::ready(Self::deserialize_doc_to::<T>(&doc))
        })))
    }
}
