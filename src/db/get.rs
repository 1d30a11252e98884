use crate::db::safe_document_path;
use crate::errors::*;
use crate::*;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use futures::{future, StreamExt};
use gcloud_sdk::google::firestore::v1::*;
use serde::Deserialize;
use tracing::*;

#[async_trait]
pub trait FirestoreGetByIdSupport {
    async fn get_doc<S>(
        &self,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Document>
    where
        S: AsRef<str> + Send;

    async fn get_doc_at<S>(
        &self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Document>
    where
        S: AsRef<str> + Send;

    async fn get_obj<T, S>(&self, collection_id: &str, document_id: S) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send;

    async fn get_obj_at<T, S>(
        &self,
        parent: &str,
        collection_id: &str,
        document_id: S,
    ) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send;

    async fn get_obj_if_exists<T, S>(
        &self,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Option<T>>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send;

    async fn batch_stream_get_docs<S, I>(
        &self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<(String, Option<Document>)>>
    where
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send;

    async fn batch_stream_get_docs_with_errors<S, I>(
        &self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<FirestoreResult<(String, Option<Document>)>>>
    where
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send;

    async fn batch_stream_get_objects<'a, T, S, I>(
        &'a self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<'a, (String, Option<T>)>>
    where
        for<'de> T: Deserialize<'de> + Send + 'a,
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send;

    async fn batch_stream_get_objects_with_errors<'a, T, S, I>(
        &'a self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<'a, FirestoreResult<(String, Option<T>)>>>
    where
        for<'de> T: Deserialize<'de> + Send + 'a,
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send;
}

#[async_trait]
impl FirestoreGetByIdSupport for FirestoreDb {
    async fn get_doc_at<S>(
        &self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Document>
    where
        S: AsRef<str> + Send,
    {
        let document_path = safe_document_path(parent, collection_id, document_id.as_ref())?;
        self.get_doc_by_path(document_path, return_only_fields).await
    }

    async fn get_doc<S>(
        &self,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Document>
    where
        S: AsRef<str> + Send,
    {
        self.get_doc_at(
            self.get_documents_path().as_str(),
            collection_id,
            document_id,
            return_only_fields,
        )
        .await
    }

    async fn get_obj<T, S>(&self, collection_id: &str, document_id: S) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send,
    {
        self.get_obj_at(
            self.get_documents_path().as_str(),
            collection_id,
            document_id,
        )
        .await
    }

    async fn get_obj_at<T, S>(
        &self,
        parent: &str,
        collection_id: &str,
        document_id: S,
    ) -> FirestoreResult<T>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send,
    {
        let doc: Document = self
            .get_doc_at(parent, collection_id, document_id, None)
            .await?;

        Self::deserialize_doc_to(&doc)
    }

    async fn get_obj_if_exists<T, S>(
        &self,
        collection_id: &str,
        document_id: S,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Option<T>>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str> + Send,
    {
        match self
            .get_doc(collection_id, document_id, return_only_fields)
            .await
        {
            Ok(doc) => Ok(Some(Self::deserialize_doc_to(&doc)?)),
            Err(FirestoreError::DataNotFoundError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn batch_stream_get_docs_with_errors<S, I>(
        &self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<FirestoreResult<(String, Option<Document>)>>>
    where
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send,
    {
        let full_doc_ids: Vec<String> = document_ids
            .into_iter()
            .map(|document_id| {
                safe_document_path(
                    self.get_documents_path(),
                    collection_id,
                    document_id.as_ref(),
                )
            })
            .collect::<FirestoreResult<Vec<String>>>()?;

        self.get_docs_by_ids(collection_id, full_doc_ids, return_only_fields)
            .await
    }

    async fn batch_stream_get_docs<S, I>(
        &self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<(String, Option<Document>)>>
    where
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send,
    {
        let doc_stream = self
            .batch_stream_get_docs_with_errors(collection_id, document_ids, return_only_fields)
            .await?;

        Ok(Box::pin(doc_stream.filter_map(|doc_res| {
            future::ready(match doc_res {
                Ok(doc_pair) => Some(doc_pair),
                Err(err) => {
                    error!(%err, "Error occurred while consuming batch get as a stream.");
                    None
                }
            })
        })))
    }

    async fn batch_stream_get_objects<'a, T, S, I>(
        &'a self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<'a, (String, Option<T>)>>
    where
        for<'de> T: Deserialize<'de> + Send + 'a,
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send,
    {
        let doc_stream = self
            .batch_stream_get_docs(collection_id, document_ids, return_only_fields)
            .await?;

        Ok(Box::pin(doc_stream.filter_map(
            |(doc_id, maybe_doc)| async move {
                match maybe_doc {
                    Some(doc) => match Self::deserialize_doc_to(&doc) {
                        Ok(obj) => Some((doc_id, Some(obj))),
                        Err(err) => {
                            error!(
                                %err,
                                doc_id,
                                "Error occurred while converting batch get document.",
                            );
                            None
                        }
                    },
                    None => Some((doc_id, None)),
                }
            },
        )))
    }

    async fn batch_stream_get_objects_with_errors<'a, T, S, I>(
        &'a self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<'a, FirestoreResult<(String, Option<T>)>>>
    where
        for<'de> T: Deserialize<'de> + Send + 'a,
        S: AsRef<str> + Send,
        I: IntoIterator<Item = S> + Send,
    {
        let doc_stream = self
            .batch_stream_get_docs_with_errors(collection_id, document_ids, return_only_fields)
            .await?;

        Ok(Box::pin(doc_stream.and_then(|(doc_id, maybe_doc)| {
            future::ready({
                maybe_doc
                    .map(|doc| Self::deserialize_doc_to::<T>(&doc))
                    .transpose()
                    .map(|obj| (doc_id, obj))
            })
        })))
    }
}

impl FirestoreDb {
    pub(crate) fn get_doc_by_path(
        &self,
        document_path: String,
        return_only_fields: Option<Vec<String>>,
    ) -> BoxFuture<FirestoreResult<Document>> {
        self.get_doc_by_path_with_retries(document_path, return_only_fields, 0)
    }

    fn get_doc_by_path_with_retries(
        &self,
        document_path: String,
        return_only_fields: Option<Vec<String>>,
        retries: usize,
    ) -> BoxFuture<FirestoreResult<Document>> {
        async move {
            let span = span!(
                Level::DEBUG,
                "Firestore Get Doc",
                "/firestore/document_name" = document_path.as_str(),
                "/firestore/response_time" = field::Empty
            );

            let begin_query_utc = chrono::Utc::now();

            let result = self
                .batch_get_by_paths(vec![document_path.clone()], &return_only_fields)
                .await
                .and_then(|found| {
                    found
                        .into_iter()
                        .next()
                        .and_then(|(_, maybe_doc)| maybe_doc)
                        .ok_or_else(|| {
                            FirestoreError::DataNotFoundError(FirestoreDataNotFoundError::new(
                                FirestoreErrorPublicGenericDetails::new(
                                    FirestoreErrorCode::NotFound,
                                ),
                                format!("Document {document_path} is not found"),
                            ))
                        })
                });

            let query_duration = chrono::Utc::now().signed_duration_since(begin_query_utc);
            span.record(
                "/firestore/response_time",
                query_duration.num_milliseconds(),
            );

            match result {
                Ok(doc) => {
                    span.in_scope(|| {
                        debug!(
                            duration_milliseconds = query_duration.num_milliseconds(),
                            "Read a document.",
                        );
                    });
                    Ok(doc)
                }
                Err(err) => match err {
                    FirestoreError::DatabaseError(ref db_err)
                        if db_err.retry_possible && retries < self.get_options().max_retries =>
                    {
                        span.in_scope(|| {
                            warn!(
                                err = %db_err,
                                current_retry = retries + 1,
                                max_retries = self.get_options().max_retries,
                                "Failed to read a document. Retrying up to the specified number of times.",
                            );
                        });
                        self.get_doc_by_path_with_retries(
                            document_path,
                            return_only_fields,
                            retries + 1,
                        )
                        .await
                    }
                    _ => Err(err),
                },
            }
        }
        .boxed()
    }

    pub(crate) async fn batch_get_by_paths(
        &self,
        full_doc_paths: Vec<String>,
        return_only_fields: &Option<Vec<String>>,
    ) -> FirestoreResult<Vec<(String, Option<Document>)>> {
        let stream = self
            .get_docs_by_ids("", full_doc_paths, return_only_fields.clone())
            .await?;
        stream.try_collect().await
    }

    pub(crate) async fn get_docs_by_ids(
        &self,
        collection_id: &str,
        full_doc_ids: Vec<String>,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<BoxStream<FirestoreResult<(String, Option<Document>)>>> {
        let span = span!(
            Level::DEBUG,
            "Firestore Batch Get",
            "/firestore/collection_name" = collection_id,
            "/firestore/ids_count" = full_doc_ids.len()
        );

        let request = gcloud_sdk::tonic::Request::new(BatchGetDocumentsRequest {
            database: self.get_database_path().clone(),
            documents: full_doc_ids,
            consistency_selector: self
                .get_session_params()
                .consistency_selector
                .as_ref()
                .map(|selector| selector.try_into())
                .transpose()?,
            mask: return_only_fields.map(|vf| DocumentMask {
                field_paths: vf.iter().map(|f| f.to_string()).collect(),
            }),
        });

        match self.client().get().batch_get_documents(request).await {
            Ok(response) => {
                span.in_scope(|| debug!("Start consuming a batch of documents by ids."));
                let stream = response
                    .into_inner()
                    .filter_map(|r| {
                        future::ready(match r {
                            Ok(doc_response) => doc_response.result.map(|doc_res| match doc_res {
                                batch_get_documents_response::Result::Found(document) => {
                                    let doc_id = document
                                        .name
                                        .split('/')
                                        .next_back()
                                        .map(|s| s.to_string())
                                        .unwrap_or_else(|| document.name.clone());
                                    Ok((doc_id, Some(document)))
                                }
                                batch_get_documents_response::Result::Missing(full_doc_id) => {
                                    let doc_id = full_doc_id
                                        .split('/')
                                        .next_back()
                                        .map(|s| s.to_string())
                                        .unwrap_or(full_doc_id);
                                    Ok((doc_id, None))
                                }
                            }),
                            Err(err) => Some(Err(err.into())),
                        })
                    })
                    .boxed();
                Ok(stream)
            }
            Err(err) => Err(err.into()),
        }
    }
}
