use crate::db::safe_document_path;
use crate::errors::firestore_err_to_backoff;
use crate::*;
use futures::TryFutureExt;
use gcloud_sdk::google::firestore::v1::{BatchWriteRequest, CommitRequest, Write};
use rsb_derive::Builder;
use serde::Serialize;
use std::collections::HashMap;
use tracing::*;

/// Accumulates writes and commits them atomically through the `Commit` RPC.
/// Unlike the bulk writer there is no batching policy here: everything added
/// lands in a single atomic commit.
pub struct FirestoreWriteBatch<'a> {
    pub db: &'a FirestoreDb,
    pub writes: Vec<Write>,
    batch_span: Span,
}

impl<'a> FirestoreWriteBatch<'a> {
    pub(crate) fn new(db: &'a FirestoreDb) -> Self {
        Self {
            db,
            writes: Vec::new(),
            batch_span: span!(Level::DEBUG, "Firestore WriteBatch"),
        }
    }

    #[inline]
    pub fn add<I>(&mut self, write: I) -> FirestoreResult<&mut Self>
    where
        I: TryInto<Write, Error = FirestoreError>,
    {
        self.writes.push(write.try_into()?);
        Ok(self)
    }

    pub fn create_obj<T, S>(
        &mut self,
        collection_id: &str,
        document_id: S,
        obj: &T,
    ) -> FirestoreResult<&mut Self>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        self.create_obj_at(
            self.db.get_documents_path().clone().as_str(),
            collection_id,
            document_id,
            obj,
        )
    }

    pub fn create_obj_at<T, S>(
        &mut self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        obj: &T,
    ) -> FirestoreResult<&mut Self>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        let document_path = safe_document_path(parent, collection_id, document_id.as_ref())?;
        self.add(FirestoreWrite::Create {
            document_path,
            fields: firestore_fields_from_serializable(obj)?,
            transforms: vec![],
        })
    }

    pub fn set_obj<T, S>(
        &mut self,
        collection_id: &str,
        document_id: S,
        obj: &T,
        mode: FirestoreSetMode,
    ) -> FirestoreResult<&mut Self>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        self.set_obj_at(
            self.db.get_documents_path().clone().as_str(),
            collection_id,
            document_id,
            obj,
            mode,
        )
    }

    pub fn set_obj_at<T, S>(
        &mut self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        obj: &T,
        mode: FirestoreSetMode,
    ) -> FirestoreResult<&mut Self>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        let document_path = safe_document_path(parent, collection_id, document_id.as_ref())?;
        self.add(FirestoreWrite::Set {
            document_path,
            fields: firestore_fields_from_serializable(obj)?,
            mode,
            transforms: vec![],
        })
    }

    pub fn update_fields<S>(
        &mut self,
        collection_id: &str,
        document_id: S,
        field_values: Vec<(FirestoreFieldPath, FirestoreUpdateValue)>,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<&mut Self>
    where
        S: AsRef<str>,
    {
        self.update_fields_at(
            self.db.get_documents_path().clone().as_str(),
            collection_id,
            document_id,
            field_values,
            precondition,
        )
    }

    pub fn update_fields_at<S>(
        &mut self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        field_values: Vec<(FirestoreFieldPath, FirestoreUpdateValue)>,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<&mut Self>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(parent, collection_id, document_id.as_ref())?;
        self.add(FirestoreWrite::Update {
            document_path,
            field_values,
            precondition,
        })
    }

    pub fn delete_by_id<S>(
        &mut self,
        collection_id: &str,
        document_id: S,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<&mut Self>
    where
        S: AsRef<str>,
    {
        self.delete_by_id_at(
            self.db.get_documents_path().clone().as_str(),
            collection_id,
            document_id,
            precondition,
        )
    }

    pub fn delete_by_id_at<S>(
        &mut self,
        parent: &str,
        collection_id: &str,
        document_id: S,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<&mut Self>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(parent, collection_id, document_id.as_ref())?;
        self.add(FirestoreWrite::Delete {
            document_path,
            precondition,
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub async fn commit(self) -> FirestoreResult<FirestoreCommitResponse> {
        let request = gcloud_sdk::tonic::Request::new(CommitRequest {
            database: self.db.get_database_path().clone(),
            writes: self.writes,
            transaction: vec![],
        });

        let response = self.db.client().get().commit(request).await?.into_inner();
        let commit_response: FirestoreCommitResponse = response.try_into()?;

        self.batch_span.in_scope(|| {
            debug!(
                writes = commit_response.write_results.len(),
                "Write batch has been committed."
            );
        });

        Ok(commit_response)
    }
}

/// Per-write results of a non-atomic `BatchWrite` round.
#[derive(Debug, PartialEq, Clone, Builder)]
pub struct FirestoreBatchWriteResponse {
    pub write_results: Vec<FirestoreWriteResult>,
    pub statuses: Vec<gcloud_sdk::google::rpc::Status>,
}

impl FirestoreDb {
    pub fn new_write_batch(&self) -> FirestoreWriteBatch {
        FirestoreWriteBatch::new(self)
    }

    /// Commits a single write; convenience door for one-off document CRUD.
    pub async fn commit_write<I>(&self, write: I) -> FirestoreResult<FirestoreCommitResponse>
    where
        I: TryInto<Write, Error = FirestoreError>,
    {
        let mut batch = self.new_write_batch();
        batch.add(write)?;
        batch.commit().await
    }

    /// Sends writes through the `BatchWrite` RPC in one round: statuses are
    /// per write and there is no atomicity across them. Transient failures of
    /// the whole round retry with exponential backoff. For sustained
    /// ingestion prefer the bulk writer, which also batches and rate-limits.
    pub async fn simple_batch_write<I>(
        &self,
        writes: I,
    ) -> FirestoreResult<FirestoreBatchWriteResponse>
    where
        I: IntoIterator,
        I::Item: TryInto<Write, Error = FirestoreError>,
    {
        let encoded: Vec<Write> = writes
            .into_iter()
            .map(|write| write.try_into())
            .collect::<FirestoreResult<Vec<Write>>>()?;

        let request = BatchWriteRequest {
            database: self.get_database_path().to_string(),
            writes: encoded,
            labels: HashMap::new(),
        };

        backoff::future::retry(backoff::ExponentialBackoff::default(), || {
            async {
                let response = self
                    .client()
                    .get()
                    .batch_write(request.clone())
                    .await
                    .map_err(FirestoreError::from)?
                    .into_inner();

                let write_results: Vec<FirestoreWriteResult> = response
                    .write_results
                    .into_iter()
                    .map(|s| s.try_into())
                    .collect::<FirestoreResult<Vec<FirestoreWriteResult>>>()?;

                Ok(FirestoreBatchWriteResponse::new(
                    write_results,
                    response.status,
                ))
            }
            .map_err(firestore_err_to_backoff)
        })
        .await
    }
}
