use crate::db::safe_document_path;
use crate::db::transaction_ops::FirestoreTransactionConsistency;
use crate::errors::*;
use crate::*;
use futures::future::BoxFuture;
use gcloud_sdk::google::firestore::v1::{BeginTransactionRequest, CommitRequest, Write};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::*;

/// One attempt of a read-then-write transaction. Created lazily: the
/// transaction id is acquired from the first read's response stream (or by an
/// explicit [`FirestoreTransaction::begin`]). Reads are rejected once a write
/// has been queued, and writes are rejected in read-only mode.
pub struct FirestoreTransaction<'a> {
    db: &'a FirestoreDb,
    options: FirestoreTransactionOptions,
    transaction_id: Option<FirestoreTransactionId>,
    writes: Vec<Write>,
    transaction_span: Span,
    finished: bool,
}

impl<'a> FirestoreTransaction<'a> {
    pub(crate) fn new_lazy(
        db: &'a FirestoreDb,
        options: FirestoreTransactionOptions,
    ) -> FirestoreTransaction<'a> {
        let transaction_span = span!(
            Level::DEBUG,
            "Firestore Transaction",
            "/firestore/transaction_id" = field::Empty,
            "/firestore/commit_time" = field::Empty
        );

        Self {
            db,
            options,
            transaction_id: None,
            writes: Vec::new(),
            transaction_span,
            finished: false,
        }
    }

    /// Starts the transaction eagerly through `BeginTransaction` instead of
    /// piggybacking on the first read.
    pub async fn begin(
        db: &'a FirestoreDb,
        options: FirestoreTransactionOptions,
    ) -> FirestoreResult<FirestoreTransaction<'a>> {
        let mut transaction = Self::new_lazy(db, options);

        let request = gcloud_sdk::tonic::Request::new(BeginTransactionRequest {
            database: db.get_database_path().clone(),
            options: Some((&transaction.options).try_into()?),
        });

        let response = db
            .client()
            .get()
            .begin_transaction(request)
            .await?
            .into_inner();

        transaction.record_transaction_id(response.transaction);

        transaction.transaction_span.in_scope(|| {
            debug!(mode = ?transaction.options.mode, "Created a new transaction.");
        });

        Ok(transaction)
    }

    #[inline]
    pub fn transaction_id(&self) -> Option<&FirestoreTransactionId> {
        self.transaction_id.as_ref()
    }

    #[inline]
    pub fn db(&self) -> &'a FirestoreDb {
        self.db
    }

    #[inline]
    pub fn options(&self) -> &FirestoreTransactionOptions {
        &self.options
    }

    #[inline]
    pub fn has_written(&self) -> bool {
        !self.writes.is_empty()
    }

    fn record_transaction_id(&mut self, raw: Vec<u8>) {
        if self.transaction_id.is_none() && !raw.is_empty() {
            let mut hex_trans_id = hex::encode(&raw);
            hex_trans_id.truncate(16);
            self.transaction_span
                .record("/firestore/transaction_id", hex_trans_id);
            self.transaction_id = Some(raw);
        }
    }

    fn ensure_can_read(&self) -> FirestoreResult<()> {
        validate_read_order(self.has_written())
    }

    fn ensure_can_write(&self) -> FirestoreResult<()> {
        validate_write_allowed(&self.options.mode)
    }

    fn read_consistency(&self) -> FirestoreTransactionConsistency {
        match (&self.transaction_id, &self.options.mode) {
            (Some(tid), _) => FirestoreTransactionConsistency::Existing(tid.clone()),
            (None, FirestoreTransactionMode::ReadOnlyWithReadTime(read_time)) => {
                FirestoreTransactionConsistency::ReadTime(*read_time)
            }
            (None, _) => FirestoreTransactionConsistency::New(self.options.clone()),
        }
    }

    pub async fn get_doc<S>(
        &mut self,
        collection_id: &str,
        document_id: S,
    ) -> FirestoreResult<Option<gcloud_sdk::google::firestore::v1::Document>>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        let mut found = self.get_docs_by_paths(vec![document_path], None).await?;
        Ok(found.pop().and_then(|(_, maybe_doc)| maybe_doc))
    }

    pub async fn get_obj<T, S>(
        &mut self,
        collection_id: &str,
        document_id: S,
    ) -> FirestoreResult<Option<T>>
    where
        for<'de> T: Deserialize<'de>,
        S: AsRef<str>,
    {
        match self.get_doc(collection_id, document_id).await? {
            Some(doc) => Ok(Some(FirestoreDb::deserialize_doc_to(&doc)?)),
            None => Ok(None),
        }
    }

    /// Batched read with optional field masks; documents come back in the
    /// server's response order paired with their ids.
    pub async fn get_docs_by_paths(
        &mut self,
        full_doc_paths: Vec<String>,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Vec<(String, Option<gcloud_sdk::google::firestore::v1::Document>)>> {
        self.ensure_can_read()?;
        let consistency = self.read_consistency();
        let (docs, maybe_tx_id) = self
            .db
            .transactional_batch_get(full_doc_paths, return_only_fields, &consistency)
            .await?;
        if let Some(tid) = maybe_tx_id {
            self.record_transaction_id(tid);
        }
        Ok(docs)
    }

    pub async fn get_docs_by_ids<S, I>(
        &mut self,
        collection_id: &str,
        document_ids: I,
        return_only_fields: Option<Vec<String>>,
    ) -> FirestoreResult<Vec<(String, Option<gcloud_sdk::google::firestore::v1::Document>)>>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let full_doc_paths = document_ids
            .into_iter()
            .map(|document_id| {
                safe_document_path(
                    self.db.get_documents_path(),
                    collection_id,
                    document_id.as_ref(),
                )
            })
            .collect::<FirestoreResult<Vec<String>>>()?;
        self.get_docs_by_paths(full_doc_paths, return_only_fields)
            .await
    }

    pub async fn query_docs(
        &mut self,
        params: FirestoreQueryParams,
    ) -> FirestoreResult<Vec<gcloud_sdk::google::firestore::v1::Document>> {
        self.ensure_can_read()?;
        let consistency = self.read_consistency();
        let (docs, maybe_tx_id) = self.db.transactional_query(params, &consistency).await?;
        if let Some(tid) = maybe_tx_id {
            self.record_transaction_id(tid);
        }
        Ok(docs)
    }

    pub async fn query_objs<T>(&mut self, params: FirestoreQueryParams) -> FirestoreResult<Vec<T>>
    where
        for<'de> T: Deserialize<'de>,
    {
        let docs = self.query_docs(params).await?;
        docs.iter()
            .map(|doc| FirestoreDb::deserialize_doc_to(doc))
            .collect()
    }

    pub async fn aggregated_query(
        &mut self,
        params: FirestoreAggregatedQueryParams,
    ) -> FirestoreResult<FirestoreAggregateResult> {
        self.ensure_can_read()?;
        let consistency = self.read_consistency();
        let (fields, maybe_tx_id) = self
            .db
            .transactional_aggregated_query(params, &consistency)
            .await?;
        if let Some(tid) = maybe_tx_id {
            self.record_transaction_id(tid);
        }
        Ok(FirestoreAggregateResult::from_fields(fields))
    }

    #[inline]
    pub fn add<I>(&mut self, write: I) -> FirestoreResult<&mut Self>
    where
        I: TryInto<Write, Error = FirestoreError>,
    {
        self.ensure_can_write()?;
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
        let document_path = safe_document_path(
            self.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
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
        let document_path = safe_document_path(
            self.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
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
        let document_path = safe_document_path(
            self.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
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
        let document_path = safe_document_path(
            self.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        self.add(FirestoreWrite::Delete {
            document_path,
            precondition,
        })
    }

    pub async fn commit(mut self) -> FirestoreResult<FirestoreCommitResponse> {
        self.finished = true;

        if self.writes.is_empty() && self.transaction_id.is_none() {
            self.transaction_span.in_scope(|| {
                debug!("Transaction did not touch the database; nothing to commit.");
            });
            return Ok(FirestoreCommitResponse::new(vec![]));
        }

        let request = gcloud_sdk::tonic::Request::new(CommitRequest {
            database: self.db.get_database_path().clone(),
            writes: self.writes.drain(..).collect(),
            transaction: self.transaction_id.clone().unwrap_or_default(),
        });

        let response = self.db.client().get().commit(request).await?.into_inner();
        let result: FirestoreCommitResponse = response.try_into()?;

        if let Some(ref commit_time) = result.commit_time {
            self.transaction_span
                .record("/firestore/commit_time", commit_time.to_rfc3339());
        }

        self.transaction_span.in_scope(|| {
            debug!("Transaction has been committed.");
        });

        Ok(result)
    }

    pub async fn rollback(mut self) -> FirestoreResult<()> {
        self.finished = true;

        if let Some(tid) = self.transaction_id.take() {
            self.db.rollback_transaction(tid).await?;
            self.transaction_span.in_scope(|| {
                debug!("Transaction has been rolled back.");
            });
        }

        Ok(())
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for FirestoreTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.transaction_span
                .in_scope(|| warn!("Transaction was neither committed nor rolled back."));
        }
    }
}

fn validate_read_order(has_written: bool) -> FirestoreResult<()> {
    if has_written {
        Err(invalid_argument(
            "transaction",
            TRANSACTION_READS_BEFORE_WRITES_MSG,
        ))
    } else {
        Ok(())
    }
}

fn validate_write_allowed(mode: &FirestoreTransactionMode) -> FirestoreResult<()> {
    if mode.is_read_only() {
        Err(invalid_argument(
            "transaction",
            TRANSACTION_READ_ONLY_WRITES_MSG,
        ))
    } else {
        Ok(())
    }
}

fn is_transaction_retryable(err: &FirestoreError) -> bool {
    err.code().is_transaction_retryable()
}

fn max_attempts_exceeded_error() -> FirestoreError {
    FirestoreError::DataConflictError(FirestoreDataConflictError::new(
        FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Aborted),
        TRANSACTION_MAX_ATTEMPTS_MSG.to_string(),
    ))
}

fn transaction_backoff_delay(attempt: usize) -> Duration {
    let exp_ms = (TRANSACTION_BACKOFF_INITIAL_MS as f64)
        * TRANSACTION_BACKOFF_FACTOR.powi(attempt as i32);
    let capped_ms = exp_ms.min(TRANSACTION_BACKOFF_MAX_MS as f64);
    let jitter_factor = rand::rng()
        .random_range((1.0 - TRANSACTION_BACKOFF_JITTER)..=(1.0 + TRANSACTION_BACKOFF_JITTER));
    Duration::from_millis((capped_ms * jitter_factor).min(TRANSACTION_BACKOFF_MAX_MS as f64) as u64)
}

impl FirestoreDb {
    pub async fn begin_transaction(&self) -> FirestoreResult<FirestoreTransaction<'_>> {
        self.begin_transaction_with_options(FirestoreTransactionOptions::new())
            .await
    }

    pub async fn begin_transaction_with_options(
        &self,
        options: FirestoreTransactionOptions,
    ) -> FirestoreResult<FirestoreTransaction<'_>> {
        FirestoreTransaction::begin(self, options).await
    }

    pub async fn run_transaction<T, FN>(&self, func: FN) -> FirestoreResult<T>
    where
        for<'b> FN: Fn(&'b mut FirestoreTransaction) -> BoxFuture<'b, FirestoreResult<T>>,
    {
        self.run_transaction_with_options(func, FirestoreTransactionOptions::new())
            .await
    }

    /// Drives the user callback through the attempt loop: begin lazily, run
    /// reads then writes, commit; on a retryable failure roll back and rerun
    /// the whole callback with exponential backoff, carrying the previous
    /// attempt's transaction id so the server can prioritize the retry.
    pub async fn run_transaction_with_options<T, FN>(
        &self,
        func: FN,
        options: FirestoreTransactionOptions,
    ) -> FirestoreResult<T>
    where
        for<'b> FN: Fn(&'b mut FirestoreTransaction) -> BoxFuture<'b, FirestoreResult<T>>,
    {
        let max_attempts = options
            .max_attempts
            .unwrap_or(self.get_options().max_transaction_attempts);

        let mut previous_transaction_id: Option<FirestoreTransactionId> = None;

        for attempt in 0..max_attempts {
            let attempt_options = match (&previous_transaction_id, &options.mode) {
                (Some(tid), FirestoreTransactionMode::ReadWrite)
                | (Some(tid), FirestoreTransactionMode::ReadWriteRetry(_)) => options
                    .clone()
                    .with_mode(FirestoreTransactionMode::ReadWriteRetry(tid.clone())),
                _ => options.clone(),
            };

            let mut transaction = FirestoreTransaction::new_lazy(self, attempt_options);
            let transaction_span = transaction.transaction_span.clone();

            let callback_result = func(&mut transaction).await;
            let attempt_transaction_id = transaction.transaction_id().cloned();

            match callback_result {
                Ok(ret_val) => match transaction.commit().await {
                    Ok(_) => return Ok(ret_val),
                    Err(err) if is_transaction_retryable(&err) => {
                        if let Some(ref tid) = attempt_transaction_id {
                            self.rollback_transaction(tid.clone()).await.ok();
                        }
                        if attempt + 1 >= max_attempts {
                            transaction_span.in_scope(|| {
                                error!(%err, max_attempts, "Transaction attempt budget exhausted.");
                            });
                            return Err(max_attempts_exceeded_error());
                        }
                        transaction_span.in_scope(|| {
                            warn!(
                                %err,
                                attempt = attempt + 1,
                                max_attempts,
                                "Transient error occurred while committing transaction. Retrying.",
                            );
                        });
                        previous_transaction_id = attempt_transaction_id;
                        tokio::time::sleep(transaction_backoff_delay(attempt)).await;
                    }
                    Err(err) => {
                        if let Some(ref tid) = attempt_transaction_id {
                            self.rollback_transaction(tid.clone()).await.ok();
                        }
                        return Err(err);
                    }
                },
                Err(err) if is_transaction_retryable(&err) => {
                    transaction.finish();
                    if let Some(ref tid) = attempt_transaction_id {
                        self.rollback_transaction(tid.clone()).await.ok();
                    }
                    if attempt + 1 >= max_attempts {
                        transaction_span.in_scope(|| {
                            error!(%err, max_attempts, "Transaction attempt budget exhausted.");
                        });
                        return Err(max_attempts_exceeded_error());
                    }
                    transaction_span.in_scope(|| {
                        warn!(
                            %err,
                            attempt = attempt + 1,
                            max_attempts,
                            "Transient error occurred in transaction function. Retrying.",
                        );
                    });
                    previous_transaction_id = attempt_transaction_id;
                    tokio::time::sleep(transaction_backoff_delay(attempt)).await;
                }
                Err(err) => {
                    transaction.finish();
                    if let Some(ref tid) = attempt_transaction_id {
                        self.rollback_transaction(tid.clone()).await.ok();
                    }
                    return Err(FirestoreError::ErrorInTransaction(
                        FirestoreErrorInTransaction::new(Box::new(err))
                            .opt_transaction_id(attempt_transaction_id),
                    ));
                }
            }
        }

        // Only reachable with a zero attempt budget
        Err(max_attempts_exceeded_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_after_write_rejected_with_fixed_message() {
        assert!(validate_read_order(false).is_ok());

        let err = validate_read_order(true).unwrap_err();
        assert_eq!(err.code(), FirestoreErrorCode::InvalidArgument);
        assert!(format!("{err}").contains(TRANSACTION_READS_BEFORE_WRITES_MSG));
    }

    #[test]
    fn test_read_only_write_rejected_with_fixed_message() {
        assert!(validate_write_allowed(&FirestoreTransactionMode::ReadWrite).is_ok());
        assert!(
            validate_write_allowed(&FirestoreTransactionMode::ReadWriteRetry(vec![1])).is_ok()
        );

        for mode in [
            FirestoreTransactionMode::ReadOnly,
            FirestoreTransactionMode::ReadOnlyWithReadTime(chrono::Utc::now()),
        ] {
            let err = validate_write_allowed(&mode).unwrap_err();
            assert_eq!(err.code(), FirestoreErrorCode::InvalidArgument);
            assert!(format!("{err}").contains(TRANSACTION_READ_ONLY_WRITES_MSG));
        }
    }

    #[test]
    fn test_max_attempts_error_carries_fixed_message() {
        let err = max_attempts_exceeded_error();
        assert_eq!(err.code(), FirestoreErrorCode::Aborted);
        assert!(format!("{err}").contains(TRANSACTION_MAX_ATTEMPTS_MSG));
    }

    #[test]
    fn test_backoff_delay_stays_in_bounds() {
        for attempt in 0..20 {
            let delay = transaction_backoff_delay(attempt);
            let expected = (TRANSACTION_BACKOFF_INITIAL_MS as f64)
                * TRANSACTION_BACKOFF_FACTOR.powi(attempt as i32);
            let expected_capped = expected.min(TRANSACTION_BACKOFF_MAX_MS as f64);
            let low = expected_capped * (1.0 - TRANSACTION_BACKOFF_JITTER);
            assert!(delay.as_millis() as f64 >= low.floor());
            assert!(delay.as_millis() as u64 <= TRANSACTION_BACKOFF_MAX_MS);
        }
    }
}
