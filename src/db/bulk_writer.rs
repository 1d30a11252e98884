use crate::db::safe_document_path;
use crate::errors::invalid_argument;
use crate::*;
use futures::FutureExt;
use gcloud_sdk::google::firestore::v1::{BatchWriteRequest, Write};
use rand::RngExt;
use rsb_derive::Builder;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::*;

pub const BULK_WRITER_MAX_BATCH_SIZE: usize = 20;

/// Batches carrying retries shrink to stay under the request size limit.
pub const BULK_WRITER_RETRY_MAX_BATCH_SIZE: usize = 10;

pub const BULK_WRITER_MAX_PENDING_OPS: usize = 500;
pub const BULK_WRITER_MAX_ATTEMPTS: usize = 10;

pub const BULK_WRITER_CLOSED_MSG: &str = "BulkWriter has already been closed.";

const BULK_WRITER_BACKOFF_INITIAL_MS: u64 = 1_000;
const BULK_WRITER_BACKOFF_FACTOR: f64 = 1.5;
const BULK_WRITER_BACKOFF_MAX_MS: u64 = 60_000;
const BULK_WRITER_BACKOFF_JITTER: f64 = 0.3;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum FirestoreBulkWriteKind {
    Create,
    Set,
    Update,
    Delete,
}

/// Terminal failure of a single bulk operation, offered to the error
/// callback and surfaced through the operation's handle.
#[derive(Debug, Clone, Builder)]
pub struct FirestoreBulkWriterError {
    pub code: FirestoreErrorCode,
    pub message: String,
    pub document_path: String,
    pub operation: FirestoreBulkWriteKind,
    pub failed_attempts: usize,
}

impl std::fmt::Display for FirestoreBulkWriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bulk write {:?} on {} failed after {} attempts with {}: {}",
            self.operation, self.document_path, self.failed_attempts, self.code, self.message
        )
    }
}

impl std::error::Error for FirestoreBulkWriterError {}

pub type FirestoreBulkWriteOutcome = Result<FirestoreWriteResult, FirestoreBulkWriterError>;

type BulkWriteResultCallback = Arc<dyn Fn(&str, &FirestoreWriteResult) + Send + Sync>;
type BulkWriteErrorCallback = Arc<dyn Fn(&FirestoreBulkWriterError) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum FirestoreBulkWriterThrottling {
    Enabled(FirestoreRateLimiterOptions),
    Disabled,
}

#[derive(Clone, Builder)]
pub struct FirestoreBulkWriterOptions {
    #[default = "BULK_WRITER_MAX_BATCH_SIZE"]
    pub max_batch_size: usize,

    #[default = "BULK_WRITER_MAX_PENDING_OPS"]
    pub max_pending_ops: usize,

    #[default = "BULK_WRITER_MAX_ATTEMPTS"]
    pub max_attempts: usize,

    #[default = "FirestoreBulkWriterThrottling::Enabled(FirestoreRateLimiterOptions::new())"]
    pub throttling: FirestoreBulkWriterThrottling,

    /// Invoked with the document path after each successful write.
    pub on_write_result: Option<BulkWriteResultCallback>,

    /// Decides whether a failed operation is retried. Replacing it replaces
    /// the default policy entirely.
    pub on_write_error: Option<BulkWriteErrorCallback>,
}

/// Retry `ABORTED` and `UNAVAILABLE`; deletes additionally retry `INTERNAL`.
pub fn bulk_writer_default_should_retry(error: &FirestoreBulkWriterError) -> bool {
    match error.code {
        FirestoreErrorCode::Aborted | FirestoreErrorCode::Unavailable => true,
        FirestoreErrorCode::Internal => error.operation == FirestoreBulkWriteKind::Delete,
        _ => false,
    }
}

fn next_backoff_ms(previous_ms: u64, code: FirestoreErrorCode) -> u64 {
    if code == FirestoreErrorCode::ResourceExhausted {
        BULK_WRITER_BACKOFF_MAX_MS
    } else if previous_ms == 0 {
        BULK_WRITER_BACKOFF_INITIAL_MS
    } else {
        ((previous_ms as f64) * BULK_WRITER_BACKOFF_FACTOR).min(BULK_WRITER_BACKOFF_MAX_MS as f64)
            as u64
    }
}

fn jittered(delay_ms: u64) -> Duration {
    if delay_ms == 0 {
        return Duration::from_millis(0);
    }
    let factor = rand::rng()
        .random_range((1.0 - BULK_WRITER_BACKOFF_JITTER)..=(1.0 + BULK_WRITER_BACKOFF_JITTER));
    Duration::from_millis(
        ((delay_ms as f64) * factor).min(BULK_WRITER_BACKOFF_MAX_MS as f64) as u64,
    )
}

struct PendingOp {
    id: u64,
    write: Write,
    document_path: String,
    kind: FirestoreBulkWriteKind,
    failed_attempts: usize,
    backoff_ms: u64,
    completer: Option<oneshot::Sender<FirestoreBulkWriteOutcome>>,
}

struct QueuedBatch {
    ops: Vec<PendingOp>,
}

struct BulkWriterState {
    closed: bool,
    next_op_id: u64,
    current_batch: Vec<PendingOp>,
    current_docs: HashSet<String>,
    current_has_retries: bool,
    send_queue: VecDeque<QueuedBatch>,
    // Document slots held from first dispatch until terminal completion, so
    // a later write to the same document never overtakes an earlier one
    // even across its retries.
    active_docs: HashMap<String, u64>,
    outstanding: HashSet<u64>,
    admitted: usize,
    buffered: VecDeque<PendingOp>,
    flush_waiters: usize,
}

impl BulkWriterState {
    fn new() -> Self {
        Self {
            closed: false,
            next_op_id: 0,
            current_batch: Vec::new(),
            current_docs: HashSet::new(),
            current_has_retries: false,
            send_queue: VecDeque::new(),
            active_docs: HashMap::new(),
            outstanding: HashSet::new(),
            admitted: 0,
            buffered: VecDeque::new(),
            flush_waiters: 0,
        }
    }

    fn seal_current_batch(&mut self) {
        if !self.current_batch.is_empty() {
            let ops = std::mem::take(&mut self.current_batch);
            self.current_docs.clear();
            self.current_has_retries = false;
            self.send_queue.push_back(QueuedBatch { ops });
        }
    }

    /// Batch assembly: a same-document conflict or a full batch seals the
    /// current batch first; retrying ops shrink the effective batch cap.
    fn admit_op(&mut self, op: PendingOp, max_batch_size: usize) {
        self.admitted += 1;
        let incoming_retry = op.backoff_ms > 0;
        let effective_max = if self.current_has_retries || incoming_retry {
            BULK_WRITER_RETRY_MAX_BATCH_SIZE.min(max_batch_size)
        } else {
            max_batch_size
        };

        if self.current_docs.contains(&op.document_path)
            || self.current_batch.len() >= effective_max
        {
            self.seal_current_batch();
        }

        if incoming_retry {
            self.current_has_retries = true;
        }
        self.current_docs.insert(op.document_path.clone());
        self.current_batch.push(op);
    }

    /// Pops every batch that is clear to go: dispatched strictly in
    /// formation order per document, concurrently across disjoint documents.
    fn take_dispatchable(&mut self) -> Vec<QueuedBatch> {
        let mut blocked_docs: HashSet<String> = HashSet::new();
        let mut ready = Vec::new();
        let mut index = 0;
        while index < self.send_queue.len() {
            let eligible = self.send_queue[index].ops.iter().all(|op| {
                !blocked_docs.contains(&op.document_path)
                    && self
                        .active_docs
                        .get(&op.document_path)
                        .map_or(true, |holder| *holder == op.id)
            });
            if eligible {
                let batch = self
                    .send_queue
                    .remove(index)
                    .expect("indexed batch exists");
                for op in &batch.ops {
                    self.active_docs.insert(op.document_path.clone(), op.id);
                }
                ready.push(batch);
            } else {
                for op in &self.send_queue[index].ops {
                    blocked_docs.insert(op.document_path.clone());
                }
                index += 1;
            }
        }
        ready
    }
}

#[derive(Clone)]
struct BulkWriterCtx {
    db: FirestoreDb,
    options: FirestoreBulkWriterOptions,
    rate_limiter: Option<Arc<FirestoreRateLimiter>>,
    state: Arc<Mutex<BulkWriterState>>,
    completions: Arc<watch::Sender<u64>>,
    writer_span: Span,
}

/// A parallel, automatically batched, rate limited write engine over the
/// `BatchWrite` RPC. Writes to the same document are strictly serialized in
/// enqueue order; writes to distinct documents fly concurrently.
pub struct FirestoreBulkWriter {
    ctx: BulkWriterCtx,
}

/// Per-operation completion handle.
pub struct FirestoreBulkWriteHandle {
    document_path: String,
    kind: FirestoreBulkWriteKind,
    receiver: oneshot::Receiver<FirestoreBulkWriteOutcome>,
}

impl FirestoreBulkWriteHandle {
    pub fn document_path(&self) -> &str {
        &self.document_path
    }

    pub async fn outcome(self) -> FirestoreBulkWriteOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(FirestoreBulkWriterError::new(
                FirestoreErrorCode::Cancelled,
                "Bulk writer was dropped before the operation completed".to_string(),
                self.document_path,
                self.kind,
                0,
            )),
        }
    }
}

impl FirestoreBulkWriter {
    pub(crate) fn new(db: FirestoreDb, options: FirestoreBulkWriterOptions) -> Self {
        let rate_limiter = match options.throttling {
            FirestoreBulkWriterThrottling::Enabled(ref limiter_options) => Some(Arc::new(
                FirestoreRateLimiter::new(limiter_options.clone()),
            )),
            FirestoreBulkWriterThrottling::Disabled => None,
        };

        Self {
            ctx: BulkWriterCtx {
                db,
                options,
                rate_limiter,
                state: Arc::new(Mutex::new(BulkWriterState::new())),
                completions: Arc::new(watch::channel(0u64).0),
                writer_span: span!(Level::DEBUG, "Firestore Bulk Writer"),
            },
        }
    }

    pub fn create_obj<T, S>(
        &self,
        collection_id: &str,
        document_id: S,
        obj: &T,
    ) -> FirestoreResult<FirestoreBulkWriteHandle>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.ctx.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        self.enqueue(
            FirestoreBulkWriteKind::Create,
            FirestoreWrite::Create {
                document_path,
                fields: firestore_fields_from_serializable(obj)?,
                transforms: vec![],
            },
        )
    }

    pub fn set_obj<T, S>(
        &self,
        collection_id: &str,
        document_id: S,
        obj: &T,
        mode: FirestoreSetMode,
    ) -> FirestoreResult<FirestoreBulkWriteHandle>
    where
        T: Serialize,
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.ctx.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        self.enqueue(
            FirestoreBulkWriteKind::Set,
            FirestoreWrite::Set {
                document_path,
                fields: firestore_fields_from_serializable(obj)?,
                mode,
                transforms: vec![],
            },
        )
    }

    pub fn update_fields<S>(
        &self,
        collection_id: &str,
        document_id: S,
        field_values: Vec<(FirestoreFieldPath, FirestoreUpdateValue)>,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<FirestoreBulkWriteHandle>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.ctx.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        self.enqueue(
            FirestoreBulkWriteKind::Update,
            FirestoreWrite::Update {
                document_path,
                field_values,
                precondition,
            },
        )
    }

    pub fn delete_by_id<S>(
        &self,
        collection_id: &str,
        document_id: S,
        precondition: Option<FirestoreWritePrecondition>,
    ) -> FirestoreResult<FirestoreBulkWriteHandle>
    where
        S: AsRef<str>,
    {
        let document_path = safe_document_path(
            self.ctx.db.get_documents_path(),
            collection_id,
            document_id.as_ref(),
        )?;
        self.enqueue(
            FirestoreBulkWriteKind::Delete,
            FirestoreWrite::Delete {
                document_path,
                precondition,
            },
        )
    }

    fn enqueue(
        &self,
        kind: FirestoreBulkWriteKind,
        write: FirestoreWrite,
    ) -> FirestoreResult<FirestoreBulkWriteHandle> {
        let document_path = write.document_path().to_string();
        let encoded: Write = write.try_into()?;
        let (sender, receiver) = oneshot::channel();

        {
            let mut state = self.ctx.state.lock().expect("bulk writer lock");
            if state.closed {
                return Err(invalid_argument("bulk_writer", BULK_WRITER_CLOSED_MSG));
            }

            let id = state.next_op_id;
            state.next_op_id += 1;
            state.outstanding.insert(id);

            let op = PendingOp {
                id,
                write: encoded,
                document_path: document_path.clone(),
                kind,
                failed_attempts: 0,
                backoff_ms: 0,
                completer: Some(sender),
            };

            if state.admitted >= self.ctx.options.max_pending_ops {
                state.buffered.push_back(op);
            } else {
                state.admit_op(op, self.ctx.options.max_batch_size);
            }
        }

        dispatch_ready_batches(&self.ctx);

        Ok(FirestoreBulkWriteHandle {
            document_path,
            kind,
            receiver,
        })
    }

    /// Resolves once every operation enqueued before this call has
    /// terminally completed. Operations enqueued afterwards do not delay it.
    pub async fn flush(&self) -> FirestoreResult<()> {
        let mut completions = self.ctx.completions.subscribe();

        let waiting: Vec<u64> = {
            let mut state = self.ctx.state.lock().expect("bulk writer lock");
            state.seal_current_batch();
            state.flush_waiters += 1;
            state.outstanding.iter().copied().collect()
        };

        dispatch_ready_batches(&self.ctx);

        loop {
            {
                let state = self.ctx.state.lock().expect("bulk writer lock");
                if waiting.iter().all(|id| !state.outstanding.contains(id)) {
                    break;
                }
            }
            if completions.changed().await.is_err() {
                break;
            }
        }

        let mut state = self.ctx.state.lock().expect("bulk writer lock");
        state.flush_waiters -= 1;
        Ok(())
    }

    /// Closes the writer and drains everything still pending. Idempotent;
    /// every mutating call afterwards fails.
    pub async fn close(&self) -> FirestoreResult<()> {
        {
            let mut state = self.ctx.state.lock().expect("bulk writer lock");
            state.closed = true;
        }
        self.flush().await
    }
}

impl FirestoreDb {
    pub fn create_bulk_writer(&self) -> FirestoreBulkWriter {
        self.create_bulk_writer_with_options(FirestoreBulkWriterOptions::new())
    }

    pub fn create_bulk_writer_with_options(
        &self,
        options: FirestoreBulkWriterOptions,
    ) -> FirestoreBulkWriter {
        FirestoreBulkWriter::new(self.clone(), options)
    }
}

fn dispatch_ready_batches(ctx: &BulkWriterCtx) {
    let batches = {
        let mut state = ctx.state.lock().expect("bulk writer lock");
        state.take_dispatchable()
    };

    for batch in batches {
        let ctx = ctx.clone();
        tokio::spawn(run_batch(ctx, batch).boxed());
    }
}

async fn run_batch(ctx: BulkWriterCtx, batch: QueuedBatch) {
    let op_count = batch.ops.len();

    if let Some(ref limiter) = ctx.rate_limiter {
        loop {
            if limiter.try_make_request(op_count) {
                break;
            }
            match limiter.next_request_delay_ms(op_count) {
                Some(0) => continue,
                Some(delay_ms) => tokio::time::sleep(Duration::from_millis(delay_ms)).await,
                // Larger than the current capacity; wait for the ramp-up
                None => {
                    tokio::time::sleep(Duration::from_millis(
                        crate::db::rate_limiter::RATE_LIMITER_GROWTH_INTERVAL_MS,
                    ))
                    .await
                }
            }
        }
    }

    let max_backoff_ms = batch.ops.iter().map(|op| op.backoff_ms).max().unwrap_or(0);
    if max_backoff_ms > 0 {
        tokio::time::sleep(jittered(max_backoff_ms)).await;
    }

    let request = gcloud_sdk::tonic::Request::new(BatchWriteRequest {
        database: ctx.db.get_database_path().clone(),
        writes: batch.ops.iter().map(|op| op.write.clone()).collect(),
        labels: HashMap::new(),
    });

    let rpc_result = ctx.db.client().get().batch_write(request).await;

    let mut retry_ops: Vec<PendingOp> = Vec::new();
    let mut completed_ops: Vec<(u64, String)> = Vec::new();

    match rpc_result {
        Ok(response) => {
            let response = response.into_inner();
            for (index, mut op) in batch.ops.into_iter().enumerate() {
                let status = response.status.get(index);
                let code: FirestoreErrorCode = match status {
                    Some(status) if status.code != 0 => {
                        gcloud_sdk::tonic::Code::from(status.code).into()
                    }
                    _ => {
                        let write_result: FirestoreWriteResult = response
                            .write_results
                            .get(index)
                            .cloned()
                            .map(|wr| wr.try_into())
                            .transpose()
                            .ok()
                            .flatten()
                            .unwrap_or_else(|| FirestoreWriteResult::new(vec![]));
                        resolve_success(&ctx, &mut op, write_result);
                        completed_ops.push((op.id, op.document_path.clone()));
                        continue;
                    }
                };

                let message = status
                    .map(|s| s.message.clone())
                    .unwrap_or_else(|| code.to_string());
                handle_op_failure(&ctx, op, code, message, &mut retry_ops, &mut completed_ops);
            }
        }
        Err(status) => {
            let code: FirestoreErrorCode = status.code().into();
            let message = status.message().to_string();
            for op in batch.ops {
                handle_op_failure(
                    &ctx,
                    op,
                    code,
                    message.clone(),
                    &mut retry_ops,
                    &mut completed_ops,
                );
            }
        }
    }

    {
        let mut state = ctx.state.lock().expect("bulk writer lock");

        for (op_id, document_path) in completed_ops {
            state.outstanding.remove(&op_id);
            state.admitted -= 1;
            if state.active_docs.get(&document_path) == Some(&op_id) {
                state.active_docs.remove(&document_path);
            }
        }

        let has_retries = !retry_ops.is_empty();
        for op in retry_ops {
            // Re-admitted, not newly admitted: the op keeps its slot
            state.admitted -= 1;
            state.admit_op(op, ctx.options.max_batch_size);
        }

        while state.admitted < ctx.options.max_pending_ops {
            match state.buffered.pop_front() {
                Some(op) => state.admit_op(op, ctx.options.max_batch_size),
                None => break,
            }
        }

        if has_retries || state.flush_waiters > 0 {
            state.seal_current_batch();
        }
    }

    ctx.completions.send_modify(|version| *version += 1);
    dispatch_ready_batches(&ctx);
}

fn resolve_success(ctx: &BulkWriterCtx, op: &mut PendingOp, write_result: FirestoreWriteResult) {
    if let Some(ref callback) = ctx.options.on_write_result {
        callback(op.document_path.as_str(), &write_result);
    }
    if let Some(completer) = op.completer.take() {
        completer.send(Ok(write_result)).ok();
    }
}

fn handle_op_failure(
    ctx: &BulkWriterCtx,
    mut op: PendingOp,
    code: FirestoreErrorCode,
    message: String,
    retry_ops: &mut Vec<PendingOp>,
    completed_ops: &mut Vec<(u64, String)>,
) {
    op.failed_attempts += 1;

    let error = FirestoreBulkWriterError::new(
        code,
        message,
        op.document_path.clone(),
        op.kind,
        op.failed_attempts,
    );

    let user_wants_retry = match ctx.options.on_write_error {
        Some(ref callback) => callback(&error),
        None => bulk_writer_default_should_retry(&error),
    };

    if user_wants_retry && op.failed_attempts < ctx.options.max_attempts {
        op.backoff_ms = next_backoff_ms(op.backoff_ms, code);
        ctx.writer_span.in_scope(|| {
            debug!(
                document_path = op.document_path.as_str(),
                attempts = op.failed_attempts,
                backoff_ms = op.backoff_ms,
                %code,
                "Retrying failed bulk write operation.",
            );
        });
        retry_ops.push(op);
    } else {
        ctx.writer_span.in_scope(|| {
            warn!(
                document_path = op.document_path.as_str(),
                attempts = op.failed_attempts,
                %code,
                "Bulk write operation failed terminally.",
            );
        });
        completed_ops.push((op.id, op.document_path.clone()));
        if let Some(completer) = op.completer.take() {
            completer.send(Err(error)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcloud_sdk::google::firestore::v1::write::Operation;

    fn dummy_op(state: &mut BulkWriterState, document_path: &str, backoff_ms: u64) -> u64 {
        let id = state.next_op_id;
        state.next_op_id += 1;
        state.outstanding.insert(id);
        let op = PendingOp {
            id,
            write: Write {
                update_mask: None,
                update_transforms: vec![],
                current_document: None,
                operation: Some(Operation::Delete(document_path.to_string())),
            },
            document_path: document_path.to_string(),
            kind: FirestoreBulkWriteKind::Delete,
            failed_attempts: 0,
            backoff_ms,
            completer: None,
        };
        state.admit_op(op, BULK_WRITER_MAX_BATCH_SIZE);
        id
    }

    #[test]
    fn test_same_document_seals_current_batch() {
        let mut state = BulkWriterState::new();
        dummy_op(&mut state, "docs/cities/SF", 0);
        dummy_op(&mut state, "docs/cities/LA", 0);
        assert_eq!(state.current_batch.len(), 2);
        assert!(state.send_queue.is_empty());

        dummy_op(&mut state, "docs/cities/SF", 0);
        assert_eq!(state.send_queue.len(), 1);
        assert_eq!(state.current_batch.len(), 1);

        // No batch ever carries two writes to the same document
        for batch in &state.send_queue {
            let unique: HashSet<&String> =
                batch.ops.iter().map(|op| &op.document_path).collect();
            assert_eq!(unique.len(), batch.ops.len());
        }
    }

    #[test]
    fn test_full_batch_seals() {
        let mut state = BulkWriterState::new();
        for i in 0..BULK_WRITER_MAX_BATCH_SIZE {
            dummy_op(&mut state, &format!("docs/cities/c{i}"), 0);
        }
        assert!(state.send_queue.is_empty());
        dummy_op(&mut state, "docs/cities/one-more", 0);
        assert_eq!(state.send_queue.len(), 1);
        assert_eq!(state.send_queue[0].ops.len(), BULK_WRITER_MAX_BATCH_SIZE);
    }

    #[test]
    fn test_retry_presence_caps_batch_size() {
        let mut state = BulkWriterState::new();
        dummy_op(&mut state, "docs/cities/r", 1_000);
        for i in 0..BULK_WRITER_RETRY_MAX_BATCH_SIZE {
            dummy_op(&mut state, &format!("docs/cities/c{i}"), 0);
        }
        // The retry batch sealed at the shrunken cap
        assert_eq!(state.send_queue.len(), 1);
        assert_eq!(
            state.send_queue[0].ops.len(),
            BULK_WRITER_RETRY_MAX_BATCH_SIZE
        );
    }

    #[test]
    fn test_dispatch_order_preserved_per_document() {
        let mut state = BulkWriterState::new();
        let first = dummy_op(&mut state, "docs/cities/SF", 0);
        let second = dummy_op(&mut state, "docs/cities/SF", 0);
        state.seal_current_batch();
        assert_eq!(state.send_queue.len(), 2);

        let ready = state.take_dispatchable();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ops[0].id, first);

        // The second batch stays queued while the first holds the slot
        assert!(state.take_dispatchable().is_empty());

        // Terminal completion of the first releases the second
        state.active_docs.remove("docs/cities/SF");
        state.outstanding.remove(&first);
        let ready = state.take_dispatchable();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ops[0].id, second);
    }

    #[test]
    fn test_disjoint_batches_dispatch_concurrently() {
        let mut state = BulkWriterState::new();
        dummy_op(&mut state, "docs/cities/SF", 0);
        state.seal_current_batch();
        dummy_op(&mut state, "docs/cities/LA", 0);
        state.seal_current_batch();

        let ready = state.take_dispatchable();
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn test_retried_op_keeps_its_document_slot() {
        let mut state = BulkWriterState::new();
        let first = dummy_op(&mut state, "docs/cities/SF", 0);
        state.seal_current_batch();
        let _dispatched = state.take_dispatchable();

        // A later op to the same doc queues behind the in-flight one
        let second = dummy_op(&mut state, "docs/cities/SF", 0);
        state.seal_current_batch();
        assert!(state.take_dispatchable().is_empty());

        // The first op fails retryably and is re-admitted with backoff
        let mut retry = PendingOp {
            id: first,
            write: Write {
                update_mask: None,
                update_transforms: vec![],
                current_document: None,
                operation: Some(Operation::Delete("docs/cities/SF".to_string())),
            },
            document_path: "docs/cities/SF".to_string(),
            kind: FirestoreBulkWriteKind::Delete,
            failed_attempts: 1,
            backoff_ms: next_backoff_ms(0, FirestoreErrorCode::Aborted),
            completer: None,
        };
        retry.backoff_ms = next_backoff_ms(0, FirestoreErrorCode::Aborted);
        state.admitted -= 1;
        state.admit_op(retry, BULK_WRITER_MAX_BATCH_SIZE);
        state.seal_current_batch();

        // Only the retry of the holder may dispatch, not the later op
        let ready = state.take_dispatchable();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].ops[0].id, first);
        let _ = second;
    }

    #[test]
    fn test_default_retry_policy() {
        let base = FirestoreBulkWriterError::new(
            FirestoreErrorCode::Aborted,
            "".to_string(),
            "docs/cities/SF".to_string(),
            FirestoreBulkWriteKind::Set,
            1,
        );
        assert!(bulk_writer_default_should_retry(&base));
        assert!(bulk_writer_default_should_retry(
            &base.clone().with_code(FirestoreErrorCode::Unavailable)
        ));
        assert!(!bulk_writer_default_should_retry(
            &base.clone().with_code(FirestoreErrorCode::NotFound)
        ));
        assert!(!bulk_writer_default_should_retry(
            &base.clone().with_code(FirestoreErrorCode::Internal)
        ));
        assert!(bulk_writer_default_should_retry(
            &base
                .clone()
                .with_code(FirestoreErrorCode::Internal)
                .with_operation(FirestoreBulkWriteKind::Delete)
        ));
    }

    #[test]
    fn test_backoff_schedule() {
        let first = next_backoff_ms(0, FirestoreErrorCode::Aborted);
        assert_eq!(first, BULK_WRITER_BACKOFF_INITIAL_MS);
        let second = next_backoff_ms(first, FirestoreErrorCode::Aborted);
        assert_eq!(second, 1_500);
        assert_eq!(
            next_backoff_ms(100, FirestoreErrorCode::ResourceExhausted),
            BULK_WRITER_BACKOFF_MAX_MS
        );
        assert_eq!(
            next_backoff_ms(BULK_WRITER_BACKOFF_MAX_MS, FirestoreErrorCode::Aborted),
            BULK_WRITER_BACKOFF_MAX_MS
        );
    }
}
