use crate::errors::FirestoreError;
use crate::timestamp_utils::to_timestamp;
use chrono::prelude::*;
use rsb_derive::Builder;

pub type FirestoreTransactionId = Vec<u8>;

/// Part of the public contract: test suites match on these strings.
pub const TRANSACTION_READS_BEFORE_WRITES_MSG: &str =
    "Firestore transactions require all reads to be executed before all writes.";
pub const TRANSACTION_READ_ONLY_WRITES_MSG: &str =
    "Firestore read-only transactions cannot execute writes.";
pub const TRANSACTION_MAX_ATTEMPTS_MSG: &str = "Transaction max attempts exceeded";

pub(crate) const TRANSACTION_BACKOFF_INITIAL_MS: u64 = 1_000;
pub(crate) const TRANSACTION_BACKOFF_FACTOR: f64 = 1.5;
pub(crate) const TRANSACTION_BACKOFF_MAX_MS: u64 = 60_000;
pub(crate) const TRANSACTION_BACKOFF_JITTER: f64 = 0.3;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreTransactionMode {
    ReadOnly,
    /// Read-only pinned to an explicit snapshot; no transaction id is
    /// acquired in this mode.
    ReadOnlyWithReadTime(DateTime<Utc>),
    ReadWrite,
    /// Retry of a previously failed attempt carrying its transaction id.
    ReadWriteRetry(FirestoreTransactionId),
}

impl FirestoreTransactionMode {
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            FirestoreTransactionMode::ReadOnly
                | FirestoreTransactionMode::ReadOnlyWithReadTime(_)
        )
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreTransactionOptions {
    #[default = "FirestoreTransactionMode::ReadWrite"]
    pub mode: FirestoreTransactionMode,

    /// Overrides the database-level default attempt budget.
    pub max_attempts: Option<usize>,
}

impl Default for FirestoreTransactionOptions {
    fn default() -> Self {
        Self {
            mode: FirestoreTransactionMode::ReadWrite,
            max_attempts: None,
        }
    }
}

impl TryFrom<&FirestoreTransactionOptions>
    for gcloud_sdk::google::firestore::v1::TransactionOptions
{
    type Error = FirestoreError;

    fn try_from(options: &FirestoreTransactionOptions) -> Result<Self, Self::Error> {
        match options.mode {
            FirestoreTransactionMode::ReadOnly => {
                Ok(gcloud_sdk::google::firestore::v1::TransactionOptions {
                    mode: Some(
                        gcloud_sdk::google::firestore::v1::transaction_options::Mode::ReadOnly(
                            gcloud_sdk::google::firestore::v1::transaction_options::ReadOnly {
                                consistency_selector: None,
                            },
                        ),
                    ),
                })
            }
            FirestoreTransactionMode::ReadOnlyWithReadTime(read_time) => {
                Ok(gcloud_sdk::google::firestore::v1::TransactionOptions {
                    mode: Some(
                        gcloud_sdk::google::firestore::v1::transaction_options::Mode::ReadOnly(
                            gcloud_sdk::google::firestore::v1::transaction_options::ReadOnly {
                                consistency_selector: Some(
                                    gcloud_sdk::google::firestore::v1::transaction_options::read_only::ConsistencySelector::ReadTime(
                                        to_timestamp(read_time),
                                    ),
                                ),
                            },
                        ),
                    ),
                })
            }
            FirestoreTransactionMode::ReadWrite => {
                Ok(gcloud_sdk::google::firestore::v1::TransactionOptions {
                    mode: Some(
                        gcloud_sdk::google::firestore::v1::transaction_options::Mode::ReadWrite(
                            gcloud_sdk::google::firestore::v1::transaction_options::ReadWrite {
                                retry_transaction: vec![],
                            },
                        ),
                    ),
                })
            }
            FirestoreTransactionMode::ReadWriteRetry(ref tid) => {
                Ok(gcloud_sdk::google::firestore::v1::TransactionOptions {
                    mode: Some(
                        gcloud_sdk::google::firestore::v1::transaction_options::Mode::ReadWrite(
                            gcloud_sdk::google::firestore::v1::transaction_options::ReadWrite {
                                retry_transaction: tid.clone(),
                            },
                        ),
                    ),
                })
            }
        }
    }
}
