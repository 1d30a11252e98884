use crate::errors::FirestoreError;
use crate::timestamp_utils::to_timestamp;
use chrono::prelude::*;
use gcloud_sdk::google::firestore::v1::Precondition;

/// Server-evaluated guard on a write: require (non-)existence or an exact
/// last-update time.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum FirestoreWritePrecondition {
    Exists(bool),
    UpdateTime(DateTime<Utc>),
}

impl TryInto<Precondition> for FirestoreWritePrecondition {
    type Error = FirestoreError;

    fn try_into(self) -> Result<Precondition, Self::Error> {
        match self {
            FirestoreWritePrecondition::Exists(value) => Ok(Precondition {
                condition_type: Some(
                    gcloud_sdk::google::firestore::v1::precondition::ConditionType::Exists(value),
                ),
            }),
            FirestoreWritePrecondition::UpdateTime(value) => Ok(Precondition {
                condition_type: Some(
                    gcloud_sdk::google::firestore::v1::precondition::ConditionType::UpdateTime(
                        to_timestamp(value),
                    ),
                ),
            }),
        }
    }
}
