use crate::errors::FirestoreSerializationError;
use crate::{FirestoreError, FirestoreResult};
use chrono::prelude::*;

pub fn from_timestamp(ts: gcloud_sdk::prost_types::Timestamp) -> FirestoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos as u32).ok_or_else(|| {
        FirestoreError::DeserializeError(FirestoreSerializationError::from_message(format!(
            "Invalid timestamp: {}s {}ns",
            ts.seconds, ts.nanos
        )))
    })
}

pub fn to_timestamp(dt: DateTime<Utc>) -> gcloud_sdk::prost_types::Timestamp {
    gcloud_sdk::prost_types::Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.nanosecond() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip_keeps_nanos() {
        let dt = Utc.with_ymd_and_hms(2023, 5, 11, 17, 3, 21).unwrap()
            + chrono::Duration::nanoseconds(12_345);
        let ts = to_timestamp(dt);
        assert_eq!(ts.nanos, 12_345);
        assert_eq!(from_timestamp(ts).unwrap(), dt);
    }
}
