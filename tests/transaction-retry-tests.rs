use firestore_admin::errors::*;
use firestore_admin::*;
use futures::FutureExt;
use std::collections::HashMap;

fn simulated_contention() -> FirestoreError {
    FirestoreError::DatabaseError(FirestoreDatabaseError::new(
        FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Aborted),
        "simulated contention".to_string(),
        true,
    ))
}

// With a single-attempt budget and a callback that aborts before any read,
// the executor issues no RPC at all: it must surface the fixed
// max-attempts message, not the underlying abort.
#[tokio::test]
async fn transaction_max_attempts_exhaustion(
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let options = FirestoreDbOptions::new("test-project".to_string())
        .with_firebase_api_url("http://localhost:8080".to_string())
        .with_environment_override(HashMap::new());

    // Client construction needs an ambient token source; without one there is
    // nothing to drive here.
    let db = match FirestoreDb::with_options(options).await {
        Ok(db) => db,
        Err(_) => return Ok(()),
    };

    let result: FirestoreResult<()> = db
        .run_transaction_with_options(
            |_tx| async move { Err(simulated_contention()) }.boxed(),
            FirestoreTransactionOptions::new().with_max_attempts(1),
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.code(), FirestoreErrorCode::Aborted);
    assert!(format!("{err}").contains(TRANSACTION_MAX_ATTEMPTS_MSG));

    Ok(())
}

#[tokio::test]
async fn transaction_non_retryable_error_passes_through(
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let options = FirestoreDbOptions::new("test-project".to_string())
        .with_firebase_api_url("http://localhost:8080".to_string())
        .with_environment_override(HashMap::new());

    let db = match FirestoreDb::with_options(options).await {
        Ok(db) => db,
        Err(_) => return Ok(()),
    };

    let result: FirestoreResult<()> = db
        .run_transaction_with_options(
            |_tx| {
                async move {
                    Err(FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                        FirestoreErrorPublicGenericDetails::new(
                            FirestoreErrorCode::FailedPrecondition,
                        ),
                        "guard failed".to_string(),
                        false,
                    )))
                }
                .boxed()
            },
            FirestoreTransactionOptions::new().with_max_attempts(3),
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.code(), FirestoreErrorCode::FailedPrecondition);
    assert!(!format!("{err}").contains(TRANSACTION_MAX_ATTEMPTS_MSG));

    Ok(())
}
