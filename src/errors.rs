use crate::FirestoreTransactionId;
use rsb_derive::Builder;
use serde::*;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

#[derive(Debug)]
pub enum FirestoreError {
    SystemError(FirestoreSystemError),
    DatabaseError(FirestoreDatabaseError),
    DataConflictError(FirestoreDataConflictError),
    DataNotFoundError(FirestoreDataNotFoundError),
    InvalidParametersError(FirestoreInvalidParametersError),
    SerializeError(FirestoreSerializationError),
    DeserializeError(FirestoreSerializationError),
    NetworkError(FirestoreNetworkError),
    ErrorInTransaction(FirestoreErrorInTransaction),
}

impl Display for FirestoreError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match *self {
            FirestoreError::SystemError(ref err) => err.fmt(f),
            FirestoreError::DatabaseError(ref err) => err.fmt(f),
            FirestoreError::DataConflictError(ref err) => err.fmt(f),
            FirestoreError::DataNotFoundError(ref err) => err.fmt(f),
            FirestoreError::InvalidParametersError(ref err) => err.fmt(f),
            FirestoreError::SerializeError(ref err) => err.fmt(f),
            FirestoreError::DeserializeError(ref err) => err.fmt(f),
            FirestoreError::NetworkError(ref err) => err.fmt(f),
            FirestoreError::ErrorInTransaction(ref err) => err.fmt(f),
        }
    }
}

impl Error for FirestoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            FirestoreError::SystemError(ref err) => Some(err),
            FirestoreError::DatabaseError(ref err) => Some(err),
            FirestoreError::DataConflictError(ref err) => Some(err),
            FirestoreError::DataNotFoundError(ref err) => Some(err),
            FirestoreError::InvalidParametersError(ref err) => Some(err),
            FirestoreError::SerializeError(ref err) => Some(err),
            FirestoreError::DeserializeError(ref err) => Some(err),
            FirestoreError::NetworkError(ref err) => Some(err),
            FirestoreError::ErrorInTransaction(ref err) => Some(err),
        }
    }
}

impl FirestoreError {
    /// The canonical status code carried by this error, when one applies.
    /// Local validation errors always map to [`FirestoreErrorCode::InvalidArgument`].
    pub fn code(&self) -> FirestoreErrorCode {
        match self {
            FirestoreError::SystemError(err) => err.public.code,
            FirestoreError::DatabaseError(err) => err.public.code,
            FirestoreError::DataConflictError(err) => err.public.code,
            FirestoreError::DataNotFoundError(err) => err.public.code,
            FirestoreError::InvalidParametersError(_) => FirestoreErrorCode::InvalidArgument,
            FirestoreError::SerializeError(err) => err.public.code,
            FirestoreError::DeserializeError(err) => err.public.code,
            FirestoreError::NetworkError(err) => err.public.code,
            FirestoreError::ErrorInTransaction(err) => err
                .source
                .downcast_ref::<FirestoreError>()
                .map(|inner| inner.code())
                .unwrap_or(FirestoreErrorCode::Unknown),
        }
    }
}

/// The closed set of canonical status codes surfaced by the Firestore API.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum FirestoreErrorCode {
    Aborted,
    AlreadyExists,
    Cancelled,
    DataLoss,
    DeadlineExceeded,
    FailedPrecondition,
    Internal,
    InvalidArgument,
    NotFound,
    OutOfRange,
    PermissionDenied,
    ResourceExhausted,
    Unauthenticated,
    Unavailable,
    Unimplemented,
    Unknown,
}

impl FirestoreErrorCode {
    /// Codes the transaction executor treats as transient and retries with
    /// backoff. `Aborted` is the contention signal and always retries.
    pub fn is_transaction_retryable(self) -> bool {
        matches!(
            self,
            FirestoreErrorCode::Aborted
                | FirestoreErrorCode::Unavailable
                | FirestoreErrorCode::Cancelled
                | FirestoreErrorCode::ResourceExhausted
                | FirestoreErrorCode::Internal
                | FirestoreErrorCode::DeadlineExceeded
                | FirestoreErrorCode::Unknown
        )
    }

    /// Maps a bare HTTP status to a canonical code. Used when an error
    /// envelope arrives without a `status` field.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => FirestoreErrorCode::InvalidArgument,
            401 | 403 => FirestoreErrorCode::Unauthenticated,
            404 => FirestoreErrorCode::NotFound,
            409 => FirestoreErrorCode::Aborted,
            500 => FirestoreErrorCode::Internal,
            503 => FirestoreErrorCode::Unavailable,
            _ => FirestoreErrorCode::Unknown,
        }
    }
}

impl From<gcloud_sdk::tonic::Code> for FirestoreErrorCode {
    fn from(code: gcloud_sdk::tonic::Code) -> Self {
        match code {
            gcloud_sdk::tonic::Code::Aborted => FirestoreErrorCode::Aborted,
            gcloud_sdk::tonic::Code::AlreadyExists => FirestoreErrorCode::AlreadyExists,
            gcloud_sdk::tonic::Code::Cancelled => FirestoreErrorCode::Cancelled,
            gcloud_sdk::tonic::Code::DataLoss => FirestoreErrorCode::DataLoss,
            gcloud_sdk::tonic::Code::DeadlineExceeded => FirestoreErrorCode::DeadlineExceeded,
            gcloud_sdk::tonic::Code::FailedPrecondition => FirestoreErrorCode::FailedPrecondition,
            gcloud_sdk::tonic::Code::Internal => FirestoreErrorCode::Internal,
            gcloud_sdk::tonic::Code::InvalidArgument => FirestoreErrorCode::InvalidArgument,
            gcloud_sdk::tonic::Code::NotFound => FirestoreErrorCode::NotFound,
            gcloud_sdk::tonic::Code::OutOfRange => FirestoreErrorCode::OutOfRange,
            gcloud_sdk::tonic::Code::PermissionDenied => FirestoreErrorCode::PermissionDenied,
            gcloud_sdk::tonic::Code::ResourceExhausted => FirestoreErrorCode::ResourceExhausted,
            gcloud_sdk::tonic::Code::Unauthenticated => FirestoreErrorCode::Unauthenticated,
            gcloud_sdk::tonic::Code::Unavailable => FirestoreErrorCode::Unavailable,
            gcloud_sdk::tonic::Code::Unimplemented => FirestoreErrorCode::Unimplemented,
            _ => FirestoreErrorCode::Unknown,
        }
    }
}

impl Display for FirestoreErrorCode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let code_str = match self {
            FirestoreErrorCode::Aborted => "ABORTED",
            FirestoreErrorCode::AlreadyExists => "ALREADY_EXISTS",
            FirestoreErrorCode::Cancelled => "CANCELLED",
            FirestoreErrorCode::DataLoss => "DATA_LOSS",
            FirestoreErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            FirestoreErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            FirestoreErrorCode::Internal => "INTERNAL",
            FirestoreErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            FirestoreErrorCode::NotFound => "NOT_FOUND",
            FirestoreErrorCode::OutOfRange => "OUT_OF_RANGE",
            FirestoreErrorCode::PermissionDenied => "PERMISSION_DENIED",
            FirestoreErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            FirestoreErrorCode::Unauthenticated => "UNAUTHENTICATED",
            FirestoreErrorCode::Unavailable => "UNAVAILABLE",
            FirestoreErrorCode::Unimplemented => "UNIMPLEMENTED",
            FirestoreErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{code_str}")
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Builder, Serialize, Deserialize)]
pub struct FirestoreErrorPublicGenericDetails {
    pub code: FirestoreErrorCode,
}

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreSystemError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub message: String,
}

impl Display for FirestoreSystemError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Firestore system/internal error: {}", self.message)
    }
}

impl std::error::Error for FirestoreSystemError {}

#[derive(Debug, Clone, Builder)]
pub struct FirestoreDatabaseError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub details: String,
    pub retry_possible: bool,
}

impl Display for FirestoreDatabaseError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Database general error occurred: {}", self.details)
    }
}

impl std::error::Error for FirestoreDatabaseError {}

#[derive(Debug, Clone, Builder)]
pub struct FirestoreDataConflictError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub details: String,
}

impl Display for FirestoreDataConflictError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Database conflict error occurred: {}", self.details)
    }
}

impl std::error::Error for FirestoreDataConflictError {}

#[derive(Debug, Clone, Builder)]
pub struct FirestoreDataNotFoundError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub data_detail_message: String,
}

impl Display for FirestoreDataNotFoundError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Data not found error occurred: {:?}", self.public)
    }
}

impl std::error::Error for FirestoreDataNotFoundError {}

#[derive(Debug, Eq, PartialEq, Clone, Builder, Serialize, Deserialize)]
pub struct FirestoreInvalidParametersPublicDetails {
    pub field: String,
    pub error: String,
}

#[derive(Debug, Clone, Builder)]
pub struct FirestoreInvalidParametersError {
    pub public: FirestoreInvalidParametersPublicDetails,
}

impl Display for FirestoreInvalidParametersError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Invalid parameters error: {:?}", self.public)
    }
}

impl std::error::Error for FirestoreInvalidParametersError {}

pub(crate) fn invalid_argument<F, E>(field: F, error: E) -> FirestoreError
where
    F: Into<String>,
    E: Into<String>,
{
    FirestoreError::InvalidParametersError(FirestoreInvalidParametersError::new(
        FirestoreInvalidParametersPublicDetails::new(field.into(), error.into()),
    ))
}

#[derive(Debug, Eq, PartialEq, Clone, Builder)]
pub struct FirestoreNetworkError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub message: String,
}

impl Display for FirestoreNetworkError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Network error: {}", self.message)
    }
}

impl std::error::Error for FirestoreNetworkError {}

impl From<gcloud_sdk::error::Error> for FirestoreError {
    fn from(e: gcloud_sdk::error::Error) -> Self {
        FirestoreError::SystemError(FirestoreSystemError::new(
            FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Internal),
            format!("GCloud system error: {e}"),
        ))
    }
}

impl From<gcloud_sdk::tonic::Status> for FirestoreError {
    fn from(status: gcloud_sdk::tonic::Status) -> Self {
        let code: FirestoreErrorCode = status.code().into();
        match code {
            FirestoreErrorCode::AlreadyExists => {
                FirestoreError::DataConflictError(FirestoreDataConflictError::new(
                    FirestoreErrorPublicGenericDetails::new(code),
                    format!("{status}"),
                ))
            }
            FirestoreErrorCode::NotFound => {
                FirestoreError::DataNotFoundError(FirestoreDataNotFoundError::new(
                    FirestoreErrorPublicGenericDetails::new(code),
                    format!("{status}"),
                ))
            }
            FirestoreErrorCode::Aborted
            | FirestoreErrorCode::Cancelled
            | FirestoreErrorCode::Unavailable
            | FirestoreErrorCode::ResourceExhausted => {
                FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                    FirestoreErrorPublicGenericDetails::new(code),
                    format!("{status}"),
                    true,
                ))
            }
            FirestoreErrorCode::Unknown => check_hyper_errors(status),
            _ => FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                FirestoreErrorPublicGenericDetails::new(code),
                format!("{status}"),
                false,
            )),
        }
    }
}

fn check_hyper_errors(status: gcloud_sdk::tonic::Status) -> FirestoreError {
    match status.source() {
        Some(hyper_error) => match hyper_error.downcast_ref::<hyper::Error>() {
            Some(err) if err.is_closed() => {
                FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                    FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Unavailable),
                    format!("Hyper error: {err}"),
                    true,
                ))
            }
            Some(err) if err.is_timeout() => {
                FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                    FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::DeadlineExceeded),
                    format!("Hyper error: {err}"),
                    true,
                ))
            }
            Some(err) => FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Unknown),
                format!("Hyper error: {err}"),
                false,
            )),
            _ => FirestoreError::DatabaseError(FirestoreDatabaseError::new(
                FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Unknown),
                format!("{status}"),
                false,
            )),
        },
        _ => FirestoreError::DatabaseError(FirestoreDatabaseError::new(
            FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Unknown),
            format!("{status}"),
            false,
        )),
    }
}

impl serde::ser::Error for FirestoreError {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        FirestoreError::SerializeError(FirestoreSerializationError::from_message(msg.to_string()))
    }
}

impl serde::de::Error for FirestoreError {
    fn custom<T>(msg: T) -> Self
    where
        T: Display,
    {
        FirestoreError::DeserializeError(FirestoreSerializationError::from_message(msg.to_string()))
    }
}

#[derive(Debug, Builder)]
pub struct FirestoreSerializationError {
    pub public: FirestoreErrorPublicGenericDetails,
    pub message: String,
}

impl FirestoreSerializationError {
    pub fn from_message<S: AsRef<str>>(message: S) -> FirestoreSerializationError {
        FirestoreSerializationError::new(
            FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::InvalidArgument),
            message.as_ref().to_string(),
        )
    }
}

impl Display for FirestoreSerializationError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Invalid serialization: {}", self.message)
    }
}

impl std::error::Error for FirestoreSerializationError {}

impl From<chrono::ParseError> for FirestoreError {
    fn from(parse_err: chrono::ParseError) -> Self {
        FirestoreError::DeserializeError(FirestoreSerializationError::from_message(format!(
            "Parse error: {parse_err}"
        )))
    }
}

impl From<chrono::OutOfRangeError> for FirestoreError {
    fn from(out_of_range: chrono::OutOfRangeError) -> Self {
        FirestoreError::InvalidParametersError(FirestoreInvalidParametersError::new(
            FirestoreInvalidParametersPublicDetails::new(
                "duration".to_string(),
                format!("Out of range: {out_of_range}"),
            ),
        ))
    }
}

#[derive(Debug, Builder)]
pub struct FirestoreErrorInTransaction {
    pub transaction_id: Option<FirestoreTransactionId>,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl Display for FirestoreErrorInTransaction {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.transaction_id {
            Some(ref tid) => write!(
                f,
                "Error occurred inside transaction {}: {}",
                hex::encode(tid),
                self.source
            ),
            None => write!(f, "Error occurred inside transaction: {}", self.source),
        }
    }
}

impl std::error::Error for FirestoreErrorInTransaction {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

pub type BackoffError<E> = backoff::Error<E>;

pub(crate) fn firestore_err_to_backoff(err: FirestoreError) -> BackoffError<FirestoreError> {
    match err {
        FirestoreError::DatabaseError(ref db_err) if db_err.retry_possible => {
            backoff::Error::transient(err)
        }
        other => backoff::Error::permanent(other),
    }
}

impl From<std::io::Error> for FirestoreError {
    fn from(io_error: std::io::Error) -> Self {
        FirestoreError::SystemError(FirestoreSystemError::new(
            FirestoreErrorPublicGenericDetails::new(FirestoreErrorCode::Internal),
            format!("I/O error: {io_error}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            FirestoreErrorCode::from_http_status(400),
            FirestoreErrorCode::InvalidArgument
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(401),
            FirestoreErrorCode::Unauthenticated
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(403),
            FirestoreErrorCode::Unauthenticated
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(404),
            FirestoreErrorCode::NotFound
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(409),
            FirestoreErrorCode::Aborted
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(500),
            FirestoreErrorCode::Internal
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(503),
            FirestoreErrorCode::Unavailable
        );
        assert_eq!(
            FirestoreErrorCode::from_http_status(418),
            FirestoreErrorCode::Unknown
        );
    }

    #[test]
    fn test_transaction_retryability() {
        for code in [
            FirestoreErrorCode::Aborted,
            FirestoreErrorCode::Unavailable,
            FirestoreErrorCode::Cancelled,
            FirestoreErrorCode::ResourceExhausted,
            FirestoreErrorCode::Internal,
            FirestoreErrorCode::DeadlineExceeded,
            FirestoreErrorCode::Unknown,
        ] {
            assert!(code.is_transaction_retryable(), "{code} should retry");
        }

        for code in [
            FirestoreErrorCode::FailedPrecondition,
            FirestoreErrorCode::NotFound,
            FirestoreErrorCode::AlreadyExists,
            FirestoreErrorCode::InvalidArgument,
            FirestoreErrorCode::PermissionDenied,
            FirestoreErrorCode::Unauthenticated,
            FirestoreErrorCode::OutOfRange,
            FirestoreErrorCode::Unimplemented,
            FirestoreErrorCode::DataLoss,
        ] {
            assert!(!code.is_transaction_retryable(), "{code} should not retry");
        }
    }

    #[test]
    fn test_validation_errors_map_to_invalid_argument() {
        let err = invalid_argument("limit_to_last", "requires an explicit ordering");
        assert_eq!(err.code(), FirestoreErrorCode::InvalidArgument);
    }
}
