use gatehouse_storage::StoreError;
use thiserror::Error;

/// Errors returned by every engine operation.
///
/// Callers map these onto their transport (401/403/404/409/410/400/500).
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invite has expired")]
    Expired,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    /// Store error mapper that names the missing record on `NotFound`.
    pub(crate) fn lookup(what: &'static str) -> impl FnOnce(StoreError) -> AccessError {
        move |e| match e {
            StoreError::NotFound => AccessError::NotFound(what.to_string()),
            other => other.into(),
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AccessError::NotFound("record".to_string()),
            StoreError::AlreadyExists => AccessError::Conflict("already exists".to_string()),
            StoreError::Conflict => AccessError::Conflict("concurrent modification".to_string()),
            StoreError::Backend(msg) => AccessError::Internal(msg),
        }
    }
}

pub type Result<T, E = AccessError> = std::result::Result<T, E>;
