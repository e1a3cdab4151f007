use serde::Serialize;
use sled::transaction::TransactionError;
use std::convert::Infallible;

/// A single rejected input field, reported back to the client as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("Insufficient stock. Available: {available}, Needed: {needed}")]
    InsufficientStock { available: usize, needed: usize },
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServiceError {
    pub fn validation(field: &str, message: &str) -> Self {
        ServiceError::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        ServiceError::NotFound { entity, id }
    }
    /// HTTP status the REST layer answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_)
            | ServiceError::InvalidState(_)
            | ServiceError::InsufficientStock { .. }
            | ServiceError::Conflict(_) => 400,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Internal(_) => 500,
        }
    }
}

impl From<sled::Error> for ServiceError {
    fn from(err: sled::Error) -> Self {
        ServiceError::Internal(format!("storage: {err}"))
    }
}

impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(storage) => storage.into(),
        }
    }
}

impl From<minicbor::encode::Error<Infallible>> for ServiceError {
    fn from(err: minicbor::encode::Error<Infallible>) -> Self {
        ServiceError::Internal(format!("record encoding: {err}"))
    }
}

impl From<minicbor::decode::Error> for ServiceError {
    fn from(err: minicbor::decode::Error) -> Self {
        ServiceError::Internal(format!("record decoding: {err}"))
    }
}

/// Collects field errors so every bad field is reported at once.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, field: &str, message: &str) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.push(field, message);
        }
    }
    pub fn finish(self) -> Result<(), ServiceError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self.0))
        }
    }
}
