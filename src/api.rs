//! JSON response envelope returned by every route
use super::error::{FieldError, ServiceError};
use serde::Serialize;

const GENERIC_INTERNAL_MESSAGE: &str = "Something went wrong. Please try again later.";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    /// HTTP status to send. Not part of the body.
    #[serde(skip)]
    pub status: u16,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            count: None,
            data: Some(data),
            error: None,
            errors: None,
            status: 200,
        }
    }

    pub fn created(data: T, message: &str) -> Self {
        Self {
            status: 201,
            ..Self::ok(data).with_message(message)
        }
    }

    /// Attach a message to a successful response. Failures keep their error text.
    pub fn with_message(mut self, message: &str) -> Self {
        if self.success {
            self.message = Some(message.to_string());
        }
        self
    }

    /// Translate a service error into a failure envelope.
    ///
    /// Internal errors are always logged in full; the client only sees the
    /// detail when `expose_detail` is set.
    pub fn failure(err: ServiceError, expose_detail: bool) -> Self {
        let status = err.status_code();
        let (message, errors) = match err {
            ServiceError::Validation(fields) => ("Validation failed".to_string(), Some(fields)),
            ServiceError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                let message = if expose_detail {
                    detail
                } else {
                    GENERIC_INTERNAL_MESSAGE.to_string()
                };
                (message, None)
            }
            other => (other.to_string(), None),
        };
        Self {
            success: false,
            message: Some(message.clone()),
            count: None,
            data: None,
            error: Some(message),
            errors,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl<T> ApiResponse<Vec<T>> {
    /// A list body with its length in `count`.
    pub fn list(items: Vec<T>) -> Self {
        Self {
            count: Some(items.len()),
            ..Self::ok(items)
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            tracing::error!(%err, "response serialization failed");
            serde_json::json!({ "success": false, "error": GENERIC_INTERNAL_MESSAGE })
        })
    }
}
