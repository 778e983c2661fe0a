// HTTP error handling

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Result type for the JSON API handlers
pub type JsonApiResult<T> = Result<T, JsonApiError>;

pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Offending request fields, reported by the JSON API
    pub field: Option<Vec<String>>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field.get_or_insert_with(Vec::new).push(field.into());
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Short title of the status, e.g. `Not Found`
    fn title(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("Error")
    }

    /// Message shown to end users; internals stay in the logs
    fn user_message(&self) -> &'static str {
        match self.status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => "The request is badly formatted",
            StatusCode::UNAUTHORIZED => "Invalid credentials",
            StatusCode::FORBIDDEN => "The request was refused",
            StatusCode::NOT_FOUND => "The requested resource was not found",
            StatusCode::CONFLICT => "The resource already exists",
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => "The upstream provider is unavailable",
            _ => "The request could not be processed",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert iptvproxy_core errors to HTTP errors
impl From<iptvproxy_core::Error> for AppError {
    fn from(err: iptvproxy_core::Error) -> Self {
        use iptvproxy_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::AlreadyExists(msg) => Self::conflict(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Authentication(msg) => Self::unauthorized(msg),
            Error::TransportPolicy(msg) => Self::forbidden(msg),
            Error::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                Self::new(StatusCode::BAD_GATEWAY, "Upstream provider error")
            }
            Error::ProviderUnavailable(msg) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Provider not configured: {msg}"),
            ),
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::internal_server_error("Database error")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal_server_error("Data processing error")
            }
            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                Self::internal_server_error("Internal server error")
            }
            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

/// Convert anyhow errors to HTTP errors
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("Anyhow error: {}", err);
        Self::internal_server_error("Internal server error")
    }
}

/// Error of the `/recordings` and `/configuration` JSON API
///
/// Rendered as `{"errors": [{status, title, field, developer_message, user_message}]}`.
#[derive(Debug)]
pub struct JsonApiError(pub AppError);

#[derive(Debug, Serialize)]
struct JsonApiErrorObject<'a> {
    status: String,
    title: &'a str,
    field: Option<&'a [String]>,
    developer_message: &'a str,
    user_message: &'a str,
}

#[derive(Debug, Serialize)]
struct JsonApiErrors<'a> {
    errors: [JsonApiErrorObject<'a>; 1],
}

impl IntoResponse for JsonApiError {
    fn into_response(self) -> Response {
        let error = &self.0;
        let body = JsonApiErrors {
            errors: [JsonApiErrorObject {
                status: error.status.as_u16().to_string(),
                title: error.title(),
                field: error.field.as_deref(),
                developer_message: &error.message,
                user_message: error.user_message(),
            }],
        };

        let mut response = (error.status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_API_CONTENT_TYPE));
        response
    }
}

impl From<AppError> for JsonApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<iptvproxy_core::Error> for JsonApiError {
    fn from(err: iptvproxy_core::Error) -> Self {
        match err {
            // Validation failures of a well-formed body
            iptvproxy_core::Error::InvalidInput(msg) => Self(AppError::unprocessable(msg)),
            other => Self(AppError::from(other)),
        }
    }
}
