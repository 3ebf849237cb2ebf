//! API error type shared by the gRPC and REST adapters

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bimeta_proto::payload::{MetaKeys, MetaVals};
use prost::Message;
use serde::Serialize;

/// Error category exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiCode {
    NotFound,
    Internal,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
}

impl ApiCode {
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            Self::Internal | Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn grpc_code(self) -> tonic::Code {
        match self {
            Self::NotFound => tonic::Code::NotFound,
            Self::Internal => tonic::Code::Internal,
            Self::Unknown => tonic::Code::Unknown,
            Self::InvalidArgument => tonic::Code::InvalidArgument,
            Self::DeadlineExceeded => tonic::Code::DeadlineExceeded,
        }
    }
}

/// Results a batch produced before it aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partial {
    /// Keys (inverse lookups, inverse deletes, stored keys of a set batch)
    Keys(Vec<String>),
    /// Values (forward lookups and deletes)
    Vals(Vec<String>),
}

impl Partial {
    #[must_use]
    pub fn items(&self) -> &[String] {
        match self {
            Self::Keys(items) | Self::Vals(items) => items,
        }
    }

    /// Protobuf encoding carried in gRPC status details
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Keys(keys) => MetaKeys { keys: keys.clone() }.encode_to_vec(),
            Self::Vals(vals) => MetaVals { vals: vals.clone() }.encode_to_vec(),
        }
    }
}

/// Categorized API error
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ApiCode,
    pub message: String,
    pub partial: Option<Partial>,
}

impl ApiError {
    pub fn new(code: ApiCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            partial: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiCode::Internal, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiCode::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ApiCode::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ApiCode::DeadlineExceeded, message)
    }

    #[must_use]
    pub fn with_partial(mut self, partial: Partial) -> Self {
        self.partial = Some(partial);
        self
    }
}

impl From<ApiError> for tonic::Status {
    fn from(err: ApiError) -> Self {
        let code = err.code.grpc_code();
        match err.partial {
            Some(partial) => Self::with_details(code, err.message, partial.encode().into()),
            None => Self::new(code, err.message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ApiCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    partial: Option<&'a [String]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
            partial: self.partial.as_ref().map(Partial::items),
        };
        (self.code.http_status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ApiCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiCode::InvalidArgument.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiCode::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiCode::Unknown.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiCode::DeadlineExceeded.http_status(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[test]
    fn test_status_carries_partial_results() {
        let err = ApiError::not_found("key b not found")
            .with_partial(Partial::Vals(vec!["1".to_string()]));
        let status = tonic::Status::from(err);

        assert_eq!(status.code(), tonic::Code::NotFound);
        assert_eq!(status.message(), "key b not found");
        let partial = MetaVals::decode(status.details()).unwrap();
        assert_eq!(partial.vals, vec!["1".to_string()]);
    }

    #[test]
    fn test_status_without_partial() {
        let status = tonic::Status::from(ApiError::unknown("value x not found"));
        assert_eq!(status.code(), tonic::Code::Unknown);
        assert!(status.details().is_empty());
    }

    #[test]
    fn test_code_serializes_screaming() {
        let json = serde_json::to_string(&ApiCode::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"DEADLINE_EXCEEDED\"");
    }
}
