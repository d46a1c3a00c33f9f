use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use data_model::{Config, KeyResult, SEQNUM_KEY};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::configurator::{Applied, ConfiguratorError};

#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    #[serde(skip)]
    seq_num: Option<u64>,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    results: Vec<KeyResult>,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            seq_num: None,
            message: message.to_string(),
            results: Vec::new(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"))
    }
}

impl From<ConfiguratorError> for ApiError {
    fn from(err: ConfiguratorError) -> Self {
        let seq_num = err.seq_num();
        let mut api_error = match err {
            ConfiguratorError::InvalidArgument(message) => Self::bad_request(&message),
            ConfiguratorError::FailedPrecondition {
                message, results, ..
            } => {
                let mut api_error = Self::new(StatusCode::PRECONDITION_FAILED, &message);
                api_error.results = results;
                api_error
            }
            ConfiguratorError::Internal(err) => Self::internal_error(err),
        };
        api_error.seq_num = seq_num;
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        let headers = seqnum_header(self.seq_num);
        // Partially applied batches report every item next to the message.
        if self.results.is_empty() {
            (self.status_code, headers, self.message).into_response()
        } else {
            (self.status_code, headers, Json(self)).into_response()
        }
    }
}

/// Response metadata carrying the batch sequence number, when there is one.
pub fn seqnum_header(seq_num: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(seq_num) = seq_num {
        headers.insert(SEQNUM_KEY, HeaderValue::from(seq_num));
    }
    headers
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub update: Config,
    #[serde(default)]
    pub full_resync: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub delete: Config,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub results: Vec<KeyResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub config: Config,
}

/// Successful update or delete: the results plus the `seqnum` header.
impl IntoResponse for Applied {
    fn into_response(self) -> Response {
        (
            seqnum_header(Some(self.seq_num)),
            Json(ResultsResponse {
                results: self.results,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_precondition_keeps_seqnum() {
        let err = ApiError::from(ConfiguratorError::FailedPrecondition {
            message: "configure failed".to_string(),
            seq_num: 7,
            results: vec![KeyResult::seqnum(7)],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(response.headers()[SEQNUM_KEY], "7");
    }

    #[test]
    fn test_failed_precondition_body_carries_results() -> anyhow::Result<()> {
        let err = ApiError::from(ConfiguratorError::FailedPrecondition {
            message: "configure failed".to_string(),
            seq_num: 7,
            results: vec![KeyResult::seqnum(7)],
        });
        let body = serde_json::to_value(&err)?;
        assert_eq!(body["message"], "configure failed");
        assert_eq!(body["results"][0]["key"], SEQNUM_KEY);
        Ok(())
    }

    #[test]
    fn test_invalid_argument_is_bad_request() {
        let response =
            ApiError::from(ConfiguratorError::InvalidArgument("bad key".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(SEQNUM_KEY).is_none());
    }

    #[test]
    fn test_update_request_defaults() -> anyhow::Result<()> {
        let request: UpdateRequest = serde_json::from_str("{}")?;
        assert!(!request.full_resync);
        assert!(request.update.is_empty());
        Ok(())
    }
}
