//! ACI client errors

use crate::common::{HttpResponse, Method};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Body of a failed response, decoded as JSON when possible
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    fn from_text(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text.to_string()),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{}", value),
            ResponseBody::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Context captured for a non-2xx response
#[derive(Debug, Clone)]
pub struct RequestFailure {
    pub method: Method,
    pub url: String,
    pub status: u16,
    pub reason: String,
    pub request_body: Option<Value>,
    pub response_body: ResponseBody,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed with code {} {}: {}",
            self.method, self.url, self.status, self.reason, self.response_body
        )
    }
}

/// Errors that can occur when interacting with the API
#[derive(Debug, Error)]
pub enum AciError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Request failed: {0}")]
    RequestFailure(Box<RequestFailure>),

    /// A create call was rejected with 409, e.g. an exhausted address pool
    #[error("Allocation conflict: {0}")]
    AllocationConflict(Box<RequestFailure>),

    /// The server answered 404
    #[error("resource not found at {url}")]
    NotFound { url: String },

    /// A success status whose body is not valid JSON
    #[error("server returned invalid (non-JSON) data from {url} (status {status}): {body}")]
    MalformedResponse { url: String, status: u16, body: String },

    /// Field absent after hydration, or the record cannot be hydrated
    #[error("object has no attribute \"{field}\"{}", url_suffix(.url.as_deref()))]
    AttributeNotFound { field: String, url: Option<String> },

    /// Missing or unparsable API version where a comparison was required
    #[error("Invalid API version: {0:?}")]
    VersionParse(String),

    /// The server returned decodable JSON of an unexpected shape
    #[error("API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., offset without limit)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Filter names rejected by the OpenAPI document
    #[error("Parameter validation failed: {}", .0.join("; "))]
    ParameterValidation(Vec<String>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AciError {
    /// Classify a non-success response.
    pub(crate) fn from_response(
        method: Method,
        url: String,
        request_body: Option<Value>,
        response: &HttpResponse,
    ) -> Self {
        if response.status == 404 {
            return AciError::NotFound { url };
        }

        let failure = Box::new(RequestFailure {
            method,
            url,
            status: response.status,
            reason: response.reason.clone(),
            request_body,
            response_body: ResponseBody::from_text(&response.text),
        });

        if response.status == 409 && method == Method::Post {
            AciError::AllocationConflict(failure)
        } else {
            AciError::RequestFailure(failure)
        }
    }

    /// HTTP status reported by the server, if the error came from one
    pub fn status(&self) -> Option<u16> {
        match self {
            AciError::RequestFailure(failure) | AciError::AllocationConflict(failure) => {
                Some(failure.status)
            }
            AciError::NotFound { .. } => Some(404),
            AciError::MalformedResponse { status, .. } => Some(*status),
            AciError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn url_suffix(url: Option<&str>) -> String {
    url.map(|u| format!(" ({u})")).unwrap_or_default()
}
