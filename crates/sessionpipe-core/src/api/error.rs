use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

pub(crate) const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
const NETWORK_MESSAGE: &str = "Unable to reach the server. Please check your connection and try again.";

/// The parts of a failed HTTP response kept for programmatic inspection.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body, truncated to a bounded length.
    pub body: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: &str) -> Self {
        Self {
            status,
            headers,
            body: truncate_body(body),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// Rejected before anything was sent.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// No session, or one that could not be renewed.
    #[error("Authentication required: {message}")]
    AuthRequired {
        message: String,
        response: Option<ErrorResponse>,
    },

    #[error("Access denied: {message}")]
    Permission {
        message: String,
        response: ErrorResponse,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
        response: ErrorResponse,
    },

    /// No response was received (connection failure, timeout, aborted body).
    #[error("Network error: {message}")]
    Network {
        message: String,
        timed_out: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server error ({}): {message}", .response.status)]
    Server {
        message: String,
        response: ErrorResponse,
    },

    #[error("Request failed ({}): {message}", .response.status)]
    Wrapped {
        message: String,
        response: ErrorResponse,
    },

    /// A successful response whose body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Classify a non-success response.
    pub fn from_response(response: ErrorResponse, now: DateTime<Utc>) -> Self {
        let message = friendly_message(response.status).to_string();
        match response.status.as_u16() {
            401 => ApiError::AuthRequired {
                message,
                response: Some(response),
            },
            403 => ApiError::Permission { message, response },
            429 => {
                let retry_after = response
                    .headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, now));
                ApiError::RateLimited {
                    message,
                    retry_after,
                    response,
                }
            }
            500..=599 => ApiError::Server { message, response },
            _ => ApiError::Wrapped { message, response },
        }
    }

    pub(crate) fn network(source: reqwest::Error) -> Self {
        ApiError::Network {
            message: NETWORK_MESSAGE.to_string(),
            timed_out: source.is_timeout(),
            source,
        }
    }

    pub(crate) fn session_expired() -> Self {
        ApiError::AuthRequired {
            message: SESSION_EXPIRED_MESSAGE.to_string(),
            response: None,
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> &str {
        match self {
            ApiError::Validation(message) | ApiError::InvalidResponse(message) => message,
            ApiError::AuthRequired { message, .. }
            | ApiError::Permission { message, .. }
            | ApiError::RateLimited { message, .. }
            | ApiError::Network { message, .. }
            | ApiError::Server { message, .. }
            | ApiError::Wrapped { message, .. } => message,
        }
    }

    /// The original response, when one was received.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            ApiError::AuthRequired { response, .. } => response.as_ref(),
            ApiError::Permission { response, .. }
            | ApiError::RateLimited { response, .. }
            | ApiError::Server { response, .. }
            | ApiError::Wrapped { response, .. } => Some(response),
            ApiError::Validation(_) | ApiError::Network { .. } | ApiError::InvalidResponse(_) => {
                None
            }
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|r| r.status)
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, ApiError::AuthRequired { .. })
    }
}

/// Stable user-facing text per status code.
pub fn friendly_message(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "The request was invalid. Please check your input and try again.",
        401 => SESSION_EXPIRED_MESSAGE,
        403 => "You do not have permission to perform this action.",
        404 => "The requested resource was not found.",
        409 => "This change conflicts with the current state of the resource.",
        422 => "The submitted data could not be processed.",
        429 => "Too many requests. Please wait a moment and try again.",
        500 => "The server encountered an error. Please try again later.",
        502 => "The server received an invalid response from upstream. Please try again later.",
        503 => "The service is temporarily unavailable. Please try again later.",
        504 => "The server took too long to respond. Please try again later.",
        _ => "An unexpected error occurred. Please try again.",
    }
}

/// Parse a `Retry-After` value: either delta-seconds or an HTTP date.
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    use super::*;

    fn response(status: u16, body: &str) -> ErrorResponse {
        ErrorResponse::new(
            StatusCode::from_u16(status).expect("valid status"),
            HeaderMap::new(),
            body,
        )
    }

    #[test]
    fn test_classification_by_status() {
        let now = Utc::now();
        assert!(matches!(
            ApiError::from_response(response(401, ""), now),
            ApiError::AuthRequired { response: Some(_), .. }
        ));
        assert!(matches!(
            ApiError::from_response(response(403, ""), now),
            ApiError::Permission { .. }
        ));
        assert!(matches!(
            ApiError::from_response(response(429, ""), now),
            ApiError::RateLimited { retry_after: None, .. }
        ));
        assert!(matches!(
            ApiError::from_response(response(503, ""), now),
            ApiError::Server { .. }
        ));
        assert!(matches!(
            ApiError::from_response(response(418, ""), now),
            ApiError::Wrapped { .. }
        ));
    }

    #[test]
    fn test_wrapped_error_keeps_message_and_response() {
        let err = ApiError::from_response(response(409, r#"{"detail":"duplicate"}"#), Utc::now());

        assert_eq!(
            err.user_message(),
            "This change conflicts with the current state of the resource."
        );
        let raw = err.response().expect("response kept");
        assert_eq!(raw.status, StatusCode::CONFLICT);
        assert!(raw.body.contains("duplicate"));
    }

    #[test]
    fn test_friendly_message_default() {
        assert_eq!(
            friendly_message(StatusCode::IM_A_TEAPOT),
            "An unexpected error occurred. Please try again."
        );
        assert_ne!(
            friendly_message(StatusCode::BAD_GATEWAY),
            friendly_message(StatusCode::GATEWAY_TIMEOUT)
        );
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        let err = ApiError::from_response(
            ErrorResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, ""),
            Utc::now(),
        );

        match err {
            ApiError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(120)));
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );

        let later = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", later),
            Some(Duration::ZERO)
        );

        assert_eq!(parse_retry_after("whenever", now), None);
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }
}
