use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use super::ApiError;

/// An outbound API call, described relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide timeout for this call (and its retry).
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. Fails if `body` cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::Validation(format!("Request body is not valid JSON: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Path without query string or trailing slash, used to recognise
    /// auth endpoints.
    pub(crate) fn endpoint(&self) -> &str {
        let path = self.path.split('?').next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }

    /// Check everything that can be checked before sending.
    pub fn validate(&self) -> Result<(), ApiError> {
        if !self.path.starts_with('/') {
            return Err(ApiError::Validation(format!(
                "Path must start with '/': {:?}",
                self.path
            )));
        }
        self.header_map().map(|_| ())
    }

    pub(crate) fn header_map(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::Validation(format!("Invalid header name: {:?}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ApiError::Validation(format!("Invalid value for header {}", name)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// A successful API response with its body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_normalisation() {
        assert_eq!(ApiRequest::post("/auth/login/").endpoint(), "/auth/login");
        assert_eq!(ApiRequest::get("/auth/refresh?x=1").endpoint(), "/auth/refresh");
        assert_eq!(ApiRequest::get("/").endpoint(), "/");
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(ApiRequest::get("portfolios").validate().is_err());
        assert!(ApiRequest::get("/p").header("bad header", "v").validate().is_err());
        assert!(ApiRequest::get("/p").header("X-Ok", "line\nbreak").validate().is_err());
        assert!(ApiRequest::get("/p").header("X-Ok", "fine").validate().is_ok());
    }

    #[test]
    fn test_json_body() {
        let request = ApiRequest::post("/items")
            .json(&serde_json::json!({"name": "widget"}))
            .expect("body serializes");
        assert_eq!(request.body, Some(serde_json::json!({"name": "widget"})));
    }

    #[test]
    fn test_response_json_error() {
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), b"<html>".to_vec());
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
        assert_eq!(response.text(), "<html>");
    }
}
