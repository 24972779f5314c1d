//! The fetch primitive shared by both cache tiers.
//!
//! Requests and responses are plain owned snapshots: a response body is fully
//! buffered, so cloning a [`Response`] is how a copy gets stored while the
//! original goes back to the caller.

pub mod http;

use std::borrow::Cow;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
pub use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::FetchError;

pub use http::HttpFetcher;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// A full page load (navigation).
    Document,
    Image,
    Style,
    Script,
    Font,
    /// Programmatic fetches with no particular destination.
    #[default]
    Empty,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Empty,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse `url` into a GET request.
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        let url = Url::parse(url)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", url, e)))?;
        Ok(Self::get(url))
    }

    /// A navigation request for a full document.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Identity used as the bucket key: method plus effective URL.
    pub fn identity(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Synthetic JSON response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        // Serializing a Value cannot fail
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(status, body).with_header(header::CONTENT_TYPE, "application/json")
    }

    /// Synthetic plain-text response.
    pub fn text(status: StatusCode, message: &str) -> Self {
        Self::new(status, message.to_string())
            .with_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
    }

    pub fn with_header(mut self, name: header::HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    /// True for 2xx statuses. Only such responses are ever stored.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn text_body(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Anything that can turn a request into a response.
///
/// Implemented by the real HTTP client, by the intercepting worker (so it can
/// sit beneath the response cache) and by test doubles.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for std::sync::Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_includes_method_and_url() {
        let request = Request::parse("https://example.test/api/teams?page=2").unwrap();
        assert_eq!(request.identity(), "GET https://example.test/api/teams?page=2");

        let post = request.with_method(Method::POST);
        assert_eq!(post.identity(), "POST https://example.test/api/teams?page=2");
    }

    #[test]
    fn test_parse_rejects_relative_url() {
        assert!(matches!(
            Request::parse("/api/teams"),
            Err(FetchError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_json_response_sets_content_type() {
        let response = Response::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({ "offline": true }),
        );
        assert!(!response.ok());
        assert_eq!(
            response.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value = response.json_body().unwrap();
        assert_eq!(body["offline"], true);
    }

    #[test]
    fn test_navigation_is_document_destination() {
        let url = Url::parse("https://example.test/community").unwrap();
        assert!(Request::navigate(url.clone()).is_navigation());
        assert!(!Request::get(url).is_navigation());
    }
}
